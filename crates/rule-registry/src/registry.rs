use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use mocksmith_api::{Case, MockApi, Pagination};
use mocksmith_interact::{MockError, Request, Response};
use mocksmith_plugins::PluginRegistry;
use mocksmith_rule_store::RuleStore;

use crate::router::RuleRouter;

struct Snapshot {
    rules: HashMap<String, MockApi>,
    router: RuleRouter,
}

/// Live, concurrently-read dictionary of MockAPIs plus the compiled router.
///
/// Readers snapshot an `Arc` under a read lock and then work lock-free;
/// mutations serialize under a single async mutex, rebuild the router, and
/// swap the snapshot atomically, so a reader observes either the pre- or
/// post-change rule set, never an intermediate.
pub struct RuleRegistry {
    store: Arc<dyn RuleStore>,
    plugins: Arc<PluginRegistry>,
    snapshot: RwLock<Arc<Snapshot>>,
    write_lock: Mutex<()>,
}

impl RuleRegistry {
    pub fn new(store: Arc<dyn RuleStore>, plugins: Arc<PluginRegistry>) -> Arc<Self> {
        Arc::new(Self {
            store,
            plugins,
            snapshot: RwLock::new(Arc::new(Snapshot {
                rules: HashMap::new(),
                router: RuleRouter::empty(),
            })),
            write_lock: Mutex::new(()),
        })
    }

    /// Loads the rule set from storage and subscribes to announcements.
    /// A storage failure here is fatal; reconciliation failures later are
    /// logged and the in-memory state is retained.
    pub async fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), MockError> {
        self.reload().await?;
        let registry = Arc::clone(self);
        let mut announcements = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = announcements.recv() => match event {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            info!("storage announcement received");
                            if let Err(err) = registry.reload().await {
                                error!(%err, "failed to reload rules");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("storage announcement channel closed");
                            break;
                        }
                    },
                    _ = shutdown.changed() => {
                        warn!("registry stops watching announcements");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    /// Validates, persists, and records the rule, then rebuilds the router.
    /// Saving an existing uniqueKey is an idempotent overwrite.
    pub async fn save(&self, api: MockApi) -> Result<(), MockError> {
        api.validate()
            .map_err(|err| MockError::BadRule(err.to_string()))?;
        let encoded = serde_json::to_string(&api)
            .map_err(|err| MockError::BadRule(err.to_string()))?;

        let _guard = self.write_lock.lock().await;
        self.store
            .set(&api.unique_key, &encoded)
            .await
            .map_err(|err| MockError::StoreUnavailable(err.to_string()))?;
        let mut rules = self.snapshot.read().rules.clone();
        rules.insert(api.unique_key.clone(), api);
        self.install(rules);
        Ok(())
    }

    pub async fn delete(&self, unique_key: &str) -> Result<(), MockError> {
        let _guard = self.write_lock.lock().await;
        self.store
            .delete(unique_key)
            .await
            .map_err(|err| MockError::StoreUnavailable(err.to_string()))?;
        let mut rules = self.snapshot.read().rules.clone();
        rules.remove(unique_key);
        self.install(rules);
        Ok(())
    }

    /// Rules whose uniqueKey contains the keyword, in key order, paginated.
    pub fn list(&self, keywords: &str, pagination: Pagination) -> Vec<MockApi> {
        let snapshot = Arc::clone(&self.snapshot.read());
        let mut keys: Vec<&String> = snapshot
            .rules
            .keys()
            .filter(|key| keywords.is_empty() || key.contains(keywords))
            .collect();
        keys.sort();
        pagination
            .slice(keys)
            .into_iter()
            .filter_map(|key| snapshot.rules.get(key).cloned())
            .collect()
    }

    /// Consults the current router for the rule matching this tuple.
    pub fn match_rule(&self, host: &str, path: &str, method: &str) -> Option<MockApi> {
        let snapshot = Arc::clone(&self.snapshot.read());
        let name = snapshot.router.find(host, path, method)?;
        snapshot.rules.get(name).cloned()
    }

    /// Drives the pipeline: rule match, case selection, then the mock
    /// plugin chain in registration order.
    pub async fn mock_response(&self, request: &Request) -> Result<Response, MockError> {
        let api = self
            .match_rule(&request.host, &request.path, &request.method)
            .ok_or_else(|| MockError::NoRuleMatched(request.path.clone()))?;
        let case = self.first_matching_case(request, &api).await?;
        let mut response = Response::default_for(request);
        for plugin in self.plugins.mock_plugins() {
            match plugin
                .mock_response(case.response.as_ref(), request, &mut response)
                .await
            {
                Ok(false) => {}
                Ok(true) => return Ok(response),
                Err(err) => {
                    return Err(MockError::plugin(
                        plugin.name(),
                        err.grpc_code(),
                        err.to_string(),
                    ))
                }
            }
        }
        Ok(response)
    }

    /// Cases are tried in declaration order; the first whose condition
    /// matches wins, and a missing condition matches unconditionally.
    async fn first_matching_case<'a>(
        &self,
        request: &Request,
        api: &'a MockApi,
    ) -> Result<&'a Case, MockError> {
        for case in &api.cases {
            let Some(condition) = &case.condition else {
                return Ok(case);
            };
            for plugin in self.plugins.match_plugins() {
                match plugin.matches(request, condition).await {
                    Ok(true) => return Ok(case),
                    Ok(false) => {}
                    Err(err) => {
                        return Err(MockError::plugin(
                            plugin.name(),
                            err.grpc_code(),
                            err.to_string(),
                        ))
                    }
                }
            }
        }
        Err(MockError::NoCaseMatched)
    }

    async fn reload(&self) -> Result<(), MockError> {
        let pairs = self
            .store
            .list()
            .await
            .map_err(|err| MockError::StoreUnavailable(err.to_string()))?;
        info!(total = pairs.len(), "loading rules from storage");
        let mut rules = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            let api: MockApi = serde_json::from_str(&value)
                .map_err(|err| MockError::BadRule(format!("failed to load {key}: {err}")))?;
            debug!(uniqueKey = %api.unique_key, path = %api.path, "rule loaded");
            rules.insert(key, api);
        }
        let _guard = self.write_lock.lock().await;
        self.install(rules);
        Ok(())
    }

    fn install(&self, rules: HashMap<String, MockApi>) {
        let router = RuleRouter::build(&rules);
        *self.snapshot.write() = Arc::new(Snapshot { rules, router });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tonic::Code;

    use mocksmith_api::{
        Condition, ConditionItem, ResponseSpec, SimpleCondition, SimpleResponse,
    };
    use mocksmith_interact::{Body, Protocol};
    use mocksmith_plugins::{
        MatchPlugin, MockPlugin, PluginError, SimplePlugin,
    };
    use mocksmith_rule_store::MemoryStore;

    use super::*;

    fn simple_rule(unique_key: &str, path: &str, body: &str) -> MockApi {
        MockApi {
            unique_key: unique_key.to_string(),
            path: path.to_string(),
            cases: vec![Case {
                condition: None,
                response: Some(ResponseSpec::Simple(SimpleResponse {
                    code: 200,
                    body: body.to_string(),
                    ..Default::default()
                })),
            }],
            ..Default::default()
        }
    }

    fn http_request(path: &str, header: &[(&str, &str)]) -> Request {
        Request {
            protocol: Protocol::Http,
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: path.to_string(),
            header: header
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Body::default(),
        }
    }

    fn default_registry() -> Arc<RuleRegistry> {
        let mut plugins = PluginRegistry::new();
        plugins.register_match_plugin(Arc::new(SimplePlugin::new()));
        plugins.register_mock_plugin(Arc::new(SimplePlugin::new()));
        RuleRegistry::new(Arc::new(MemoryStore::new()), Arc::new(plugins))
    }

    #[tokio::test]
    async fn save_records_and_routes() {
        let registry = default_registry();
        registry.save(simple_rule("h1", "/greet", "hi")).await.unwrap();

        let matched = registry.match_rule("example.com", "/greet", "GET").unwrap();
        assert_eq!(matched.unique_key, "h1");

        let response = registry
            .mock_response(&http_request("/greet", &[]))
            .await
            .unwrap();
        assert_eq!(response.code, 200);
        assert_eq!(response.body.as_bytes(), b"hi");
    }

    #[tokio::test]
    async fn save_rejects_invalid_rules() {
        let registry = default_registry();
        let err = registry.save(MockApi::default()).await.unwrap_err();
        assert!(matches!(err, MockError::BadRule(_)));
        assert_eq!(err.grpc_code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn latest_save_per_key_wins() {
        let registry = default_registry();
        registry.save(simple_rule("h1", "/greet", "one")).await.unwrap();
        registry.save(simple_rule("h1", "/greet", "two")).await.unwrap();

        let listed = registry.list("", Pagination::default());
        assert_eq!(listed.len(), 1);
        let response = registry
            .mock_response(&http_request("/greet", &[]))
            .await
            .unwrap();
        assert_eq!(response.body.as_bytes(), b"two");
    }

    #[tokio::test]
    async fn delete_unroutes_the_rule() {
        let registry = default_registry();
        registry.save(simple_rule("h1", "/greet", "hi")).await.unwrap();
        registry.delete("h1").await.unwrap();
        assert!(registry.match_rule("example.com", "/greet", "GET").is_none());
        let err = registry
            .mock_response(&http_request("/greet", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::NoRuleMatched(_)));
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let registry = default_registry();
        for key in ["b2", "a1", "b1", "a2"] {
            registry
                .save(simple_rule(key, &format!("/{key}"), "x"))
                .await
                .unwrap();
        }

        let page = registry.list("a", Pagination::new(1, 1));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].unique_key, "a1");

        let page = registry.list("a", Pagination::new(2, 1));
        assert_eq!(page[0].unique_key, "a2");

        assert!(registry.list("a", Pagination::new(3, 1)).is_empty());

        let all = registry.list("", Pagination::default());
        let keys: Vec<_> = all.iter().map(|api| api.unique_key.as_str()).collect();
        assert_eq!(keys, ["a1", "a2", "b1", "b2"]);
    }

    #[tokio::test]
    async fn first_matching_case_wins_in_declaration_order() {
        let registry = default_registry();
        let condition = |threshold: &str| {
            Some(Condition::Simple(SimpleCondition {
                use_or_among_items: false,
                items: vec![ConditionItem {
                    operand_x: "$request.header.uid".to_string(),
                    operator: ">=".to_string(),
                    operand_y: threshold.to_string(),
                    opposite: false,
                }],
            }))
        };
        let api = MockApi {
            unique_key: "branch".to_string(),
            path: "/branch".to_string(),
            cases: vec![
                Case {
                    condition: condition("5"),
                    response: Some(ResponseSpec::Simple(SimpleResponse {
                        code: 200,
                        body: "big".to_string(),
                        ..Default::default()
                    })),
                },
                Case {
                    condition: None,
                    response: Some(ResponseSpec::Simple(SimpleResponse {
                        code: 200,
                        body: "small".to_string(),
                        ..Default::default()
                    })),
                },
            ],
            ..Default::default()
        };
        registry.save(api).await.unwrap();

        let big = registry
            .mock_response(&http_request("/branch", &[("uid", "10")]))
            .await
            .unwrap();
        assert_eq!(big.body.as_bytes(), b"big");

        let small = registry
            .mock_response(&http_request("/branch", &[("uid", "2")]))
            .await
            .unwrap();
        assert_eq!(small.body.as_bytes(), b"small");
    }

    #[tokio::test]
    async fn no_case_matched_is_not_found() {
        let registry = default_registry();
        let api = MockApi {
            unique_key: "strict".to_string(),
            path: "/strict".to_string(),
            cases: vec![Case {
                condition: Some(Condition::Simple(SimpleCondition {
                    use_or_among_items: false,
                    items: vec![ConditionItem {
                        operand_x: "$request.header.uid".to_string(),
                        operator: "=".to_string(),
                        operand_y: "owner".to_string(),
                        opposite: false,
                    }],
                })),
                response: None,
            }],
            ..Default::default()
        };
        registry.save(api).await.unwrap();

        let err = registry
            .mock_response(&http_request("/strict", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::NoCaseMatched));
        assert_eq!(err.grpc_code(), Code::NotFound);
    }

    struct ScriptedMock {
        name: &'static str,
        body: &'static str,
        abort: bool,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedMock {
        fn new(name: &'static str, body: &'static str, abort: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                body,
                abort,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MockPlugin for ScriptedMock {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn mock_response(
            &self,
            _spec: Option<&ResponseSpec>,
            _request: &Request,
            response: &mut Response,
        ) -> Result<bool, PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PluginError::Script("boom".to_string()));
            }
            response.body = Body::new(self.body.as_bytes().to_vec());
            Ok(self.abort)
        }
    }

    struct AlwaysMatch;

    #[async_trait]
    impl MatchPlugin for AlwaysMatch {
        fn name(&self) -> &'static str {
            "always"
        }

        async fn matches(
            &self,
            _request: &Request,
            _condition: &Condition,
        ) -> Result<bool, PluginError> {
            Ok(true)
        }
    }

    fn registry_with_mocks(mocks: Vec<Arc<ScriptedMock>>) -> Arc<RuleRegistry> {
        let mut plugins = PluginRegistry::new();
        plugins.register_match_plugin(Arc::new(AlwaysMatch));
        for mock in mocks {
            plugins.register_mock_plugin(mock);
        }
        RuleRegistry::new(Arc::new(MemoryStore::new()), Arc::new(plugins))
    }

    #[tokio::test]
    async fn aborting_plugin_ends_the_chain() {
        let first = ScriptedMock::new("first", "from-first", true, false);
        let second = ScriptedMock::new("second", "from-second", false, false);
        let registry = registry_with_mocks(vec![Arc::clone(&first), Arc::clone(&second)]);
        registry.save(simple_rule("r", "/r", "unused")).await.unwrap();

        let response = registry
            .mock_response(&http_request("/r", &[]))
            .await
            .unwrap();
        assert_eq!(response.body.as_bytes(), b"from-first");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plugins_run_in_registration_order() {
        let first = ScriptedMock::new("first", "from-first", false, false);
        let second = ScriptedMock::new("second", "from-second", false, false);
        let registry = registry_with_mocks(vec![first, second]);
        registry.save(simple_rule("r", "/r", "unused")).await.unwrap();

        let response = registry
            .mock_response(&http_request("/r", &[]))
            .await
            .unwrap();
        assert_eq!(response.body.as_bytes(), b"from-second");
    }

    #[tokio::test]
    async fn plugin_failure_is_tagged_with_its_name() {
        let failing = ScriptedMock::new("exploder", "", false, true);
        let registry = registry_with_mocks(vec![failing]);
        registry.save(simple_rule("r", "/r", "unused")).await.unwrap();

        let err = registry
            .mock_response(&http_request("/r", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "plugin(exploder): script error: boom");
        assert_eq!(err.grpc_code(), Code::Internal);
    }

    #[tokio::test]
    async fn announcement_reconciles_out_of_band_writes() {
        let store = Arc::new(MemoryStore::new());
        let mut plugins = PluginRegistry::new();
        plugins.register_match_plugin(Arc::new(SimplePlugin::new()));
        plugins.register_mock_plugin(Arc::new(SimplePlugin::new()));
        let registry = RuleRegistry::new(Arc::clone(&store) as Arc<dyn RuleStore>, Arc::new(plugins));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        registry.start(shutdown_rx).await.unwrap();

        // Write to the store directly, bypassing the registry; the store's
        // own announcement must bring the rule in.
        let rule = simple_rule("side-loaded", "/side", "ok");
        store
            .set(&rule.unique_key, &serde_json::to_string(&rule).unwrap())
            .await
            .unwrap();

        let mut found = false;
        for _ in 0..50 {
            if registry.match_rule("example.com", "/side", "GET").is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(found, "registry never observed the side-loaded rule");
    }

    #[tokio::test]
    async fn concurrent_matches_never_see_a_half_built_router() {
        let registry = default_registry();
        registry.save(simple_rule("h1", "/stable", "hi")).await.unwrap();

        let reader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..500 {
                    if let Some(api) = registry.match_rule("example.com", "/stable", "GET") {
                        // Whatever snapshot we hit must be complete.
                        assert_eq!(api.unique_key, "h1");
                        assert_eq!(api.cases.len(), 1);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        for i in 0..100 {
            registry
                .save(simple_rule(&format!("churn-{i}"), &format!("/churn/{i}"), "x"))
                .await
                .unwrap();
        }

        reader.await.unwrap();
        assert!(registry.match_rule("example.com", "/stable", "GET").is_some());
    }
}
