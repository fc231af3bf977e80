use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use mocksmith_api::MockApi;

/// Compiled, read-only routing table over the rule set, keyed by path.
///
/// The underlying matcher does not support deletion, so the router is
/// rebuilt wholesale and swapped on every rule change. Each path pattern
/// holds its candidate rules in uniqueKey order; host/method constraints
/// filter candidates and the first survivor wins, so for any
/// (host, path, method) at most one rule matches.
pub struct RuleRouter {
    inner: matchit::Router<Vec<RouteEntry>>,
}

struct RouteEntry {
    name: String,
    host: Option<String>,
    method: Option<String>,
}

impl RuleRouter {
    pub fn empty() -> Self {
        Self {
            inner: matchit::Router::new(),
        }
    }

    pub fn build(rules: &HashMap<String, MockApi>) -> Self {
        let mut grouped: BTreeMap<&str, Vec<RouteEntry>> = BTreeMap::new();
        let mut ordered: Vec<&MockApi> = rules.values().collect();
        ordered.sort_by(|a, b| a.unique_key.cmp(&b.unique_key));

        for api in ordered {
            if let Err(err) = api.validate() {
                warn!(uniqueKey = %api.unique_key, %err, "skipping rule while building router");
                continue;
            }
            grouped.entry(&api.path).or_default().push(RouteEntry {
                name: api.unique_key.clone(),
                host: none_if_empty(&api.host),
                method: none_if_empty(&api.method),
            });
        }

        let mut inner = matchit::Router::new();
        for (path, entries) in grouped {
            if let Err(err) = inner.insert(path, entries) {
                warn!(path, %err, "failed to register route");
            }
        }
        Self { inner }
    }

    /// Resolves (host, path, method) to the uniqueKey of the matching rule.
    pub fn find(&self, host: &str, path: &str, method: &str) -> Option<&str> {
        let matched = self.inner.at(path).ok()?;
        matched
            .value
            .iter()
            .find(|entry| {
                entry
                    .host
                    .as_deref()
                    .map_or(true, |constraint| constraint == host)
                    && entry
                        .method
                        .as_deref()
                        .map_or(true, |constraint| constraint.eq_ignore_ascii_case(method))
            })
            .map(|entry| entry.name.as_str())
    }
}

fn none_if_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
