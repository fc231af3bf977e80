use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use prost_reflect::MethodDescriptor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use mocksmith_plugins::{
    GrpcMockPlugin, HttpMockPlugin, MethodLookup, PluginRegistry, ScriptPlugin, SimplePlugin,
};
use mocksmith_proto_catalog::{CatalogConfig, ProtoCatalog};
use mocksmith_rule_registry::RuleRegistry;
use mocksmith_rule_store::{MemoryStore, RuleStore};
use mocksmith_server::pb::mock_client::MockClient;
use mocksmith_server::pb::SaveMockApiRequest;
use mocksmith_server::{grpc, http, management};

use crate::config::Config;

/// Breaks the cycle between the gRPC mock server (catalog owner) and the
/// re-encoder plugin: only the method lookup crosses the boundary.
struct CatalogLookup(Arc<ProtoCatalog>);

impl MethodLookup for CatalogLookup {
    fn method(&self, grpc_path: &str) -> Option<MethodDescriptor> {
        self.0.get_method(grpc_path)
    }
}

pub async fn serve(config: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("* start to create rule store");
    let store: Arc<dyn RuleStore> = Arc::new(MemoryStore::with_prefix(&config.storage.prefix));

    info!("* start to create proto catalog");
    let catalog = if config.grpc_mock_server.enable {
        let proto = &config.grpc_mock_server.proto_manager;
        let catalog = ProtoCatalog::new(CatalogConfig {
            proto_dir: proto.proto_dir.clone(),
            proto_import_paths: proto.proto_import_paths.clone(),
            synchronization: proto.synchronization.clone(),
        })
        .await
        .context("failed to create proto catalog")?;
        catalog.start(shutdown_rx.clone());
        Some(catalog)
    } else {
        None
    };

    info!("* start to register plugins");
    let mut plugins = PluginRegistry::new();
    plugins.register_match_plugin(Arc::new(SimplePlugin::new()));
    plugins.register_match_plugin(Arc::new(ScriptPlugin::new()));
    plugins.register_mock_plugin(Arc::new(SimplePlugin::new()));
    plugins.register_mock_plugin(Arc::new(ScriptPlugin::new()));
    if let Some(catalog) = &catalog {
        plugins.register_mock_plugin(Arc::new(GrpcMockPlugin::new(Arc::new(CatalogLookup(
            Arc::clone(catalog),
        )))));
    }
    plugins.register_mock_plugin(Arc::new(HttpMockPlugin::new()));

    info!("* start to create rule registry");
    let registry = RuleRegistry::new(store, Arc::new(plugins));
    registry
        .start(shutdown_rx.clone())
        .await
        .context("failed to load rules from storage")?;

    let mut servers: Vec<(&'static str, JoinHandle<Result<()>>)> = Vec::new();

    if config.http_mock_server.enable {
        let app = http::router(Arc::clone(&registry));
        let handle = spawn_http_server(
            "http mock server",
            &config.http_mock_server.address,
            app,
            shutdown_rx.clone(),
        )
        .await?;
        servers.push(("http mock server", handle));
    }

    if let Some(catalog) = &catalog {
        let app = grpc::router(Arc::clone(&registry), Arc::clone(catalog));
        let handle = spawn_http_server(
            "gRPC mock server",
            &config.grpc_mock_server.address,
            app,
            shutdown_rx.clone(),
        )
        .await?;
        servers.push(("gRPC mock server", handle));
    }

    if !config.api_manager.grpc_address.is_empty() {
        let addr: SocketAddr = config
            .api_manager
            .grpc_address
            .parse()
            .context("invalid management gRPC address")?;
        info!(%addr, "starting api manager gRPC listener");
        let registry = Arc::clone(&registry);
        let shutdown = shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            management::serve_grpc(addr, registry, shutdown)
                .await
                .context("management gRPC server failed")
        });
        servers.push(("management gRPC server", handle));
    }

    if !config.api_manager.http_address.is_empty() {
        // The gateway transcodes onto the local gRPC listener, so it cannot
        // stand alone.
        anyhow::ensure!(
            !config.api_manager.grpc_address.is_empty(),
            "the management http gateway requires the management gRPC listener"
        );
        let endpoint = format!("http://{}", loopback_endpoint(&config.api_manager.grpc_address));
        let app = management::gateway_router(&endpoint)?;
        let handle = spawn_http_server(
            "management http gateway",
            &config.api_manager.http_address,
            app,
            shutdown_rx.clone(),
        )
        .await?;
        servers.push(("management http gateway", handle));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining servers");
    let _ = shutdown_tx.send(true);

    for (name, handle) in servers {
        match handle.await {
            Ok(Ok(())) => info!("{name} stopped"),
            Ok(Err(err)) => return Err(err),
            Err(err) => anyhow::bail!("{name} task panicked: {err}"),
        }
    }
    Ok(())
}

pub async fn load(file: &Path, address: &str) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read rule file {}", file.display()))?;
    let rules = mocksmith_api::rulefile::parse_documents(&input)?;

    let channel = tonic::transport::Endpoint::from_shared(address.to_string())
        .context("invalid management endpoint")?
        .connect()
        .await
        .context("failed to connect to the management endpoint")?;
    let mut client = MockClient::new(channel);

    let total = rules.len();
    for rule in rules {
        info!(uniqueKey = %rule.unique_key, "saving rule");
        client
            .save_mock_api(SaveMockApiRequest {
                data: Some(rule.into()),
            })
            .await
            .map_err(|status| anyhow::anyhow!("save failed: {}", status.message()))?;
    }
    info!(total, "rules loaded");
    Ok(())
}

async fn spawn_http_server(
    name: &'static str,
    address: &str,
    app: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<Result<()>>> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {name} on {address}"))?;
    info!(%address, "starting {name}");
    Ok(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .with_context(|| format!("{name} failed"))
    }))
}

/// The gateway dials the local management listener; a wildcard bind
/// address is not dialable, so it is rewritten to loopback.
fn loopback_endpoint(bind_address: &str) -> String {
    match bind_address.rsplit_once(':') {
        Some(("0.0.0.0" | "[::]" | "", port)) => format!("127.0.0.1:{port}"),
        _ => bind_address.to_string(),
    }
}
