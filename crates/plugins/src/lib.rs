use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tonic::Code;

use mocksmith_api::{Condition, ResponseSpec};
use mocksmith_interact::{Request, Response};

pub mod grpc;
pub mod http;
pub mod render;
pub mod script;
pub mod simple;

pub use grpc::{GrpcMockPlugin, MethodLookup};
pub use http::HttpMockPlugin;
pub use script::ScriptPlugin;
pub use simple::SimplePlugin;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("script evaluation timed out")]
    Timeout,
    #[error("script error: {0}")]
    Script(String),
    #[error("script language {0} is not supported yet")]
    UnsupportedLang(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("unknown operator: {0}")]
    UnknownOperator(String),
    #[error("unable to find descriptor: {0}")]
    DescriptorMissing(String),
    #[error("failed to unmarshal: {0}")]
    Unmarshal(String),
    #[error("failed to marshal: {0}")]
    Marshal(String),
}

impl PluginError {
    /// gRPC code the error surfaces as when wrapped by the pipeline.
    pub fn grpc_code(&self) -> Code {
        match self {
            PluginError::Timeout => Code::DeadlineExceeded,
            _ => Code::Internal,
        }
    }
}

/// Evaluates a condition against a request.
#[async_trait]
pub trait MatchPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns true when the request satisfies the condition. A plugin that
    /// does not handle the condition variant reports false.
    async fn matches(&self, request: &Request, condition: &Condition)
        -> Result<bool, PluginError>;
}

/// Mutates or finalizes a response.
#[async_trait]
pub trait MockPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns true to abort the chain; an error always aborts and is
    /// surfaced by the pipeline tagged with the plugin name.
    async fn mock_response(
        &self,
        spec: Option<&ResponseSpec>,
        request: &Request,
        response: &mut Response,
    ) -> Result<bool, PluginError>;
}

/// Ordered set of plugins, assembled once at startup. Registration order is
/// invocation order.
#[derive(Default)]
pub struct PluginRegistry {
    match_plugins: Vec<Arc<dyn MatchPlugin>>,
    mock_plugins: Vec<Arc<dyn MockPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_match_plugin(&mut self, plugin: Arc<dyn MatchPlugin>) {
        self.match_plugins.push(plugin);
    }

    pub fn register_mock_plugin(&mut self, plugin: Arc<dyn MockPlugin>) {
        self.mock_plugins.push(plugin);
    }

    pub fn match_plugins(&self) -> &[Arc<dyn MatchPlugin>] {
        &self.match_plugins
    }

    pub fn mock_plugins(&self) -> &[Arc<dyn MockPlugin>] {
        &self.mock_plugins
    }
}
