use std::sync::Arc;

use async_trait::async_trait;
use prost::Message as _;
use prost_reflect::{DynamicMessage, MethodDescriptor};

use mocksmith_api::ResponseSpec;
use mocksmith_interact::{Body, Protocol, Request, Response};

use crate::{MockPlugin, PluginError};

/// The capability the re-encoder needs from the proto catalog; injecting
/// only the lookup keeps the plugin decoupled from the catalog itself.
pub trait MethodLookup: Send + Sync {
    fn method(&self, grpc_path: &str) -> Option<MethodDescriptor>;
}

/// Re-encodes the accumulated JSON body into the binary wire format of the
/// matched method's output message. Must run after the responders so their
/// JSON output is its input.
pub struct GrpcMockPlugin {
    lookup: Arc<dyn MethodLookup>,
}

impl GrpcMockPlugin {
    pub fn new(lookup: Arc<dyn MethodLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl MockPlugin for GrpcMockPlugin {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn mock_response(
        &self,
        _spec: Option<&ResponseSpec>,
        request: &Request,
        response: &mut Response,
    ) -> Result<bool, PluginError> {
        if request.protocol != Protocol::Grpc {
            return Ok(false);
        }
        let method = self
            .lookup
            .method(&request.path)
            .ok_or_else(|| PluginError::DescriptorMissing(request.path.clone()))?;
        let mut deserializer = serde_json::Deserializer::from_slice(response.body.as_bytes());
        let message = DynamicMessage::deserialize(method.output(), &mut deserializer)
            .map_err(|err| PluginError::Unmarshal(err.to_string()))?;
        response.body = Body::from(message.encode_to_vec());
        Ok(false)
    }
}
