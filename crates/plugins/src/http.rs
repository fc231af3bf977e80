use async_trait::async_trait;

use mocksmith_api::ResponseSpec;
use mocksmith_interact::{Protocol, Request, Response};

use crate::{MockPlugin, PluginError};

/// Decorates HTTP responses with `content-type: application/json`.
/// Registered after the responders.
#[derive(Default)]
pub struct HttpMockPlugin;

impl HttpMockPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MockPlugin for HttpMockPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn mock_response(
        &self,
        _spec: Option<&ResponseSpec>,
        request: &Request,
        response: &mut Response,
    ) -> Result<bool, PluginError> {
        if request.protocol != Protocol::Http {
            return Ok(false);
        }
        response
            .header
            .insert("content-type".to_string(), "application/json".to_string());
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use mocksmith_interact::Body;

    use super::*;

    fn request(protocol: Protocol) -> Request {
        Request {
            protocol,
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: "/greet".to_string(),
            header: HashMap::new(),
            body: Body::default(),
        }
    }

    #[tokio::test]
    async fn sets_content_type_for_http() {
        let plugin = HttpMockPlugin::new();
        let request = request(Protocol::Http);
        let mut response = Response::default_for(&request);
        assert!(!plugin
            .mock_response(None, &request, &mut response)
            .await
            .unwrap());
        assert_eq!(response.header["content-type"], "application/json");
    }

    #[tokio::test]
    async fn leaves_grpc_responses_alone() {
        let plugin = HttpMockPlugin::new();
        let request = request(Protocol::Grpc);
        let mut response = Response::default_for(&request);
        plugin
            .mock_response(None, &request, &mut response)
            .await
            .unwrap();
        assert!(response.header.is_empty());
    }
}
