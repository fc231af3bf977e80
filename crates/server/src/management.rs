use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};
use tracing::info_span;

use mocksmith_api::{MockApi, Pagination};
use mocksmith_interact::http_status_from_code;
use mocksmith_rule_registry::RuleRegistry;

use crate::pb;
use crate::pb::mock_client::MockClient;
use crate::pb::mock_server::{Mock, MockServer};

#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("invalid management endpoint: {0}")]
    InvalidEndpoint(String),
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

/// The `Mock` management service: CRUD over rules, backed by the registry.
pub struct ManagementService {
    registry: Arc<RuleRegistry>,
}

impl ManagementService {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl Mock for ManagementService {
    async fn save_mock_api(
        &self,
        request: Request<pb::SaveMockApiRequest>,
    ) -> Result<Response<pb::SaveMockApiResponse>, Status> {
        let Some(data) = request.into_inner().data else {
            return Err(Status::invalid_argument("api is nil"));
        };
        let api: MockApi = data.into();
        self.registry
            .save(api)
            .await
            .map_err(|err| err.to_status())?;
        Ok(Response::new(pb::SaveMockApiResponse {}))
    }

    async fn delete_mock_api(
        &self,
        request: Request<pb::DeleteMockApiRequest>,
    ) -> Result<Response<pb::DeleteMockApiResponse>, Status> {
        let unique_key = request.into_inner().unique_key;
        self.registry
            .delete(&unique_key)
            .await
            .map_err(|err| err.to_status())?;
        Ok(Response::new(pb::DeleteMockApiResponse {}))
    }

    async fn list_mock_api(
        &self,
        request: Request<pb::ListMockApiRequest>,
    ) -> Result<Response<pb::ListMockApiResponse>, Status> {
        let request = request.into_inner();
        let pagination = request
            .pagination
            .map(|options| Pagination::new(options.page, options.limit))
            .unwrap_or_default();
        let data = self
            .registry
            .list(&request.keywords, pagination)
            .into_iter()
            .map(Into::into)
            .collect();
        Ok(Response::new(pb::ListMockApiResponse { data }))
    }
}

/// Serves the management gRPC listener until shutdown flips.
pub async fn serve_grpc(
    addr: SocketAddr,
    registry: Arc<RuleRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ManagementError> {
    tonic::transport::Server::builder()
        .trace_fn(|request| info_span!("management", path = %request.uri().path()))
        .add_service(MockServer::new(ManagementService::new(registry)))
        .serve_with_shutdown(addr, async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

#[derive(Clone)]
struct GatewayState {
    client: MockClient<Channel>,
}

/// REST gateway transcoding JSON to the local management gRPC listener,
/// grpc-gateway style. The connection is lazy so the gateway can come up
/// before (or without) its gRPC peer.
pub fn gateway_router(grpc_endpoint: &str) -> Result<Router, ManagementError> {
    let channel = Endpoint::from_shared(grpc_endpoint.to_string())
        .map_err(|err| ManagementError::InvalidEndpoint(err.to_string()))?
        .connect_lazy();
    let state = GatewayState {
        client: MockClient::new(channel),
    };
    Ok(Router::new()
        .route("/api/v1alpha1/mock/save", post(save_handler))
        .route("/api/v1alpha1/mock/delete", post(delete_handler))
        .route("/api/v1alpha1/mock/list", post(list_handler))
        .with_state(state))
}

#[derive(Deserialize)]
struct SaveBody {
    data: MockApi,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct DeleteBody {
    unique_key: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ListBody {
    keywords: String,
    pagination: Pagination,
}

type GatewayReply = Result<Json<serde_json::Value>, (http::StatusCode, String)>;

fn status_to_reply(status: Status) -> (http::StatusCode, String) {
    let code = http::StatusCode::from_u16(http_status_from_code(status.code()))
        .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
    (code, status.message().to_string())
}

async fn save_handler(State(state): State<GatewayState>, Json(body): Json<SaveBody>) -> GatewayReply {
    let mut client = state.client.clone();
    client
        .save_mock_api(pb::SaveMockApiRequest {
            data: Some(body.data.into()),
        })
        .await
        .map_err(status_to_reply)?;
    Ok(Json(serde_json::json!({})))
}

async fn delete_handler(
    State(state): State<GatewayState>,
    Json(body): Json<DeleteBody>,
) -> GatewayReply {
    let mut client = state.client.clone();
    client
        .delete_mock_api(pb::DeleteMockApiRequest {
            unique_key: body.unique_key,
        })
        .await
        .map_err(status_to_reply)?;
    Ok(Json(serde_json::json!({})))
}

async fn list_handler(State(state): State<GatewayState>, body: Option<Json<ListBody>>) -> GatewayReply {
    let Json(body) = body.unwrap_or_default();
    let mut client = state.client.clone();
    let listed = client
        .list_mock_api(pb::ListMockApiRequest {
            keywords: body.keywords,
            pagination: Some(pb::ListOptions {
                page: body.pagination.page,
                limit: body.pagination.limit,
            }),
        })
        .await
        .map_err(status_to_reply)?
        .into_inner();
    let data: Vec<MockApi> = listed.data.into_iter().map(Into::into).collect();
    Ok(Json(serde_json::json!({ "data": data })))
}

#[cfg(test)]
mod tests {
    use tokio_stream::wrappers::TcpListenerStream;

    use mocksmith_api::{Case, ResponseSpec, SimpleResponse};
    use mocksmith_plugins::{PluginRegistry, SimplePlugin};
    use mocksmith_rule_store::MemoryStore;

    use super::*;

    fn test_registry() -> Arc<RuleRegistry> {
        let mut plugins = PluginRegistry::new();
        plugins.register_match_plugin(Arc::new(SimplePlugin::new()));
        plugins.register_mock_plugin(Arc::new(SimplePlugin::new()));
        RuleRegistry::new(Arc::new(MemoryStore::new()), Arc::new(plugins))
    }

    fn rule(unique_key: &str) -> pb::MockApi {
        pb::MockApi {
            unique_key: unique_key.to_string(),
            path: format!("/{unique_key}"),
            cases: vec![Case {
                condition: None,
                response: Some(ResponseSpec::Simple(SimpleResponse {
                    code: 200,
                    body: "ok".to_string(),
                    ..Default::default()
                })),
            }
            .into()],
            ..Default::default()
        }
    }

    async fn spawn_grpc(registry: Arc<RuleRegistry>) -> (MockClient<Channel>, tokio::sync::oneshot::Sender<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(MockServer::new(ManagementService::new(registry)))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        let channel = Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect()
            .await
            .unwrap();
        (MockClient::new(channel), tx)
    }

    #[tokio::test]
    async fn save_list_delete_round_trip() {
        let registry = test_registry();
        let (mut client, shutdown) = spawn_grpc(Arc::clone(&registry)).await;

        for key in ["a1", "a2", "b1"] {
            client
                .save_mock_api(pb::SaveMockApiRequest {
                    data: Some(rule(key)),
                })
                .await
                .unwrap();
        }

        let listed = client
            .list_mock_api(pb::ListMockApiRequest {
                keywords: "a".to_string(),
                pagination: Some(pb::ListOptions { page: 1, limit: 1 }),
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.data.len(), 1);
        assert_eq!(listed.data[0].unique_key, "a1");

        client
            .delete_mock_api(pb::DeleteMockApiRequest {
                unique_key: "a1".to_string(),
            })
            .await
            .unwrap();
        assert!(registry.match_rule("", "/a1", "GET").is_none());
        assert!(registry.match_rule("", "/a2", "GET").is_some());

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn missing_data_is_invalid_argument() {
        let registry = test_registry();
        let (mut client, shutdown) = spawn_grpc(registry).await;

        let err = client
            .save_mock_api(pb::SaveMockApiRequest { data: None })
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let err = client
            .save_mock_api(pb::SaveMockApiRequest {
                data: Some(pb::MockApi::default()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn gateway_transcodes_to_the_grpc_listener() {
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        let registry = test_registry();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                tonic::transport::Server::builder()
                    .add_service(MockServer::new(ManagementService::new(registry)))
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                        let _ = rx.await;
                    })
                    .await
                    .unwrap();
            });
        }

        let gateway = gateway_router(&format!("http://{addr}")).unwrap();
        let save = http::Request::builder()
            .method("POST")
            .uri("/api/v1alpha1/mock/save")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                r#"{"data":{"uniqueKey":"g1","path":"/g1","cases":[{"response":{"simple":{"code":200,"body":"ok"}}}]}}"#,
            ))
            .unwrap();
        let response = gateway.clone().oneshot(save).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert!(registry.match_rule("", "/g1", "GET").is_some());

        let list = http::Request::builder()
            .method("POST")
            .uri("/api/v1alpha1/mock/list")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"keywords":"g"}"#))
            .unwrap();
        let response = gateway.oneshot(list).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["data"][0]["uniqueKey"], "g1");

        let _ = tx.send(());
    }
}
