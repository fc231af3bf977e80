use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::StatusCode;
use tracing::{info, warn};

use mocksmith_interact::{self as interact, MockError, Protocol};
use mocksmith_rule_registry::RuleRegistry;

/// Generic mock front: any path, any method. Terminates HTTP, lifts the
/// request into the pipeline, and writes the synthesized response back.
pub fn router(registry: Arc<RuleRegistry>) -> Router {
    Router::new().fallback(handle_mock).with_state(registry)
}

async fn handle_mock(State(registry): State<Arc<RuleRegistry>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    info!(
        path = %parts.uri.path(),
        method = %parts.method,
        "request received"
    );

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to read body: {err}"),
            )
        }
    };

    let host = parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| parts.uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default();

    let request = interact::Request {
        protocol: Protocol::Http,
        method: parts.method.as_str().to_string(),
        host,
        path: parts.uri.path().to_string(),
        header: first_value_headers(&parts.headers),
        body: interact::Body::from(bytes),
    };

    match registry.mock_response(&request).await {
        Ok(response) => write_response(response),
        Err(err) => error_response(&err),
    }
}

/// Lowercased keys, first value wins on duplicates.
pub(crate) fn first_value_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(headers.keys_len());
    for key in headers.keys() {
        if let Some(value) = headers.get(key).and_then(|value| value.to_str().ok()) {
            out.entry(key.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    out
}

fn write_response(response: interact::Response) -> Response {
    let mut out = Response::new(Body::from(response.body.into_bytes()));
    // Codes outside [100, 999] (notably the HTTP "unset" sentinel) leave the
    // default 200 in place.
    if (100..=999).contains(&response.code) {
        if let Ok(status) = StatusCode::from_u16(response.code as u16) {
            *out.status_mut() = status;
        }
    }
    let headers = out.headers_mut();
    for (key, value) in &response.header {
        match (
            HeaderName::try_from(key.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(key, "dropping unwritable response header"),
        }
    }
    out
}

fn error_response(err: &MockError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    plain_response(status, err.to_string())
}

fn plain_response(status: StatusCode, body: String) -> Response {
    let mut out = Response::new(Body::from(body));
    *out.status_mut() = status;
    out
}
