use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use http_body::Frame;
use prost_reflect::DynamicMessage;
use tonic::Code;
use tracing::{info, warn};

use mocksmith_interact::{self as interact, Protocol};
use mocksmith_proto_catalog::ProtoCatalog;
use mocksmith_rule_registry::RuleRegistry;

use crate::http::first_value_headers;

const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Catch-all unknown-service front speaking the gRPC wire protocol over
/// h2c. Unary semantics only; the request message is decoded through the
/// proto catalog, fed through the pipeline as JSON, and the synthesized
/// body is sent back as one length-prefixed frame followed by trailers.
///
/// The framing is done by hand rather than through a generated service so
/// rule-declared headers, trailers, and raw status codes can all reach the
/// wire, which a typed unary server surface cannot express.
#[derive(Clone)]
pub struct GrpcMockState {
    registry: Arc<RuleRegistry>,
    catalog: Arc<ProtoCatalog>,
}

pub fn router(registry: Arc<RuleRegistry>, catalog: Arc<ProtoCatalog>) -> Router {
    Router::new()
        .fallback(handle_grpc)
        .with_state(GrpcMockState { registry, catalog })
}

async fn handle_grpc(State(state): State<GrpcMockState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    info!(path = %path, "request received");

    let is_grpc = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(GRPC_CONTENT_TYPE));
    if !is_grpc {
        let mut out = Response::new(Body::from("expected a gRPC request"));
        *out.status_mut() = http::StatusCode::UNSUPPORTED_MEDIA_TYPE;
        return out;
    }

    let authority = parts
        .uri
        .authority()
        .map(|authority| authority.to_string())
        .or_else(|| {
            parts
                .headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        })
        .unwrap_or_default();

    let Some(method) = state.catalog.get_method(&path) else {
        return failure(Code::NotFound as u32, "method not found", &HashMap::new(), &HashMap::new());
    };

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return failure(
                Code::Unknown as u32,
                "failed to recv request",
                &HashMap::new(),
                &HashMap::new(),
            )
        }
    };
    let payload = match decode_frame(&bytes) {
        Ok(payload) => payload,
        Err((code, detail)) => return failure(code as u32, detail, &HashMap::new(), &HashMap::new()),
    };

    let message = match DynamicMessage::decode(method.input(), payload) {
        Ok(message) => message,
        Err(_) => {
            return failure(
                Code::Unknown as u32,
                "failed to decode request",
                &HashMap::new(),
                &HashMap::new(),
            )
        }
    };
    let body_json = match serde_json::to_vec(&message) {
        Ok(json) => json,
        Err(_) => {
            return failure(
                Code::Unknown as u32,
                "failed to marshal request",
                &HashMap::new(),
                &HashMap::new(),
            )
        }
    };

    let request = interact::Request {
        protocol: Protocol::Grpc,
        method: "POST".to_string(),
        host: authority,
        path,
        header: first_value_headers(&parts.headers),
        body: interact::Body::from(body_json),
    };

    let response = match state.registry.mock_response(&request).await {
        Ok(response) => response,
        Err(err) => {
            return failure(
                err.grpc_code() as u32,
                &err.to_string(),
                &HashMap::new(),
                &HashMap::new(),
            )
        }
    };

    if response.code != 0 {
        let detail = format!("expected code is: {}", response.code);
        return failure(response.code, &detail, &response.header, &response.trailer);
    }
    success(response)
}

fn success(response: interact::Response) -> Response {
    let mut trailers = HeaderMap::new();
    extend_metadata(&mut trailers, &response.trailer);
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    build(
        &response.header,
        Some(encode_frame(response.body.as_bytes())),
        trailers,
    )
}

fn failure(
    code: u32,
    message: &str,
    header: &HashMap<String, String>,
    trailer: &HashMap<String, String>,
) -> Response {
    let mut trailers = HeaderMap::new();
    extend_metadata(&mut trailers, trailer);
    if let Ok(value) = HeaderValue::from_str(&code.to_string()) {
        trailers.insert("grpc-status", value);
    }
    if !message.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&percent_encode(message)) {
            trailers.insert("grpc-message", value);
        }
    }
    build(header, None, trailers)
}

fn build(header: &HashMap<String, String>, data: Option<Bytes>, trailers: HeaderMap) -> Response {
    let mut out = Response::new(Body::new(GrpcBody {
        data,
        trailers: Some(trailers),
    }));
    let headers = out.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    extend_metadata(headers, header);
    out
}

/// Copies rule-declared metadata into the wire map, leaving the protocol's
/// own keys alone.
fn extend_metadata(target: &mut HeaderMap, source: &HashMap<String, String>) {
    for (key, value) in source {
        let lowered = key.to_ascii_lowercase();
        if lowered == "content-type" || lowered.starts_with("grpc-") {
            warn!(key, "dropping reserved metadata key");
            continue;
        }
        match (
            HeaderName::try_from(lowered.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                target.insert(name, value);
            }
            _ => warn!(key, "dropping unwritable metadata"),
        }
    }
}

/// One unary message out of the length-prefixed gRPC framing.
pub(crate) fn decode_frame(buf: &[u8]) -> Result<Bytes, (Code, &'static str)> {
    if buf.len() < 5 {
        return Err((Code::Internal, "malformed gRPC frame"));
    }
    if buf[0] != 0 {
        return Err((Code::Unimplemented, "compressed request frames are not supported"));
    }
    let declared = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if buf.len() < 5 + declared {
        return Err((Code::Internal, "truncated gRPC frame"));
    }
    Ok(Bytes::copy_from_slice(&buf[5..5 + declared]))
}

pub(crate) fn encode_frame(payload: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(5 + payload.len());
    framed.put_u8(0);
    framed.put_u32(payload.len() as u32);
    framed.put_slice(payload);
    framed.freeze()
}

/// `grpc-message` percent-encoding per the gRPC HTTP/2 spec.
fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// One data frame followed by a trailers frame.
struct GrpcBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl http_body::Body for GrpcBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(data) = this.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        if let Some(trailers) = this.trailers.take() {
            return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
        }
        Poll::Ready(None)
    }
}
