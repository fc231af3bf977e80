use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire protocol of an incoming request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "GRPC")]
    Grpc,
}

/// Protocol-agnostic request carrier moved through the pipeline.
///
/// Header keys are lowercased and carry the first value seen for a key.
#[derive(Clone, Debug, Serialize)]
pub struct Request {
    pub protocol: Protocol,
    pub method: String,
    pub host: String,
    pub path: String,
    pub header: HashMap<String, String>,
    pub body: Body,
}

/// Response accumulated by the mock plugin chain.
///
/// `code` is a gRPC code for gRPC requests (0 = OK) and an HTTP status for
/// HTTP requests. The HTTP default is the sentinel `1`, which the HTTP front
/// filters out so that a pipeline that never sets a code does not force a
/// status write; the sentinel is never visible to clients.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Response {
    pub code: u32,
    pub header: HashMap<String, String>,
    pub trailer: HashMap<String, String>,
    pub body: Body,
}

impl Response {
    /// Sentinel pre-set for HTTP responses, meaning "do not override status".
    pub const HTTP_CODE_UNSET: u32 = 1;

    /// Pre-sets the protocol-specific default code and empty maps so plugins
    /// can mutate without nil checks.
    pub fn default_for(request: &Request) -> Self {
        let code = match request.protocol {
            Protocol::Grpc => 0,
            Protocol::Http => Self::HTTP_CODE_UNSET,
        };
        Self {
            code,
            header: HashMap::new(),
            trailer: HashMap::new(),
            body: Body::default(),
        }
    }
}

/// Opaque byte container shared by rendered JSON bodies and binary protobuf
/// payloads, exposing JSON marshaling on top of the raw bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Body(Bytes);

impl Body {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON view of the body: `null` when empty, the parsed value when the
    /// bytes are valid JSON, and a lossy UTF-8 string otherwise so that a
    /// binary payload never poisons the marshaling of its whole request.
    pub fn to_json_value(&self) -> serde_json::Value {
        if self.0.is_empty() {
            return serde_json::Value::Null;
        }
        match serde_json::from_slice(&self.0) {
            Ok(value) => value,
            Err(_) => serde_json::Value::String(String::from_utf8_lossy(&self.0).into_owned()),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Self(Bytes::from(data))
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let data = serde_json::to_vec(&value).map_err(serde::de::Error::custom)?;
        Ok(Self(Bytes::from(data)))
    }
}
