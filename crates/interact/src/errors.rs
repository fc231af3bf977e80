use thiserror::Error;
use tonic::{Code, Status};

/// Pipeline error surfaced to the fronts. Each kind maps to a gRPC code; the
/// HTTP front derives its status from that code via [`http_status_from_code`].
#[derive(Clone, Debug, Error)]
pub enum MockError {
    #[error("unable to find mock config of {0}")]
    NoRuleMatched(String),
    #[error("no case matched")]
    NoCaseMatched,
    #[error("invalid rule: {0}")]
    BadRule(String),
    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),
    #[error("plugin({name}): {detail}")]
    Plugin {
        name: String,
        code: Code,
        detail: String,
    },
}

impl MockError {
    pub fn plugin(name: &str, code: Code, detail: impl Into<String>) -> Self {
        Self::Plugin {
            name: name.to_string(),
            code,
            detail: detail.into(),
        }
    }

    pub fn grpc_code(&self) -> Code {
        match self {
            MockError::NoRuleMatched(_) | MockError::NoCaseMatched => Code::NotFound,
            MockError::BadRule(_) => Code::InvalidArgument,
            MockError::StoreUnavailable(_) => Code::Unavailable,
            MockError::Plugin { code, .. } => *code,
        }
    }

    pub fn http_status(&self) -> u16 {
        http_status_from_code(self.grpc_code())
    }

    pub fn to_status(&self) -> Status {
        Status::new(self.grpc_code(), self.to_string())
    }
}

/// Fixed gRPC-to-HTTP status table used by the HTTP-facing surfaces.
pub fn http_status_from_code(code: Code) -> u16 {
    match code {
        Code::Ok => 200,
        Code::InvalidArgument => 400,
        Code::NotFound => 404,
        Code::DeadlineExceeded => 408,
        Code::AlreadyExists => 409,
        Code::PermissionDenied => 403,
        Code::ResourceExhausted => 429,
        Code::FailedPrecondition => 412,
        Code::Aborted => 409,
        Code::OutOfRange => 400,
        Code::Unimplemented => 501,
        Code::Unavailable => 503,
        Code::Unauthenticated => 401,
        _ => 500,
    }
}
