pub mod errors;
pub mod model;

pub use errors::{http_status_from_code, MockError};
pub use model::{Body, Protocol, Request, Response};
