mod catalog;
mod sync;

pub use catalog::{grpc_path, CatalogConfig, CatalogError, ProtoCatalog};
pub use sync::{Repository, SyncConfig};
