use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Capability interface over pluggable key/value rule backends.
///
/// Keys handed to the store are bare rule uniqueKeys; a backend is free to
/// prepend its own namespace prefix (default `/mocksmith/`) as long as
/// `list` strips it again. Values are JSON-encoded MockAPI rules.
///
/// Change announcements are unit events: consumers re-read everything per
/// event, so a lost or coalesced announcement is recovered by the next one.
/// A clustered backend that cannot watch individual keys can implement the
/// same contract by bumping a `<prefix>__REVISION__` counter on every write
/// and polling it at ~1 Hz, pushing one event whenever the value changes.
#[async_trait]
pub trait RuleStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn list(&self) -> Result<HashMap<String, String>, StoreError>;

    /// Subscribes to change announcements. Lagging receivers are expected;
    /// the channel drops the oldest events when full.
    fn subscribe(&self) -> broadcast::Receiver<()>;
}
