use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{RuleStore, StoreError};

const DEFAULT_PREFIX: &str = "/mocksmith/";
const ANNOUNCE_CAPACITY: usize = 16;

/// In-memory rule store, the default fallback backend. Every write emits
/// one announcement.
pub struct MemoryStore {
    prefix: String,
    data: RwLock<HashMap<String, String>>,
    announce: broadcast::Sender<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let (announce, _) = broadcast::channel(ANNOUNCE_CAPACITY);
        Self {
            prefix: prefix.into(),
            data: RwLock::new(HashMap::new()),
            announce,
        }
    }

    fn notify(&self) {
        // No receiver yet is fine; the initial load reads everything anyway.
        let _ = self.announce.send(());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let actual_key = format!("{}{}", self.prefix, key);
        debug!(key = %actual_key, "memory storage set key");
        self.data.write().insert(actual_key, value.to_string());
        self.notify();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let actual_key = format!("{}{}", self.prefix, key);
        debug!(key = %actual_key, "memory storage delete key");
        self.data.write().remove(&actual_key);
        self.notify();
        Ok(())
    }

    async fn list(&self) -> Result<HashMap<String, String>, StoreError> {
        let data = self.data.read();
        Ok(data
            .iter()
            .map(|(key, value)| {
                let key = key.strip_prefix(&self.prefix).unwrap_or(key);
                (key.to_string(), value.clone())
            })
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.announce.subscribe()
    }
}
