use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory key/value store served by the inbound router
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<HashMap<String, String>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// Stores `value` under `key`, returning the previous value
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.write().await.insert(key.into(), value.into())
    }

    pub async fn delete(&self, key: &str) -> Option<String> {
        self.entries.write().await.remove(key)
    }

    /// Snapshot of every key currently stored
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
