//! crates/quiz_core/src/store.rs
//!
//! A process-local `KeyValueStore`, used when no database is configured and in tests.

use crate::ports::{KeyValueStore, PortResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    slots: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn read(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.slots.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> PortResult<()> {
        self.slots
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
