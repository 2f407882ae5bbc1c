// src/core/store/memory.rs

use super::ConnectionStore;
use crate::core::errors::UniconError;
use crate::core::model::Connection;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

/// A volatile store. Used by tests and by `backend = "memory"`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<IndexMap<String, Connection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Connection>, UniconError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn upsert(&self, connection: Connection) -> Result<(), UniconError> {
        self.records
            .write()
            .insert(connection.id.clone(), connection);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, UniconError> {
        Ok(self.records.write().shift_remove(id).is_some())
    }

    async fn get(&self, id: &str) -> Result<Option<Connection>, UniconError> {
        Ok(self.records.read().get(id).cloned())
    }
}
