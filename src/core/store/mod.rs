// src/core/store/mod.rs

//! Durable storage for connection records.
//!
//! The router never holds connection records in memory beyond a single call;
//! every read goes through a [`ConnectionStore`].

mod file;
mod memory;
mod sqlite;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::core::errors::UniconError;
use crate::core::model::{Connection, ConnectionStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Persistence for connection records.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Every record, in creation order.
    async fn list(&self) -> Result<Vec<Connection>, UniconError>;

    /// Inserts or replaces a record by id.
    async fn upsert(&self, connection: Connection) -> Result<(), UniconError>;

    /// Removes a record. Returns false when the id was unknown.
    async fn delete(&self, id: &str) -> Result<bool, UniconError>;

    async fn get(&self, id: &str) -> Result<Option<Connection>, UniconError> {
        Ok(self.list().await?.into_iter().find(|c| c.id == id))
    }

    /// Updates only the status and `updatedAt` of a record. Unknown ids are
    /// ignored.
    async fn set_status(&self, id: &str, status: ConnectionStatus) -> Result<(), UniconError> {
        if let Some(mut connection) = self.get(id).await? {
            connection.status = status;
            connection.updated_at = Utc::now();
            self.upsert(connection).await?;
        }
        Ok(())
    }
}

/// Which store implementation to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

/// Opens the configured store. File-backed stores create their parent
/// directories on first use.
pub async fn open_store(
    backend: StoreBackend,
    path: &Path,
) -> Result<Arc<dyn ConnectionStore>, UniconError> {
    let store: Arc<dyn ConnectionStore> = match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(JsonFileStore::open(path).await?),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(path).await?),
    };
    Ok(store)
}
