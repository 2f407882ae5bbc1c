// src/core/store/file.rs

//! A JSON document store: the whole record set lives in one file that is
//! rewritten atomically (temp file + rename) on every change.

use super::ConnectionStore;
use crate::core::errors::UniconError;
use crate::core::model::Connection;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    connections: Vec<Connection>,
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<IndexMap<String, Connection>>,
}

impl JsonFileStore {
    /// Loads `path`, or starts empty when it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UniconError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => IndexMap::new(),
            Ok(bytes) => {
                let document: Document = serde_json::from_slice(&bytes).map_err(|e| {
                    UniconError::Storage(format!("corrupt store '{}': {e}", path.display()))
                })?;
                document
                    .connections
                    .into_iter()
                    .map(|c| (c.id.clone(), c))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store file '{}' not found; starting empty.", path.display());
                IndexMap::new()
            }
            Err(e) => {
                return Err(UniconError::Storage(format!(
                    "failed to read '{}': {e}",
                    path.display()
                )));
            }
        };
        info!(
            "Loaded {} connections from '{}'.",
            records.len(),
            path.display()
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn flush(&self, records: &IndexMap<String, Connection>) -> Result<(), UniconError> {
        let document = Document {
            connections: records.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| UniconError::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UniconError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let temp = self
            .path
            .with_extension(format!("tmp.{}", rand::random::<u32>()));
        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(UniconError::Storage(format!("{}: {e}", temp.display())));
        }
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(UniconError::Storage(format!(
                "failed to replace '{}': {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for JsonFileStore {
    async fn list(&self) -> Result<Vec<Connection>, UniconError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn upsert(&self, connection: Connection) -> Result<(), UniconError> {
        let mut records = self.records.lock().await;
        records.insert(connection.id.clone(), connection);
        self.flush(&records).await
    }

    async fn delete(&self, id: &str) -> Result<bool, UniconError> {
        let mut records = self.records.lock().await;
        if records.shift_remove(id).is_none() {
            return Ok(false);
        }
        self.flush(&records).await?;
        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<Connection>, UniconError> {
        Ok(self.records.lock().await.get(id).cloned())
    }
}
