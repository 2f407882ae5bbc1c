// src/core/store/sqlite.rs

//! A SQLite-backed store. Every statement runs on the blocking pool.

use super::ConnectionStore;
use crate::core::errors::UniconError;
use crate::core::model::{Connection, ConnectionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection as Db, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    config TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'disconnected',
    workspace_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const COLUMNS: &str = "id, name, type, config, status, workspace_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Db>>,
}

fn storage(e: impl std::fmt::Display) -> UniconError {
    UniconError::Storage(e.to_string())
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_status(raw: &str) -> ConnectionStatus {
    match raw {
        "connected" => ConnectionStatus::Connected,
        "connecting" => ConnectionStatus::Connecting,
        _ => ConnectionStatus::Disconnected,
    }
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connection> {
    let config: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        protocol_type: row.get(2)?,
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        status: parse_status(&status),
        workspace_id: row.get(5)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UniconError> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || -> Result<Db, UniconError> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(storage)?;
            }
            let db = Db::open(&path).map_err(storage)?;
            db.execute_batch(SCHEMA).map_err(storage)?;
            Ok(db)
        })
        .await
        .map_err(storage)??;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// An in-memory database, for tests.
    pub fn in_memory() -> Result<Self, UniconError> {
        let db = Db::open_in_memory().map_err(storage)?;
        db.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, UniconError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock();
            f(&*guard)
        })
            .await
            .map_err(storage)?
            .map_err(storage)
    }
}

#[async_trait]
impl ConnectionStore for SqliteStore {
    async fn list(&self) -> Result<Vec<Connection>, UniconError> {
        self.blocking(|db| {
            let mut stmt =
                db.prepare(&format!("SELECT {COLUMNS} FROM connections ORDER BY created_at, rowid"))?;
            let rows = stmt.query_map([], row_to_connection)?;
            rows.collect()
        })
        .await
    }

    async fn upsert(&self, connection: Connection) -> Result<(), UniconError> {
        let config = serde_json::to_string(&connection.config).map_err(storage)?;
        self.blocking(move |db| {
            db.execute(
                &format!(
                    "INSERT INTO connections ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name, type = excluded.type,
                     config = excluded.config, status = excluded.status,
                     workspace_id = excluded.workspace_id, updated_at = excluded.updated_at"
                ),
                params![
                    connection.id,
                    connection.name,
                    connection.protocol_type,
                    config,
                    connection.status.to_string(),
                    connection.workspace_id,
                    connection.created_at.to_rfc3339(),
                    connection.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, UniconError> {
        let id = id.to_string();
        self.blocking(move |db| {
            Ok(db.execute("DELETE FROM connections WHERE id = ?1", params![id])? > 0)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Connection>, UniconError> {
        let id = id.to_string();
        self.blocking(move |db| {
            db.query_row(
                &format!("SELECT {COLUMNS} FROM connections WHERE id = ?1"),
                params![id],
                row_to_connection,
            )
            .optional()
        })
        .await
    }

    async fn set_status(&self, id: &str, status: ConnectionStatus) -> Result<(), UniconError> {
        let id = id.to_string();
        self.blocking(move |db| {
            db.execute(
                "UPDATE connections SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.to_string(), Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
        .await
    }
}
