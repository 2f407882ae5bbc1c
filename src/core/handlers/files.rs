// src/core/handlers/files.rs

//! The file operation set shared by `sftp`, `ftp` and `localfs`.

use super::params;
use crate::core::errors::UniconError;
use crate::core::protocol::{EntryKind, RemoteEntry};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};

pub const FILE_OPERATIONS: &[&str] = &["list", "mkdir", "rename", "remove", "upload", "download"];

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PathParams {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameParams {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub path: String,
    pub base64: String,
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

impl UploadParams {
    pub fn decode(&self) -> Result<Vec<u8>, UniconError> {
        if self.base64.is_empty() {
            return Err(UniconError::params("base64 required"));
        }
        Ok(STANDARD.decode(self.base64.trim())?)
    }
}

/// The listing row every file-like handler returns.
pub fn entry_json(entry: &RemoteEntry) -> Value {
    let is_dir = entry.kind == EntryKind::Directory;
    json!({
        "name": entry.name,
        "size": entry.size,
        "modifiedAt": entry.modified.map(|t| t.to_rfc3339()),
        "isDirectory": is_dir,
        "type": match entry.kind {
            EntryKind::Directory => "d",
            EntryKind::Symlink => "l",
            EntryKind::File | EntryKind::Other => "f",
        },
    })
}

pub fn download_json(content: &[u8]) -> Value {
    json!({ "base64": STANDARD.encode(content), "size": content.len() })
}

/// The six primitives a file-like transport provides.
#[async_trait]
pub trait FileTransport: Send {
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, UniconError>;
    async fn mkdir(&mut self, path: &str) -> Result<(), UniconError>;
    async fn rename(&mut self, from: &str, to: &str) -> Result<(), UniconError>;
    /// Removes a file, falling back to an (empty) directory.
    async fn remove(&mut self, path: &str) -> Result<(), UniconError>;
    async fn upload(&mut self, path: &str, content: &[u8], overwrite: bool) -> Result<(), UniconError>;
    async fn download(&mut self, path: &str) -> Result<Vec<u8>, UniconError>;
}

/// Dispatches one of [`FILE_OPERATIONS`] onto a transport.
pub async fn dispatch<T: FileTransport + ?Sized>(
    transport: &mut T,
    operation: &str,
    params: Value,
) -> Result<Value, UniconError> {
    match operation {
        "list" => {
            let p: ListParams = params::parse(operation, params)?;
            let entries = transport.list(&p.path).await?;
            Ok(Value::Array(entries.iter().map(entry_json).collect()))
        }
        "mkdir" => {
            let p: PathParams = params::parse(operation, params)?;
            transport.mkdir(&p.path).await?;
            Ok(json!({ "path": p.path }))
        }
        "rename" => {
            let p: RenameParams = params::parse(operation, params)?;
            transport.rename(&p.from, &p.to).await?;
            Ok(json!({ "from": p.from, "to": p.to }))
        }
        "remove" => {
            let p: PathParams = params::parse(operation, params)?;
            transport.remove(&p.path).await?;
            Ok(json!({ "path": p.path }))
        }
        "upload" => {
            let p: UploadParams = params::parse(operation, params)?;
            let content = p.decode()?;
            transport.upload(&p.path, &content, p.overwrite).await?;
            Ok(json!({ "path": p.path, "size": content.len() }))
        }
        "download" => {
            let p: PathParams = params::parse(operation, params)?;
            let content = transport.download(&p.path).await?;
            Ok(download_json(&content))
        }
        other => Err(UniconError::params(format!("'{other}' is not a file operation"))),
    }
}
