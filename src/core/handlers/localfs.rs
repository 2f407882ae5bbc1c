// src/core/handlers/localfs.rs

//! A file handler confined to one directory on the local machine.

use super::files::{self, FILE_OPERATIONS, FileTransport};
use super::{HandlerContext, ProtocolHandler};
use crate::core::errors::UniconError;
use crate::core::protocol::{EntryKind, RemoteEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

pub const OPERATIONS: &[&str] = FILE_OPERATIONS;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalFsConfig {
    #[serde(default)]
    root: String,
}

/// Resolves `relative` under `root` lexically. `..` may walk back up inside
/// the root but never above it; absolute paths are treated as root-relative.
pub fn confine(root: &Path, relative: &str) -> Result<PathBuf, UniconError> {
    let relative = if relative.is_empty() { "." } else { relative };
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(UniconError::params(format!(
                        "Path escapes root: {relative}"
                    )));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(resolved)
}

pub struct LocalFsHandler {
    ctx: HandlerContext,
    root: Option<PathBuf>,
}

impl LocalFsHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, root: None }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, UniconError> {
        let root = self
            .root
            .as_deref()
            .ok_or_else(|| UniconError::NotConnected("LocalFS".into()))?;
        confine(root, path)
    }
}

#[async_trait]
impl ProtocolHandler for LocalFsHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: LocalFsConfig = self.ctx.parse_config()?;
        if config.root.trim().is_empty() {
            return Err(UniconError::InvalidConfig("localfs root is required".into()));
        }
        let root = PathBuf::from(config.root.trim());
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        info!("LocalFS root {}", root.display());
        let detail = json!({ "root": root.display().to_string() });
        self.root = Some(root);
        Ok(detail)
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.root = None;
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        files::dispatch(self, operation, params).await
    }
}

#[async_trait]
impl FileTransport for LocalFsHandler {
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, UniconError> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            // Follow symlinks for size and mtime; a dangling link still lists.
            let meta = tokio::fs::metadata(entry.path()).await.ok();
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.as_ref().map(|m| m.len()).unwrap_or(0),
                modified: meta
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), UniconError> {
        let dir = self.resolve(path)?;
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), UniconError> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<(), UniconError> {
        let target = self.resolve(path)?;
        if Some(target.as_path()) == self.root.as_deref() {
            return Err(UniconError::params("Refusing to remove the root directory"));
        }
        match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&target).await?,
            Ok(_) => tokio::fs::remove_file(&target).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn upload(&mut self, path: &str, content: &[u8], overwrite: bool) -> Result<(), UniconError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(&target).await?;
        file.write_all(content).await?;
        file.flush().await?;
        Ok(())
    }

    async fn download(&mut self, path: &str) -> Result<Vec<u8>, UniconError> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::read(target).await?)
    }
}
