// src/core/handlers/ftp.rs

//! FTP handler (passive mode only) over the shared file operation set.

use super::files::{self, FILE_OPERATIONS, FileTransport};
use super::{HandlerContext, ProtocolHandler};
use crate::core::errors::UniconError;
use crate::core::protocol::RemoteEntry;
use crate::core::protocol::ftp::FtpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

pub const OPERATIONS: &[&str] = FILE_OPERATIONS;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FtpConfig {
    #[serde(default)]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_user", alias = "username")]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_port() -> u16 {
    21
}

fn default_user() -> String {
    "anonymous".to_string()
}

fn default_timeout_ms() -> u64 {
    15_000
}

#[async_trait]
impl FileTransport for FtpClient {
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, UniconError> {
        let mut entries = FtpClient::list(self, path).await?;
        entries.retain(|e| e.name != "." && e.name != "..");
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), UniconError> {
        self.ensure_dir(path).await
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), UniconError> {
        FtpClient::rename(self, from, to).await
    }

    async fn remove(&mut self, path: &str) -> Result<(), UniconError> {
        match self.delete(path).await {
            Ok(()) => Ok(()),
            Err(file_error) => {
                debug!("FTP DELE {} failed ({}); trying RMD", path, file_error);
                self.remove_dir(path).await.map_err(|_| file_error)
            }
        }
    }

    async fn upload(&mut self, path: &str, content: &[u8], overwrite: bool) -> Result<(), UniconError> {
        if !overwrite && self.command(&format!("SIZE {path}")).await?.code == 213 {
            return Err(UniconError::Remote {
                message: format!("FTP upload refused: {path} already exists"),
                detail: json!({ "path": path }),
            });
        }
        self.store(path, content).await
    }

    async fn download(&mut self, path: &str) -> Result<Vec<u8>, UniconError> {
        self.retrieve(path).await
    }
}

pub struct FtpHandler {
    ctx: HandlerContext,
    client: Option<FtpClient>,
}

impl FtpHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, client: None }
    }
}

#[async_trait]
impl ProtocolHandler for FtpHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: FtpConfig = self.ctx.parse_config()?;
        if config.host.trim().is_empty() {
            return Err(UniconError::InvalidConfig("host is required".into()));
        }
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let mut client = FtpClient::connect(config.host.trim(), config.port, timeout).await?;
        client.login(&config.user, &config.password).await?;
        let cwd = client.pwd().await?;
        info!("FTP logged in to {}:{} as {}", config.host, config.port, config.user);
        self.client = Some(client);
        Ok(json!({ "host": config.host, "port": config.port, "cwd": cwd }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        match self.client.take() {
            Some(client) => client.quit().await,
            None => Ok(()),
        }
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| UniconError::NotConnected("FTP".into()))?;
        files::dispatch(client, operation, params).await
    }
}
