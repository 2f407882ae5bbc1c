// src/core/handlers/sftp.rs

//! Standalone SFTP handler: the shared file operation set over an SSH
//! connection's `sftp` subsystem.

use super::files::{self, FILE_OPERATIONS, FileTransport};
use super::ssh::{self, SftpChannel, SshConfig, SshSession};
use super::{HandlerContext, ProtocolHandler};
use crate::core::errors::UniconError;
use crate::core::protocol::RemoteEntry;
use crate::core::protocol::sftp::SftpSession;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

pub const OPERATIONS: &[&str] = FILE_OPERATIONS;

#[async_trait]
impl<S> FileTransport for SftpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, UniconError> {
        let mut entries = self.read_dir(path).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), UniconError> {
        SftpSession::mkdir(self, path).await
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), UniconError> {
        SftpSession::rename(self, from, to).await
    }

    async fn remove(&mut self, path: &str) -> Result<(), UniconError> {
        match SftpSession::remove(self, path).await {
            Ok(()) => Ok(()),
            Err(file_error) => {
                debug!("SFTP remove of {} failed ({}); trying rmdir", path, file_error);
                self.rmdir(path).await.map_err(|_| file_error)
            }
        }
    }

    async fn upload(&mut self, path: &str, content: &[u8], overwrite: bool) -> Result<(), UniconError> {
        self.write_file(path, content, overwrite).await
    }

    async fn download(&mut self, path: &str) -> Result<Vec<u8>, UniconError> {
        self.read_file(path).await
    }
}

pub struct SftpHandler {
    ctx: HandlerContext,
    session: Option<SshSession>,
    sftp: Option<SftpChannel>,
}

impl SftpHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            session: None,
            sftp: None,
        }
    }
}

#[async_trait]
impl ProtocolHandler for SftpHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: SshConfig = self.ctx.parse_config()?;
        let session = ssh::open_session(&config).await?;
        let mut sftp = match tokio::time::timeout(config.timeout(), ssh::open_sftp(&session)).await {
            Ok(Ok(sftp)) => sftp,
            Ok(Err(e)) => {
                ssh::close_session(&session).await;
                return Err(e);
            }
            Err(_) => {
                ssh::close_session(&session).await;
                return Err(UniconError::Timeout("SFTP subsystem did not start in time".into()));
            }
        };
        let home = sftp.realpath(".").await.unwrap_or_else(|_| ".".to_string());
        self.session = Some(session);
        self.sftp = Some(sftp);
        Ok(json!({ "host": config.host, "port": config.port, "cwd": home }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        let closed = match self.sftp.take() {
            Some(sftp) => sftp.close().await,
            None => Ok(()),
        };
        if let Some(session) = self.session.take() {
            ssh::close_session(&session).await;
        }
        closed
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        let sftp = self
            .sftp
            .as_mut()
            .ok_or_else(|| UniconError::NotConnected("SFTP".into()))?;
        files::dispatch(sftp, operation, params).await
    }
}
