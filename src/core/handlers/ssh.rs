// src/core/handlers/ssh.rs

//! SSH handler: one-shot exec, interactive shells and SFTP helpers over a
//! single authenticated connection. The connect helper is shared with the
//! standalone SFTP handler.

use super::files::{download_json, entry_json};
use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use crate::core::protocol::Utf8Chunks;
use crate::core::protocol::sftp::SftpSession;
use crate::core::session::{SessionRegistry, SessionResource};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use russh::client::{self, Handle, Msg};
use russh::{ChannelMsg, ChannelStream, Disconnect};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const OPERATIONS: &[&str] = &[
    "exec",
    "shellOpen",
    "shellInput",
    "shellResize",
    "shellClose",
    "sftpList",
    "sftpGet",
    "sftpPut",
    "listSessions",
];

const SHELL_TERM: &str = "xterm-color";
const SHELL_MAILBOX: usize = 64;

/// Connection settings shared by `ssh` and `sftp`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> u16 {
    22
}

fn default_timeout_ms() -> u64 {
    15_000
}

impl SshConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Accepts every host key; the key fingerprint is logged.
pub struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("SSH server key {}", server_public_key.fingerprint());
        Ok(true)
    }
}

pub type SshSession = Handle<AcceptAnyHostKey>;
pub type SftpChannel = SftpSession<ChannelStream<Msg>>;

/// Connects and authenticates with a private key (preferred) or password.
pub async fn open_session(config: &SshConfig) -> Result<SshSession, UniconError> {
    if config.host.trim().is_empty() {
        return Err(UniconError::InvalidConfig("host is required".into()));
    }
    if config.username.trim().is_empty() {
        return Err(UniconError::InvalidConfig("username is required".into()));
    }
    let key = match config.private_key.as_deref().filter(|k| !k.trim().is_empty()) {
        Some(pem) => Some(
            russh_keys::decode_secret_key(pem, config.passphrase.as_deref())
                .map_err(|e| UniconError::Protocol(format!("could not decode private key: {e}")))?,
        ),
        None => None,
    };
    if key.is_none() && config.password.is_none() {
        return Err(UniconError::InvalidConfig(
            "password or privateKey is required".into(),
        ));
    }

    let timeout = config.timeout();
    let ssh_config = Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    });
    let addr = (config.host.trim().to_string(), config.port);
    let mut session = tokio::time::timeout(timeout, client::connect(ssh_config, addr, AcceptAnyHostKey))
        .await
        .map_err(|_| {
            UniconError::Timeout(format!(
                "SSH connect to {}:{} timed out after {} ms",
                config.host,
                config.port,
                timeout.as_millis()
            ))
        })??;

    let authenticated = match key {
        Some(key) => {
            tokio::time::timeout(timeout, session.authenticate_publickey(&config.username, Arc::new(key)))
                .await??
        }
        None => {
            let password = config.password.clone().unwrap_or_default();
            tokio::time::timeout(timeout, session.authenticate_password(&config.username, password))
                .await??
        }
    };
    if !authenticated {
        let _ = session
            .disconnect(Disconnect::ByApplication, "authentication failed", "en")
            .await;
        return Err(UniconError::transport(format!(
            "SSH authentication failed for user '{}'",
            config.username
        )));
    }
    info!("SSH session established to {}:{}", config.host, config.port);
    Ok(session)
}

/// Opens the SFTP subsystem on a new channel.
pub async fn open_sftp(session: &SshSession) -> Result<SftpChannel, UniconError> {
    let channel = session.channel_open_session().await?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| UniconError::transport(format!("SFTP subsystem request failed: {e}")))?;
    SftpSession::start(channel.into_stream()).await
}

pub async fn close_session(session: &SshSession) {
    if let Err(e) = session.disconnect(Disconnect::ByApplication, "", "en").await {
        debug!("SSH disconnect: {}", e);
    }
}

fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[derive(Debug, Deserialize)]
struct ExecParams {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShellOpenParams {
    #[serde(default = "default_cols")]
    cols: u32,
    #[serde(default = "default_rows")]
    rows: u32,
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellInputParams {
    session_id: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellResizeParams {
    session_id: String,
    cols: u32,
    rows: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SftpListParams {
    #[serde(default = "default_dir")]
    path: String,
}

fn default_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
struct SftpPathParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct SftpPutParams {
    path: String,
    base64: String,
}

enum ShellCommand {
    Input(Vec<u8>),
    Resize { cols: u32, rows: u32 },
    Close,
}

/// An interactive shell channel owned by its pump task.
pub struct ShellSession {
    commands: mpsc::Sender<ShellCommand>,
    task: Option<JoinHandle<()>>,
    finished: Arc<AtomicBool>,
    cols: u32,
    rows: u32,
}

impl ShellSession {
    async fn send(&self, command: ShellCommand) -> Result<(), UniconError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| UniconError::transport("shell channel is closed"))
    }
}

#[async_trait]
impl SessionResource for ShellSession {
    fn kind(&self) -> &'static str {
        "shell"
    }

    async fn terminate(&mut self) {
        let _ = self.commands.try_send(ShellCommand::Close);
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("Shell pump did not stop in time; aborting");
                abort.abort();
            }
        }
        self.finished.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn describe(&self) -> Value {
        json!({ "cols": self.cols, "rows": self.rows })
    }
}

async fn shell_pump(
    mut channel: russh::Channel<Msg>,
    mut commands: mpsc::Receiver<ShellCommand>,
    ctx: HandlerContext,
    session_id: String,
    finished: Arc<AtomicBool>,
) {
    let mut reason = "exited";
    let mut exit_code: Option<u32> = None;
    let mut stdout = Utf8Chunks::new();
    let mut stderr = Utf8Chunks::new();
    let emit = |data: String, stream: Option<&str>| {
        if data.is_empty() {
            return;
        }
        let payload = match stream {
            Some(stream) => json!({ "data": data, "stream": stream }),
            None => json!({ "data": data }),
        };
        ctx.emit_session("shellData", &session_id, payload);
    };
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => emit(stdout.push(&data), None),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    emit(stderr.push(&data), Some("stderr"))
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            command = commands.recv() => match command {
                Some(ShellCommand::Input(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!("Shell {} write failed: {}", session_id, e);
                        reason = "error";
                        break;
                    }
                }
                Some(ShellCommand::Resize { cols, rows }) => {
                    if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                        debug!("Shell {} resize failed: {}", session_id, e);
                    }
                }
                Some(ShellCommand::Close) | None => {
                    reason = "closed";
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break;
                }
            },
        }
    }
    if let Some(rest) = stdout.finish() {
        emit(rest, None);
    }
    if let Some(rest) = stderr.finish() {
        emit(rest, Some("stderr"));
    }
    finished.store(true, Ordering::Release);
    ctx.emit_session(
        "shellClosed",
        &session_id,
        json!({ "reason": reason, "code": exit_code }),
    );
}

pub struct SshHandler {
    ctx: HandlerContext,
    session: Option<SshSession>,
    sftp: Option<SftpChannel>,
    shells: SessionRegistry<ShellSession>,
}

impl SshHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            session: None,
            sftp: None,
            shells: SessionRegistry::new(),
        }
    }

    fn session(&self) -> Result<&SshSession, UniconError> {
        match &self.session {
            Some(session) if !session.is_closed() => Ok(session),
            _ => Err(UniconError::NotConnected("SSH".into())),
        }
    }

    async fn sftp(&mut self) -> Result<&mut SftpChannel, UniconError> {
        if self.sftp.is_none() {
            let sftp = open_sftp(self.session()?).await?;
            self.sftp = Some(sftp);
        }
        self.sftp
            .as_mut()
            .ok_or_else(|| UniconError::Internal("SFTP channel vanished".into()))
    }

    async fn exec(&self, params: Value) -> Result<Value, UniconError> {
        let p: ExecParams = params::parse("exec", params)?;
        let command = match p.cwd.as_deref().filter(|c| !c.is_empty()) {
            Some(cwd) => format!("cd {} && {}", quote(cwd), p.command),
            None => p.command,
        };
        let mut channel = self.session()?.channel_open_session().await?;
        channel.exec(true, command.as_bytes()).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut code: Option<u32> = None;
        let mut signal: Option<String> = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => code = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => signal = Some(format!("{signal_name:?}")),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        Ok(json!({
            "stdout": String::from_utf8_lossy(&stdout),
            "stderr": String::from_utf8_lossy(&stderr),
            "code": code,
            "signal": signal,
        }))
    }

    async fn shell_open(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: ShellOpenParams = params::parse("shellOpen", params)?;
        let channel = self.session()?.channel_open_session().await?;
        channel
            .request_pty(true, SHELL_TERM, p.cols, p.rows, 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;

        let session_id = SessionRegistry::<ShellSession>::next_id();
        let (tx, rx) = mpsc::channel(SHELL_MAILBOX);
        let finished = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(shell_pump(
            channel,
            rx,
            self.ctx.clone(),
            session_id.clone(),
            finished.clone(),
        ));
        self.shells.insert(
            session_id.clone(),
            ShellSession {
                commands: tx,
                task: Some(task),
                finished,
                cols: p.cols,
                rows: p.rows,
            },
        );
        Ok(json!({ "sessionId": session_id }))
    }

    fn shell(&mut self, session_id: &str) -> Result<&mut ShellSession, UniconError> {
        self.shells
            .get_mut(session_id)
            .ok_or_else(|| UniconError::SessionNotFound(session_id.to_string()))
    }

    async fn shell_input(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: ShellInputParams = params::parse("shellInput", params)?;
        let shell = self.shell(&p.session_id)?;
        shell.send(ShellCommand::Input(p.data.into_bytes())).await?;
        Ok(json!({ "sessionId": p.session_id }))
    }

    async fn shell_resize(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: ShellResizeParams = params::parse("shellResize", params)?;
        let shell = self.shell(&p.session_id)?;
        shell
            .send(ShellCommand::Resize {
                cols: p.cols,
                rows: p.rows,
            })
            .await?;
        shell.cols = p.cols;
        shell.rows = p.rows;
        Ok(json!({ "sessionId": p.session_id, "cols": p.cols, "rows": p.rows }))
    }

    async fn shell_close(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: SessionParams = params::parse("shellClose", params)?;
        let closed = self.shells.remove(&p.session_id).await;
        Ok(json!({ "closed": closed }))
    }

    async fn sftp_list(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: SftpListParams = params::parse("sftpList", params)?;
        let entries = self.sftp().await?.read_dir(&p.path).await?;
        Ok(json!({ "entries": entries.iter().map(entry_json).collect::<Vec<_>>() }))
    }

    async fn sftp_get(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: SftpPathParams = params::parse("sftpGet", params)?;
        let content = self.sftp().await?.read_file(&p.path).await?;
        Ok(download_json(&content))
    }

    async fn sftp_put(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: SftpPutParams = params::parse("sftpPut", params)?;
        if p.base64.is_empty() {
            return Err(UniconError::params("base64 required"));
        }
        let content = STANDARD.decode(p.base64.trim())?;
        self.sftp().await?.write_file(&p.path, &content, true).await?;
        Ok(json!({ "path": p.path, "size": content.len() }))
    }
}

#[async_trait]
impl ProtocolHandler for SshHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: SshConfig = self.ctx.parse_config()?;
        let session = open_session(&config).await?;
        self.session = Some(session);
        self.ctx.emit("ssh", json!({ "event": "connected" }));
        Ok(json!({ "host": config.host, "port": config.port, "username": config.username }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.shells.drain().await;
        if let Some(sftp) = self.sftp.take()
            && let Err(e) = sftp.close().await
        {
            debug!("SFTP close: {}", e);
        }
        if let Some(session) = self.session.take() {
            close_session(&session).await;
        }
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        self.shells.reap();
        match operation {
            "exec" => self.exec(params).await,
            "shellOpen" => self.shell_open(params).await,
            "shellInput" => self.shell_input(params).await,
            "shellResize" => self.shell_resize(params).await,
            "shellClose" => self.shell_close(params).await,
            "sftpList" => self.sftp_list(params).await,
            "sftpGet" => self.sftp_get(params).await,
            "sftpPut" => self.sftp_put(params).await,
            "listSessions" => Ok(json!({ "sessions": self.shells.list() })),
            _ => Err(UniconError::UnknownOperation {
                protocol: "ssh".into(),
                operation: operation.into(),
            }),
        }
    }

    fn session_count(&self) -> usize {
        self.shells.len()
    }
}
