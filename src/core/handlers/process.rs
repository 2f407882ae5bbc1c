// src/core/handlers/process.rs

//! Child processes driven by the CLI-backed handlers (`kubectl`, `grpcurl`):
//! one-shot commands and long-running streaming sessions.

use super::HandlerContext;
use crate::core::errors::UniconError;
use crate::core::protocol::{DocumentFrame, JsonDocumentCodec, Utf8ChunkCodec};
use crate::core::session::SessionResource;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

/// How long `terminate` waits for the reader task after killing the child.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Captured result of a one-shot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout on success; otherwise a `Remote` error built from stderr.
    pub fn into_stdout(self, tool: &str) -> Result<String, UniconError> {
        if self.success() {
            return Ok(self.stdout);
        }
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Err(UniconError::Remote {
            message: format!("{tool}: {text}"),
            detail: json!({ "exitCode": self.code }),
        })
    }
}

fn spawn_error(program: &Path, e: std::io::Error) -> UniconError {
    if e.kind() == std::io::ErrorKind::NotFound {
        UniconError::Transport(format!("{} not found: not installed or not on PATH", program.display()))
    } else {
        UniconError::from(e)
    }
}

/// Resolves a CLI tool: the configured path if set, otherwise a `PATH` lookup.
pub fn locate(configured: Option<&Path>, name: &str) -> Result<PathBuf, UniconError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(UniconError::Transport(format!(
            "{name} not found at {}",
            path.display()
        ))),
        None => which::which(name).map_err(|_| {
            UniconError::Transport(format!("{name} not found: not installed or not on PATH"))
        }),
    }
}

/// Runs a command to completion, feeding `stdin` if given.
pub async fn run(
    program: &Path,
    args: &[String],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput, UniconError> {
    debug!("Running {} {:?}", program.display(), args);
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command.spawn().map_err(|e| spawn_error(program, e))?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
        drop(pipe);
    }
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            UniconError::Timeout(format!(
                "{} did not finish within {} ms",
                program.display(),
                timeout.as_millis()
            ))
        })??;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    })
}

/// Output framing of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One event per line, in the `line` field.
    Lines,
    /// One event per read, in the `data` field.
    Chunks,
    /// One event per JSON document on stdout, in the `message` field; stderr
    /// stays line-framed.
    Documents,
}

/// Event names a session publishes.
#[derive(Debug, Clone, Copy)]
pub struct StreamEvents {
    pub output: &'static str,
    pub closed: &'static str,
}

/// A long-running child process to start.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub interactive: bool,
    pub framing: Framing,
    pub events: StreamEvents,
    /// Merged into every event payload (pod, container, method, ...).
    pub tags: Value,
}

/// A streaming child process registered as a session.
pub struct ProcessSession {
    kind: &'static str,
    stdin: Option<ChildStdin>,
    stop: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    finished: Arc<AtomicBool>,
    pid: Option<u32>,
    tags: Value,
}

impl ProcessSession {
    /// Spawns the child and its reader task. Output events are tagged with
    /// `session_id` and published in the order they were read.
    pub fn spawn(
        kind: &'static str,
        spec: ProcessSpec,
        ctx: &HandlerContext,
        session_id: &str,
    ) -> Result<Self, UniconError> {
        debug!("Starting {} session: {} {:?}", kind, spec.program.display(), spec.args);
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.interactive { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| spawn_error(&spec.program, e))?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let (stop_tx, stop_rx) = oneshot::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(pump(
            child,
            stop_rx,
            ctx.clone(),
            session_id.to_string(),
            spec.framing,
            spec.events,
            spec.tags.clone(),
            finished.clone(),
        ));
        Ok(Self {
            kind,
            stdin,
            stop: Some(stop_tx),
            reader: Some(reader),
            finished,
            pid,
            tags: spec.tags,
        })
    }

    /// Writes to the child's stdin.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), UniconError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| UniconError::Unsupported(format!("{} session has no input", self.kind)))?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionResource for ProcessSession {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn terminate(&mut self) {
        self.stdin = None;
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(reader) = self.reader.take() {
            let abort = reader.abort_handle();
            if tokio::time::timeout(REAP_TIMEOUT, reader).await.is_err() {
                warn!("{} session reader did not stop in time; aborting", self.kind);
                abort.abort();
            }
        }
        self.finished.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn describe(&self) -> Value {
        let mut row = json!({ "pid": self.pid });
        if let (Value::Object(map), Value::Object(tags)) = (&mut row, &self.tags) {
            map.extend(tags.clone());
        }
        row
    }
}

fn tagged(tags: &Value, fields: Value) -> Value {
    let mut out = tags.clone();
    match (&mut out, fields) {
        (Value::Object(map), Value::Object(extra)) => {
            map.extend(extra);
            out
        }
        (_, fields) => fields,
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump(
    mut child: Child,
    mut stop: oneshot::Receiver<()>,
    ctx: HandlerContext,
    session_id: String,
    framing: Framing,
    events: StreamEvents,
    tags: Value,
    finished: Arc<AtomicBool>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut out = frames(stdout, framing, "stdout");
    let mut err = frames(stderr, framing, "stderr");
    let mut out_done = false;
    let mut err_done = false;
    let mut stopped = false;

    while !(out_done && err_done) {
        tokio::select! {
            biased;
            _ = &mut stop, if !stopped => {
                stopped = true;
                if let Err(e) = child.start_kill() {
                    debug!("Kill failed for session {}: {}", session_id, e);
                }
                break;
            }
            item = out.next(), if !out_done => match item {
                Some(fields) => ctx.emit_session(events.output, &session_id, tagged(&tags, fields)),
                None => out_done = true,
            },
            item = err.next(), if !err_done => match item {
                Some(fields) => ctx.emit_session(events.output, &session_id, tagged(&tags, fields)),
                None => err_done = true,
            },
        }
    }

    let status = child.wait().await;
    finished.store(true, Ordering::Release);
    let code = status.as_ref().ok().and_then(|s| s.code());
    let reason = if stopped { "stopped" } else { "exited" };
    ctx.emit_session(
        events.closed,
        &session_id,
        tagged(&tags, json!({ "code": code, "reason": reason })),
    );
}

type FrameStream = futures::stream::BoxStream<'static, Value>;

fn frames<R>(pipe: Option<R>, framing: Framing, name: &'static str) -> FrameStream
where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
{
    let Some(pipe) = pipe else {
        return futures::stream::empty().boxed();
    };
    match framing {
        Framing::Documents if name == "stdout" => FramedRead::new(pipe, JsonDocumentCodec)
            .filter_map(move |frame| async move {
                match frame.ok()? {
                    DocumentFrame::Document(message) => {
                        Some(json!({ "stream": name, "message": message }))
                    }
                    DocumentFrame::Text(line) => Some(json!({ "stream": name, "line": line })),
                }
            })
            .boxed(),
        Framing::Lines | Framing::Documents => {
            FramedRead::new(pipe, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
                .filter_map(move |line| async move {
                    line.ok().map(|line| json!({ "stream": name, "line": line }))
                })
                .boxed()
        }
        Framing::Chunks => FramedRead::new(pipe, Utf8ChunkCodec)
            .filter_map(move |chunk| async move {
                chunk.ok().map(|data| json!({ "stream": name, "data": data }))
            })
            .boxed(),
    }
}
