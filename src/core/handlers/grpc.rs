// src/core/handlers/grpc.rs

//! gRPC handler driven through the `grpcurl` tool. Schemas come from server
//! reflection unless a proto file is configured.

use super::process::{self, Framing, ProcessSession, ProcessSpec, StreamEvents};
use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use crate::core::session::SessionRegistry;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const OPERATIONS: &[&str] = &[
    "listServices",
    "describe",
    "unary",
    "streamStart",
    "streamStop",
    "listSessions",
];

const STREAM_EVENTS: StreamEvents = StreamEvents {
    output: "grpcStream",
    closed: "grpcStreamClosed",
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrpcConfig {
    #[serde(default)]
    address: String,
    #[serde(default = "default_plaintext")]
    plaintext: bool,
    #[serde(default)]
    proto: Option<String>,
    #[serde(default)]
    import_paths: Vec<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_plaintext() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl GrpcConfig {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    /// Flags shared by every invocation: transport security, schema source and
    /// metadata headers.
    fn common_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.plaintext {
            args.push("-plaintext".to_string());
        }
        for path in &self.import_paths {
            args.push("-import-path".into());
            args.push(path.clone());
        }
        if let Some(proto) = self.proto.as_deref().filter(|p| !p.is_empty()) {
            args.push("-proto".into());
            args.push(proto.to_string());
        }
        for (name, value) in &self.headers {
            args.push("-H".into());
            args.push(format!("{name}: {}", params::stringify(value)));
        }
        args
    }

    /// Expands a bare method name against the configured service.
    fn qualify(&self, method: &str) -> Result<String, UniconError> {
        let method = method.trim();
        if method.is_empty() {
            return Err(UniconError::params("method required"));
        }
        if method.contains('/') || method.contains('.') {
            return Ok(method.to_string());
        }
        match self.service.as_deref().filter(|s| !s.is_empty()) {
            Some(service) => Ok(format!("{service}/{method}")),
            None => Err(UniconError::params(format!(
                "method '{method}' is not fully qualified and no service is configured"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeParams {
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    method: String,
    #[serde(default)]
    request: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopParams {
    session_id: String,
}

/// Parses grpcurl's output: zero or more JSON documents back to back.
pub fn parse_messages(stdout: &str) -> Result<Vec<Value>, UniconError> {
    serde_json::Deserializer::from_str(stdout)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| UniconError::Protocol(format!("grpcurl returned malformed JSON: {e}")))
}

fn request_body(request: &Value) -> String {
    match request {
        Value::Null => "{}".to_string(),
        Value::String(raw) if raw.trim().is_empty() => "{}".to_string(),
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

struct Live {
    config: GrpcConfig,
    program: PathBuf,
}

pub struct GrpcHandler {
    ctx: HandlerContext,
    live: Option<Live>,
    streams: SessionRegistry<ProcessSession>,
}

impl GrpcHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            live: None,
            streams: SessionRegistry::new(),
        }
    }

    fn live(&self) -> Result<&Live, UniconError> {
        self.live
            .as_ref()
            .ok_or_else(|| UniconError::NotConnected("gRPC".into()))
    }

    async fn grpcurl(&self, args: Vec<String>, stdin: Option<&[u8]>) -> Result<String, UniconError> {
        let live = self.live()?;
        let mut full = live.config.common_args();
        full.extend(args);
        process::run(&live.program, &full, stdin, live.config.timeout())
            .await?
            .into_stdout("grpcurl")
    }

    async fn list_services(&self) -> Result<Value, UniconError> {
        let address = self.live()?.config.address.clone();
        let stdout = self.grpcurl(vec![address, "list".into()], None).await?;
        let services: Vec<&str> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        Ok(json!({ "services": services }))
    }

    async fn describe(&self, params: Value) -> Result<Value, UniconError> {
        let p: DescribeParams = params::parse("describe", params)?;
        let live = self.live()?;
        let symbol = p
            .symbol
            .or_else(|| live.config.service.clone())
            .filter(|s| !s.is_empty());
        let mut args = vec![live.config.address.clone(), "describe".into()];
        if let Some(symbol) = &symbol {
            args.push(symbol.clone());
        }
        let description = self.grpcurl(args, None).await?;
        Ok(json!({ "symbol": symbol, "description": description.trim_end() }))
    }

    async fn unary(&self, params: Value) -> Result<Value, UniconError> {
        let p: CallParams = params::parse("unary", params)?;
        let live = self.live()?;
        let method = live.config.qualify(&p.method)?;
        let body = request_body(&p.request);
        let args = vec![
            "-d".into(),
            "@".into(),
            live.config.address.clone(),
            method.clone(),
        ];
        let stdout = self.grpcurl(args, Some(body.as_bytes())).await?;
        let mut messages = parse_messages(&stdout)?;
        let response = match messages.len() {
            0 => Value::Object(Map::new()),
            1 => messages.remove(0),
            _ => Value::Array(messages),
        };
        Ok(json!({ "method": method, "response": response }))
    }

    async fn stream_start(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: CallParams = params::parse("streamStart", params)?;
        let live = self.live()?;
        let method = live.config.qualify(&p.method)?;
        let mut args = live.config.common_args();
        args.extend([
            "-d".to_string(),
            request_body(&p.request),
            live.config.address.clone(),
            method.clone(),
        ]);
        let spec = ProcessSpec {
            program: live.program.clone(),
            args,
            interactive: false,
            framing: Framing::Documents,
            events: STREAM_EVENTS,
            tags: json!({ "method": method }),
        };
        let session_id = SessionRegistry::<ProcessSession>::next_id();
        let session = ProcessSession::spawn("grpcStream", spec, &self.ctx, &session_id)?;
        self.streams.insert(session_id.clone(), session);
        info!("Started gRPC stream {} for {}", session_id, method);
        Ok(json!({ "sessionId": session_id, "method": method }))
    }

    async fn stream_stop(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: StopParams = params::parse("streamStop", params)?;
        let stopped = self.streams.remove(&p.session_id).await;
        Ok(json!({ "stopped": stopped }))
    }
}

#[async_trait]
impl ProtocolHandler for GrpcHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: GrpcConfig = self.ctx.parse_config()?;
        if config.address.trim().is_empty() {
            return Err(UniconError::InvalidConfig("gRPC address required".into()));
        }
        let program = process::locate(self.ctx.settings.grpcurl_path.as_deref(), "grpcurl")?;
        let reflection = config.proto.as_deref().is_none_or(str::is_empty);
        self.live = Some(Live { config, program });

        // With reflection the service listing doubles as a reachability probe.
        if reflection {
            match self.list_services().await {
                Ok(_) => {}
                Err(e) if e.to_string().to_lowercase().contains("reflection") => {
                    warn!("gRPC server does not support reflection: {}", e);
                }
                Err(e) => {
                    self.live = None;
                    return Err(e);
                }
            }
        }
        let live = self.live()?;
        debug!("gRPC connected via {}", live.program.display());
        Ok(json!({
            "address": live.config.address,
            "plaintext": live.config.plaintext,
            "reflection": reflection,
        }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.streams.drain().await;
        self.live = None;
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        self.streams.reap();
        match operation {
            "listServices" => self.list_services().await,
            "describe" => self.describe(params).await,
            "unary" => self.unary(params).await,
            "streamStart" => self.stream_start(params).await,
            "streamStop" => self.stream_stop(params).await,
            "listSessions" => Ok(json!({ "sessions": self.streams.list() })),
            _ => Err(UniconError::UnknownOperation {
                protocol: "grpc".into(),
                operation: operation.into(),
            }),
        }
    }

    fn session_count(&self) -> usize {
        self.streams.len()
    }
}
