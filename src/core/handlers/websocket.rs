// src/core/handlers/websocket.rs

//! Raw WebSocket client. Inbound frames are published as events by a reader
//! task; `send` writes through the retained sink.

use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use crate::core::protocol::Utf8Chunks;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

pub const OPERATIONS: &[&str] = &["send", "ping"];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSocketConfig {
    #[serde(default)]
    url: String,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
struct SendParams {
    message: Value,
}

struct Live {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

pub struct WebSocketHandler {
    ctx: HandlerContext,
    live: Option<Live>,
}

impl WebSocketHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, live: None }
    }

    fn live(&mut self) -> Result<&mut Live, UniconError> {
        match &mut self.live {
            Some(live) if !live.reader.is_finished() => Ok(live),
            _ => Err(UniconError::NotConnected("WebSocket".into())),
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, ctx: HandlerContext) {
    // Binary frames may carry a text stream split mid-character.
    let mut binary = Utf8Chunks::new();
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                ctx.emit("message", json!({ "data": text.as_str(), "binary": false }));
            }
            Ok(Message::Binary(bytes)) => {
                let data = binary.push(&bytes);
                if !data.is_empty() || bytes.is_empty() {
                    ctx.emit("message", json!({ "data": data, "binary": true }));
                }
            }
            Ok(Message::Pong(_)) => ctx.emit("pong", json!({})),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                ctx.emit("closed", json!({ "code": code, "reason": reason }));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                ctx.emit("error", json!({ "error": e.to_string() }));
                return;
            }
        }
    }
    ctx.emit("closed", json!({ "code": 1006, "reason": "stream ended" }));
}

#[async_trait]
impl ProtocolHandler for WebSocketHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: WebSocketConfig = self.ctx.parse_config()?;
        if config.url.trim().is_empty() {
            return Err(UniconError::InvalidConfig(
                "WebSocket URL missing in config".into(),
            ));
        }
        let mut request = config.url.trim().into_client_request()?;
        if let Some(protocol) = config.protocol.as_deref().filter(|p| !p.is_empty()) {
            request.headers_mut().insert(
                "sec-websocket-protocol",
                HeaderValue::from_str(protocol)
                    .map_err(|e| UniconError::InvalidConfig(format!("protocol: {e}")))?,
            );
        }
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| UniconError::InvalidConfig(format!("header '{name}': {e}")))?;
            let value = HeaderValue::from_str(&params::stringify(value))
                .map_err(|e| UniconError::InvalidConfig(format!("header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let connect_timeout = Duration::from_millis(config.timeout_ms.max(1));
        let (stream, response) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                UniconError::Timeout(format!(
                    "WS connect to {} timed out after {} ms",
                    config.url,
                    connect_timeout.as_millis()
                ))
            })??;
        let negotiated = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (sink, stream) = stream.split();
        let reader = tokio::spawn(read_loop(stream, self.ctx.clone()));
        info!("WebSocket connected to {}", config.url);
        self.ctx.emit("connected", json!({ "url": config.url }));
        self.live = Some(Live { sink, reader });
        Ok(json!({ "url": config.url, "protocol": negotiated }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        let Some(mut live) = self.live.take() else {
            return Ok(());
        };
        let result = live.sink.send(Message::Close(None)).await;
        let _ = live.sink.close().await;
        // Give the peer a moment to echo the close frame, then stop reading.
        if tokio::time::timeout(Duration::from_secs(2), &mut live.reader)
            .await
            .is_err()
        {
            debug!("WebSocket reader still running after close; aborting");
            live.reader.abort();
        }
        match result {
            Ok(()) | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        match operation {
            "send" => {
                let p: SendParams = params::parse(operation, params)?;
                let payload = match p.message {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let live = self.live()?;
                live.sink.send(Message::Text(payload.clone().into())).await?;
                self.ctx.emit("sent", json!({ "data": payload }));
                Ok(json!({ "sent": true, "bytes": payload.len() }))
            }
            "ping" => {
                let live = self.live()?;
                live.sink.send(Message::Ping(Vec::new().into())).await?;
                Ok(json!({ "sent": true }))
            }
            _ => Err(UniconError::UnknownOperation {
                protocol: "websocket".into(),
                operation: operation.into(),
            }),
        }
    }
}
