// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a
//! front-door client.

use super::guard::ConnectionGuard;
use super::session::{ClientSession, next_event};
use crate::core::handlers::params;
use crate::core::model::{ConnectionPatch, ProtocolFamily};
use crate::core::protocol::{InboundFrame, JsonLineCodec, OutboundFrame, RequestFrame};
use crate::core::{OperationRequest, OperationResponse, OperationRouter, UniconError};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionIdParams {
    connection_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    name: String,
    #[serde(alias = "type")]
    protocol_type: String,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    workspace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    connection_id: String,
    #[serde(flatten)]
    patch: ConnectionPatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    connection_id: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// A failed front-door call, with the family used to classify it.
struct MethodError {
    family: ProtocolFamily,
    error: UniconError,
}

impl From<UniconError> for MethodError {
    fn from(error: UniconError) -> Self {
        Self {
            family: ProtocolFamily::Unknown,
            error,
        }
    }
}

/// Manages the full lifecycle of a front-door client.
pub struct ConnectionHandler {
    framed: Framed<TcpStream, JsonLineCodec>,
    addr: SocketAddr,
    router: Arc<OperationRouter>,
    shutdown_rx: broadcast::Receiver<()>,
    session: ClientSession,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        router: Arc<OperationRouter>,
        client_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            framed: Framed::new(socket, JsonLineCodec::new()),
            addr,
            router,
            shutdown_rx,
            session: ClientSession::new(client_id),
        }
    }

    /// The main event loop: requests in, responses and subscribed events out.
    pub async fn run(&mut self) -> Result<(), UniconError> {
        let _guard = ConnectionGuard::new(self.session.client_id, self.addr);
        loop {
            tokio::select! {
                // Prioritize shutdown over other events.
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Client handler for {} received shutdown signal.", self.addr);
                    break;
                }
                event = next_event(&mut self.session.subscription) => {
                    if let Some(event) = event {
                        self.framed.send(OutboundFrame::Event(event)).await?;
                    }
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(InboundFrame::Request(request))) => {
                            self.session.requests_served += 1;
                            let response = self.process_request(request).await;
                            self.framed.send(response).await?;
                        }
                        Some(Ok(InboundFrame::Malformed { id, reason })) => {
                            debug!("Client {}: malformed frame: {}", self.addr, reason);
                            let body = OperationResponse::failure(
                                ProtocolFamily::Unknown,
                                &UniconError::InvalidParams(reason),
                            );
                            self.framed.send(OutboundFrame::Response { id, body }).await?;
                        }
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Client {} closed by peer: {}", self.addr, e);
                            } else {
                                warn!("Client error for {}: {}", self.addr, e);
                            }
                            break;
                        }
                        None => {
                            debug!("Client {} closed by peer.", self.addr);
                            break;
                        }
                    }
                }
            }
        }
        debug!(
            "Client {} served {} requests in {:?}.",
            self.addr,
            self.session.requests_served,
            self.session.connected_at.elapsed()
        );
        Ok(())
    }

    async fn process_request(&mut self, request: RequestFrame) -> OutboundFrame {
        let RequestFrame { id, method, params } = request;
        let span = info_span!("request", client = self.session.client_id, method = %method);
        let body = async {
            if method == "operation" {
                return match params::parse::<OperationRequest>("operation", params) {
                    Ok(request) => self.router.handle(request).await,
                    Err(e) => OperationResponse::failure(ProtocolFamily::Unknown, &e),
                };
            }
            match self.dispatch(&method, params).await {
                Ok(data) => OperationResponse::ok(data),
                Err(MethodError { family, error }) => OperationResponse::failure(family, &error),
            }
        }
        .instrument(span)
        .await;
        OutboundFrame::Response { id, body }
    }

    /// Runs every front-door method other than `operation`.
    async fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, MethodError> {
        let router = self.router.clone();
        match method {
            "ping" => Ok(json!({ "pong": true, "timestamp": Utc::now().to_rfc3339() })),
            "connections.list" => Ok(to_json(router.list_connections().await?)),
            "connections.get" => {
                let p: ConnectionIdParams = params::parse(method, params)?;
                Ok(to_json(router.get_connection(&p.connection_id).await?))
            }
            "connections.create" => {
                let p: CreateParams = params::parse(method, params)?;
                let created = router
                    .create_connection(&p.name, &p.protocol_type, p.config, p.workspace_id)
                    .await?;
                Ok(to_json(created))
            }
            "connections.update" => {
                let p: UpdateParams = params::parse(method, params)?;
                Ok(to_json(
                    router.update_connection(&p.connection_id, p.patch).await?,
                ))
            }
            "connections.delete" => {
                let p: ConnectionIdParams = params::parse(method, params)?;
                let deleted = router.delete_connection(&p.connection_id).await?;
                Ok(json!({ "connectionId": p.connection_id, "deleted": deleted }))
            }
            "connect" => {
                let p: ConnectParams = params::parse(method, params)?;
                match router
                    .connect_with_timeout(&p.connection_id, p.timeout_ms.map(Duration::from_millis))
                    .await
                {
                    Ok(outcome) => Ok(to_json(outcome)),
                    Err(error) => Err(MethodError {
                        family: router.family_of(&p.connection_id).await,
                        error,
                    }),
                }
            }
            "disconnect" => {
                let p: ConnectionIdParams = params::parse(method, params)?;
                match router.disconnect(&p.connection_id).await {
                    Ok(outcome) => Ok(to_json(outcome)),
                    Err(error) => Err(MethodError {
                        family: router.family_of(&p.connection_id).await,
                        error,
                    }),
                }
            }
            "subscribe" => {
                let subscription = self
                    .session
                    .subscription
                    .get_or_insert_with(|| router.events().subscribe());
                Ok(json!({ "subscribed": true, "observerId": subscription.id() }))
            }
            "unsubscribe" => {
                let was_subscribed = match self.session.subscription.take() {
                    Some(subscription) => {
                        router.events().unsubscribe(subscription);
                        true
                    }
                    None => false,
                };
                Ok(json!({ "unsubscribed": was_subscribed }))
            }
            _ => Err(UniconError::params(format!("unknown method '{method}'")).into()),
        }
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &UniconError) -> bool {
    matches!(e, UniconError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
