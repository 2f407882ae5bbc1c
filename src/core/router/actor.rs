// src/core/router/actor.rs

//! The per-connection actor: one tokio task that exclusively owns a connected
//! handler and processes commands for it one at a time.

use crate::core::errors::UniconError;
use crate::core::handlers::ProtocolHandler;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

/// Commands accepted by a connection actor.
pub(crate) enum ActorCommand {
    Invoke {
        operation: String,
        params: Value,
        deadline: Duration,
        reply: oneshot::Sender<Result<Value, UniconError>>,
    },
    SessionCount {
        reply: oneshot::Sender<usize>,
    },
    Disconnect {
        reply: oneshot::Sender<DisconnectReport>,
    },
}

/// What the handler reported while shutting down.
#[derive(Debug, Default)]
pub(crate) struct DisconnectReport {
    pub error: Option<UniconError>,
    pub leaked_sessions: usize,
}

/// The router's side of an actor.
#[derive(Debug)]
pub(crate) struct ActorHandle {
    client: ActorClient,
    task: JoinHandle<()>,
}

/// A cloneable sender for queueing requests without holding the router slot.
#[derive(Debug, Clone)]
pub(crate) struct ActorClient {
    connection_id: String,
    tx: mpsc::Sender<ActorCommand>,
}

const MAILBOX_CAPACITY: usize = 64;

impl ActorHandle {
    /// Moves `handler` into a new actor task.
    pub(crate) fn spawn(
        connection_id: String,
        handler: Box<dyn ProtocolHandler>,
        disconnect_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let span = info_span!("connection_actor", connection_id = %connection_id);
        let task = tokio::spawn(run(handler, rx, disconnect_timeout).instrument(span));
        Self {
            client: ActorClient { connection_id, tx },
            task,
        }
    }

    pub(crate) fn client(&self) -> ActorClient {
        self.client.clone()
    }

    /// Asks the actor to disconnect its handler and waits for it to exit.
    pub(crate) async fn disconnect(self) -> DisconnectReport {
        let (reply, rx) = oneshot::channel();
        if self
            .client
            .tx
            .send(ActorCommand::Disconnect { reply })
            .await
            .is_err()
        {
            return DisconnectReport {
                error: Some(UniconError::Internal(
                    "connection actor stopped before disconnect".into(),
                )),
                leaked_sessions: 0,
            };
        }
        let report = rx.await.unwrap_or_else(|_| DisconnectReport {
            error: Some(UniconError::Internal(
                "connection actor exited during disconnect".into(),
            )),
            leaked_sessions: 0,
        });
        if let Err(e) = self.task.await {
            warn!("Connection actor ended abnormally: {e}");
        }
        report
    }
}

impl ActorClient {
    /// A stopped actor means the connection is no longer usable.
    fn stopped(&self) -> UniconError {
        UniconError::NotActive(self.connection_id.clone())
    }

    pub(crate) async fn invoke(
        &self,
        operation: String,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, UniconError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActorCommand::Invoke {
                operation,
                params,
                deadline,
                reply,
            })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub(crate) async fn session_count(&self) -> Result<usize, UniconError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActorCommand::SessionCount { reply })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())
    }
}

async fn run(
    mut handler: Box<dyn ProtocolHandler>,
    mut rx: mpsc::Receiver<ActorCommand>,
    disconnect_timeout: Duration,
) {
    while let Some(command) = rx.recv().await {
        match command {
            ActorCommand::Invoke {
                operation,
                params,
                deadline,
                reply,
            } => {
                let result =
                    match tokio::time::timeout(deadline, handler.invoke(&operation, params)).await {
                        Ok(result) => result,
                        Err(_) => Err(UniconError::Timeout(format!(
                            "operation '{operation}' timed out after {} ms",
                            deadline.as_millis()
                        ))),
                    };
                let _ = reply.send(result);
            }
            ActorCommand::SessionCount { reply } => {
                let _ = reply.send(handler.session_count());
            }
            ActorCommand::Disconnect { reply } => {
                let report = shutdown(handler.as_mut(), disconnect_timeout).await;
                let _ = reply.send(report);
                return;
            }
        }
    }
    // The router went away without an explicit disconnect.
    debug!("Actor mailbox closed; shutting handler down.");
    shutdown(handler.as_mut(), disconnect_timeout).await;
}

async fn shutdown(handler: &mut dyn ProtocolHandler, timeout: Duration) -> DisconnectReport {
    let error = match tokio::time::timeout(timeout, handler.disconnect()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(_) => Some(UniconError::Timeout(format!(
            "disconnect timed out after {} ms",
            timeout.as_millis()
        ))),
    };
    DisconnectReport {
        error,
        leaked_sessions: handler.session_count(),
    }
}
