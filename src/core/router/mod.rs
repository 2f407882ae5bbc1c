// src/core/router/mod.rs

//! The Operation Router: the single entry point for connect, disconnect and
//! operation calls, plus connection CRUD on top of the connection store.
//!
//! Each connection id owns a slot guarded by an async mutex. `connect` holds the
//! slot for its whole duration, so concurrent connects on the same id collapse
//! into one handler and operations queued behind a connect see its outcome.

mod actor;
pub mod response;

pub use response::{ConnectOutcome, DisconnectOutcome, OperationRequest, OperationResponse};

use self::actor::ActorHandle;
use crate::core::classifier::classify_error;
use crate::core::errors::UniconError;
use crate::core::events::{Event, EventBroadcaster};
use crate::core::handlers::{HandlerContext, HandlerRegistry, HandlerSettings};
use crate::core::metrics;
use crate::core::model::{
    Connection, ConnectionPatch, ConnectionStatus, ProtocolFamily, ProtocolType,
};
use crate::core::store::ConnectionStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Router-level deadlines.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Upper bound on a handler's `connect` when the caller gives none.
    pub connect_timeout: Duration,
    /// Default deadline for an operation when the request carries none.
    pub operation_timeout: Duration,
    /// Upper bound on a handler's `disconnect`.
    pub disconnect_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }
}

/// The live half of a connected connection.
#[derive(Debug)]
struct ActiveConnection {
    protocol: ProtocolType,
    operations: &'static [&'static str],
    actor: ActorHandle,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slot {
    status: ConnectionStatus,
    active: Option<ActiveConnection>,
}

/// Routes connect/disconnect/operation requests to per-connection actors.
pub struct OperationRouter {
    store: Arc<dyn ConnectionStore>,
    registry: HandlerRegistry,
    events: EventBroadcaster,
    handler_settings: Arc<HandlerSettings>,
    settings: RouterSettings,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl OperationRouter {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        registry: HandlerRegistry,
        events: EventBroadcaster,
        handler_settings: HandlerSettings,
        settings: RouterSettings,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            handler_settings: Arc::new(handler_settings),
            settings,
            slots: DashMap::new(),
        }
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn slot(&self, connection_id: &str) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(connection_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing_slot(&self, connection_id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.slots.get(connection_id).map(|s| s.value().clone())
    }

    // --- Connection CRUD -------------------------------------------------

    /// Every stored connection, with the in-memory status overlaid.
    pub async fn list_connections(&self) -> Result<Vec<Connection>, UniconError> {
        let mut connections = self.store.list().await?;
        for connection in &mut connections {
            connection.status = self.status(&connection.id).await;
        }
        Ok(connections)
    }

    pub async fn get_connection(&self, connection_id: &str) -> Result<Connection, UniconError> {
        let mut connection = self
            .store
            .get(connection_id)
            .await?
            .ok_or_else(|| UniconError::ConnectionNotFound(connection_id.to_string()))?;
        connection.status = self.status(connection_id).await;
        Ok(connection)
    }

    /// Persists a new connection in the `disconnected` state.
    pub async fn create_connection(
        &self,
        name: &str,
        protocol_type: &str,
        config: Value,
        workspace_id: Option<String>,
    ) -> Result<Connection, UniconError> {
        if name.trim().is_empty() {
            return Err(UniconError::params("connection name cannot be empty"));
        }
        if protocol_type.trim().is_empty() {
            return Err(UniconError::params("protocol type cannot be empty"));
        }
        let connection = Connection::new(name, protocol_type, config, workspace_id);
        self.store.upsert(connection.clone()).await?;
        info!(
            "Created connection {} ({}) of type {}",
            connection.name, connection.id, connection.protocol_type
        );
        Ok(connection)
    }

    /// Applies a name/config edit. The protocol type is immutable.
    pub async fn update_connection(
        &self,
        connection_id: &str,
        patch: ConnectionPatch,
    ) -> Result<Connection, UniconError> {
        let slot = self.slot(connection_id);
        let _guard = slot.lock().await;
        let mut connection = self
            .store
            .get(connection_id)
            .await?
            .ok_or_else(|| UniconError::ConnectionNotFound(connection_id.to_string()))?;
        if let Some(protocol_type) = &patch.protocol_type
            && protocol_type != &connection.protocol_type
        {
            return Err(UniconError::ImmutableField("protocolType".into()));
        }
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(UniconError::params("connection name cannot be empty"));
            }
            connection.name = name;
        }
        if let Some(config) = patch.config {
            connection.config = config;
        }
        if let Some(workspace_id) = patch.workspace_id {
            connection.workspace_id = Some(workspace_id);
        }
        connection.updated_at = Utc::now();
        self.store.upsert(connection.clone()).await?;
        Ok(connection)
    }

    /// Deletes a connection, disconnecting it first when live.
    pub async fn delete_connection(&self, connection_id: &str) -> Result<bool, UniconError> {
        self.disconnect(connection_id).await?;
        let deleted = self.store.delete(connection_id).await?;
        self.slots.remove(connection_id);
        Ok(deleted)
    }

    /// Marks every stored connection `disconnected`. Run once at startup since
    /// live handler state never survives a restart.
    pub async fn reset_statuses(&self) -> Result<usize, UniconError> {
        let mut reset = 0;
        for mut connection in self.store.list().await? {
            if connection.status != ConnectionStatus::Disconnected {
                connection.status = ConnectionStatus::Disconnected;
                self.store.upsert(connection).await?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    // --- Lifecycle ---------------------------------------------------------

    /// The in-memory status of a connection.
    pub async fn status(&self, connection_id: &str) -> ConnectionStatus {
        let Some(slot) = self.existing_slot(connection_id) else {
            return ConnectionStatus::Disconnected;
        };
        let status = slot.lock().await.status;
        status
    }

    /// Ids of every connection that currently has a live handler.
    pub async fn active_connections(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<Mutex<Slot>>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut active = Vec::new();
        for (id, slot) in slots {
            if slot.lock().await.active.is_some() {
                active.push(id);
            }
        }
        active
    }

    /// Connects with the router's default deadline.
    pub async fn connect(&self, connection_id: &str) -> Result<ConnectOutcome, UniconError> {
        self.connect_with_timeout(connection_id, None).await
    }

    /// Instantiates and connects the handler for `connection_id`. Idempotent
    /// while connected.
    pub async fn connect_with_timeout(
        &self,
        connection_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ConnectOutcome, UniconError> {
        let slot = self.slot(connection_id);
        let mut slot = slot.lock().await;

        if slot.active.is_some() {
            debug!("Connection {} already connected; connect is a no-op.", connection_id);
            return Ok(ConnectOutcome {
                connection_id: connection_id.to_string(),
                status: ConnectionStatus::Connected,
                already_connected: true,
                detail: Value::Null,
            });
        }

        let connection = self
            .store
            .get(connection_id)
            .await?
            .ok_or_else(|| UniconError::ConnectionNotFound(connection_id.to_string()))?;

        let span = info_span!(
            "connect",
            connection_id = %connection_id,
            protocol = %connection.protocol_type
        );

        async {
            let family = ProtocolFamily::from_tag(&connection.protocol_type);
            let descriptor = connection
                .protocol_type
                .parse::<ProtocolType>()
                .ok()
                .and_then(|protocol| self.registry.get(protocol).cloned());
            let Some(descriptor) = descriptor else {
                let err = UniconError::UnsupportedProtocol(connection.protocol_type.clone());
                self.record_connect_failure(&mut slot, &connection, family, &err)
                    .await;
                return Err(err);
            };

            slot.status = ConnectionStatus::Connecting;
            self.events
                .publish(Event::status(connection_id, ConnectionStatus::Connecting));

            let ctx = HandlerContext {
                connection_id: connection_id.to_string(),
                protocol: descriptor.protocol,
                config: connection.config.clone(),
                events: self.events.clone(),
                settings: self.handler_settings.clone(),
            };
            let mut handler = (descriptor.factory)(ctx);
            let deadline = timeout.unwrap_or(self.settings.connect_timeout);
            let started = Instant::now();

            let result = match tokio::time::timeout(deadline, handler.connect()).await {
                Ok(result) => result,
                Err(_) => Err(UniconError::Timeout(format!(
                    "connect timed out after {} ms",
                    deadline.as_millis()
                ))),
            };

            match result {
                Ok(detail) => {
                    let actor = ActorHandle::spawn(
                        connection_id.to_string(),
                        handler,
                        self.settings.disconnect_timeout,
                    );
                    slot.active = Some(ActiveConnection {
                        protocol: descriptor.protocol,
                        operations: descriptor.operations,
                        actor,
                        connected_at: Utc::now(),
                    });
                    slot.status = ConnectionStatus::Connected;
                    self.persist_status(&connection, ConnectionStatus::Connected)
                        .await;
                    metrics::ACTIVE_CONNECTIONS.inc();
                    metrics::CONNECT_ATTEMPTS_TOTAL
                        .with_label_values(&[descriptor.protocol.as_ref(), "success"])
                        .inc();
                    self.events
                        .publish(Event::status(connection_id, ConnectionStatus::Connected));
                    self.events.publish(Event::log(
                        Some(connection_id),
                        "info",
                        format!(
                            "Connected {} ({}) in {} ms",
                            connection.name,
                            descriptor.protocol,
                            started.elapsed().as_millis()
                        ),
                    ));
                    info!("Connection {} connected.", connection_id);
                    Ok(ConnectOutcome {
                        connection_id: connection_id.to_string(),
                        status: ConnectionStatus::Connected,
                        already_connected: false,
                        detail,
                    })
                }
                Err(err) => {
                    // Release whatever the handler acquired before failing.
                    let cleanup = tokio::time::timeout(
                        self.settings.disconnect_timeout,
                        handler.disconnect(),
                    )
                    .await;
                    if !matches!(cleanup, Ok(Ok(()))) {
                        debug!("Cleanup after failed connect did not complete cleanly.");
                    }
                    drop(handler);
                    metrics::CONNECT_ATTEMPTS_TOTAL
                        .with_label_values(&[descriptor.protocol.as_ref(), "failure"])
                        .inc();
                    self.record_connect_failure(&mut slot, &connection, family, &err)
                        .await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn record_connect_failure(
        &self,
        slot: &mut Slot,
        connection: &Connection,
        family: ProtocolFamily,
        err: &UniconError,
    ) {
        let classification = classify_error(family, err);
        warn!(
            "Connect failed for {} [{}]: {}",
            connection.id, classification.code, err
        );
        slot.status = ConnectionStatus::Disconnected;
        slot.active = None;
        self.persist_status(connection, ConnectionStatus::Disconnected)
            .await;
        self.events
            .publish(Event::status(&connection.id, ConnectionStatus::Disconnected));
        self.events.publish(Event::error_log(
            Some(connection.id.as_str()),
            format!("Connect failed: {err}"),
            &classification.code,
            &classification.hint,
        ));
    }

    async fn persist_status(&self, connection: &Connection, status: ConnectionStatus) {
        if let Err(e) = self.store.set_status(&connection.id, status).await {
            warn!("Failed to persist status for {}: {}", connection.id, e);
            self.events.publish(Event::error_log(
                Some(connection.id.as_str()),
                format!("Failed to persist status '{status}': {e}"),
                "STORAGE_ERROR",
                "Check the connection store path and permissions.",
            ));
        }
    }

    /// Tears down the live handler. Always succeeds from the caller's view;
    /// handler failures and leaked sessions are reported as log events.
    pub async fn disconnect(&self, connection_id: &str) -> Result<DisconnectOutcome, UniconError> {
        let Some(slot) = self.existing_slot(connection_id) else {
            return Ok(DisconnectOutcome {
                connection_id: connection_id.to_string(),
                status: ConnectionStatus::Disconnected,
                was_active: false,
            });
        };
        let mut slot = slot.lock().await;
        let Some(active) = slot.active.take() else {
            return Ok(DisconnectOutcome {
                connection_id: connection_id.to_string(),
                status: ConnectionStatus::Disconnected,
                was_active: false,
            });
        };

        let family = active.protocol.family();
        let span = info_span!("disconnect", connection_id = %connection_id, protocol = %active.protocol);
        let report = active.actor.disconnect().instrument(span).await;

        if let Some(err) = &report.error {
            let classification = classify_error(family, err);
            warn!("Handler disconnect for {} reported: {}", connection_id, err);
            self.events.publish(Event::error_log(
                Some(connection_id),
                format!("Disconnect error: {err}"),
                &classification.code,
                &classification.hint,
            ));
        }
        if report.leaked_sessions > 0 {
            warn!(
                "{} sessions still open after disconnecting {}",
                report.leaked_sessions, connection_id
            );
            self.events.publish(Event::error_log(
                Some(connection_id),
                format!(
                    "{} sessions were still open after disconnect",
                    report.leaked_sessions
                ),
                "SESSION_LEAK",
                "A handler failed to terminate its sessions; child processes or sockets may remain.",
            ));
        }

        slot.status = ConnectionStatus::Disconnected;
        metrics::ACTIVE_CONNECTIONS.dec();
        match self.store.get(connection_id).await {
            Ok(Some(connection)) => {
                self.persist_status(&connection, ConnectionStatus::Disconnected)
                    .await
            }
            Ok(None) => debug!("Connection {} vanished from the store.", connection_id),
            Err(e) => warn!("Failed to load {} for status update: {}", connection_id, e),
        }
        self.events
            .publish(Event::status(connection_id, ConnectionStatus::Disconnected));
        info!(
            "Connection {} disconnected after {}s.",
            connection_id,
            (Utc::now() - active.connected_at).num_seconds()
        );

        Ok(DisconnectOutcome {
            connection_id: connection_id.to_string(),
            status: ConnectionStatus::Disconnected,
            was_active: true,
        })
    }

    /// Disconnects every live connection. Used on shutdown.
    pub async fn disconnect_all(&self) -> usize {
        let mut count = 0;
        for id in self.active_connections().await {
            if let Ok(outcome) = self.disconnect(&id).await
                && outcome.was_active
            {
                count += 1;
            }
        }
        count
    }

    /// Number of sessions held by a live connection's handler.
    pub async fn session_count(&self, connection_id: &str) -> Result<usize, UniconError> {
        let Some(slot) = self.existing_slot(connection_id) else {
            return Ok(0);
        };
        let slot = slot.lock().await;
        let client = match &slot.active {
            Some(active) => active.actor.client(),
            None => return Ok(0),
        };
        drop(slot);
        client.session_count().await
    }

    // --- Operations --------------------------------------------------------

    /// Routes one operation to the connection's handler.
    pub async fn invoke(&self, request: OperationRequest) -> Result<Value, UniconError> {
        let connection_id = request.connection_id.clone();
        let not_active = || UniconError::NotActive(connection_id.clone());
        let slot = self.existing_slot(&connection_id).ok_or_else(not_active)?;

        // Hold the slot only long enough to validate the request.
        let (protocol, client) = {
            let slot = slot.lock().await;
            let active = match (&slot.status, &slot.active) {
                (ConnectionStatus::Connected, Some(active)) => active,
                _ => return Err(not_active()),
            };
            if !active.operations.contains(&request.operation.as_str()) {
                return Err(UniconError::UnknownOperation {
                    protocol: active.protocol.to_string(),
                    operation: request.operation.clone(),
                });
            }
            (active.protocol, active.actor.client())
        };

        let deadline = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.operation_timeout);
        let span = info_span!(
            "operation",
            connection_id = %connection_id,
            protocol = %protocol,
            operation = %request.operation
        );
        let started = Instant::now();
        let result = client
            .invoke(request.operation.clone(), request.params, deadline)
            .instrument(span)
            .await;
        metrics::OPERATION_LATENCY_SECONDS
            .with_label_values(&[protocol.as_ref()])
            .observe(started.elapsed().as_secs_f64());
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::OPERATIONS_TOTAL
            .with_label_values(&[protocol.as_ref(), outcome])
            .inc();
        if let Err(e) = &result {
            debug!(
                "Operation {} on {} failed: {}",
                request.operation, connection_id, e
            );
        }
        result
    }

    /// [`Self::invoke`] wrapped in the response envelope.
    pub async fn handle(&self, request: OperationRequest) -> OperationResponse {
        let family = self.family_of(&request.connection_id).await;
        OperationResponse::from_result(family, self.invoke(request).await)
    }

    /// The error-classification family of a connection, live or stored.
    pub async fn family_of(&self, connection_id: &str) -> ProtocolFamily {
        if let Some(slot) = self.existing_slot(connection_id) {
            let active = slot.lock().await.active.as_ref().map(|a| a.protocol);
            if let Some(protocol) = active {
                return protocol.family();
            }
        }
        match self.store.get(connection_id).await {
            Ok(Some(connection)) => ProtocolFamily::from_tag(&connection.protocol_type),
            _ => ProtocolFamily::Unknown,
        }
    }
}
