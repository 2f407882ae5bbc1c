// src/core/handlers/mod.rs

//! Protocol handlers: one implementation per protocol family, all behind the
//! common [`ProtocolHandler`] capability set.

pub mod files;
pub mod ftp;
pub mod grpc;
pub mod k8s;
pub mod localfs;
pub mod opcua;
pub mod params;
pub mod process;
pub mod registry;
pub mod rest;
pub mod snmp;
pub mod soap;
pub mod sql;
pub mod ssh;
pub mod sftp;
pub mod websocket;

pub use registry::{HandlerFactory, HandlerRegistry, ProtocolDescriptor};

use crate::core::errors::UniconError;
use crate::core::events::{Event, EventBroadcaster};
use crate::core::model::ProtocolType;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The common capability set of every protocol handler.
///
/// A handler is exclusively owned by its connection actor; every call arrives
/// sequentially through `&mut self`.
#[async_trait]
pub trait ProtocolHandler: Send {
    /// Establishes the live transport. The returned value is passed back to the
    /// caller as connect detail.
    async fn connect(&mut self) -> Result<Value, UniconError>;

    /// Tears down every session and the transport. Must leave zero sessions
    /// behind even when it returns an error.
    async fn disconnect(&mut self) -> Result<(), UniconError>;

    /// Runs one protocol-specific operation. The router has already checked the
    /// name against the protocol's declared operation set.
    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError>;

    /// Number of sessions currently held by this handler.
    fn session_count(&self) -> usize {
        0
    }
}

/// Process-wide knobs handed to every handler.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Ceiling on handler-side connection waits, such as acquiring a pooled
    /// database connection.
    pub connect_timeout: Duration,
    pub kubectl_path: Option<PathBuf>,
    pub grpcurl_path: Option<PathBuf>,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: crate::core::router::DEFAULT_CONNECT_TIMEOUT,
            kubectl_path: None,
            grpcurl_path: None,
        }
    }
}

/// Everything a handler gets at construction time.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub connection_id: String,
    pub protocol: ProtocolType,
    /// The raw connection config; parsed by the handler in `connect`.
    pub config: Value,
    pub events: EventBroadcaster,
    pub settings: Arc<HandlerSettings>,
}

impl HandlerContext {
    /// Deserializes the connection config into the handler's typed schema.
    pub fn parse_config<T: DeserializeOwned>(&self) -> Result<T, UniconError> {
        let raw = match &self.config {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(raw)
            .map_err(|e| UniconError::InvalidConfig(format!("{} config: {e}", self.protocol)))
    }

    /// Publishes a protocol event for this connection.
    pub fn emit(&self, kind: &str, fields: Value) {
        self.events
            .publish(Event::new(kind, Some(&self.connection_id)).with_fields(fields));
    }

    /// Publishes a protocol event tagged with a session id.
    pub fn emit_session(&self, kind: &str, session_id: &str, fields: Value) {
        self.events.publish(
            Event::new(kind, Some(&self.connection_id))
                .with_session(session_id)
                .with_fields(fields),
        );
    }

    /// Publishes a log event for this connection.
    pub fn log(&self, level: &str, message: impl Into<String>) {
        self.events
            .publish(Event::log(Some(&self.connection_id), level, message));
    }

    /// The shared broadcaster, for reader tasks that outlive a single call.
    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }
}
