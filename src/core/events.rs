// src/core/events.rs

//! The process-wide event broadcaster.
//!
//! Handlers and the router publish [`Event`]s; every registered observer receives
//! every event. Delivery is fire-and-forget over a `tokio::sync::broadcast`
//! channel: a slow observer lags and loses events instead of back-pressuring
//! the publisher, and nothing is replayed to late subscribers.

use crate::core::metrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// The default capacity of the broadcast ring.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A published fact. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// `status`, `log`, or a protocol-specific event name.
    pub kind: String,
    pub connection_id: Option<String>,
    pub session_id: Option<String>,
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: impl Into<String>, connection_id: Option<&str>) -> Self {
        Self {
            kind: kind.into(),
            connection_id: connection_id.map(str::to_string),
            session_id: None,
            payload: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// A connection status change.
    pub fn status(connection_id: &str, status: impl ToString) -> Self {
        Self::new("status", Some(connection_id)).with("status", status.to_string())
    }

    /// An informational log line.
    pub fn log(connection_id: Option<&str>, level: &str, message: impl Into<String>) -> Self {
        Self::new("log", connection_id)
            .with("level", level)
            .with("message", message.into())
    }

    /// A failure log line carrying the classified code and hint.
    pub fn error_log(
        connection_id: Option<&str>,
        message: impl Into<String>,
        code: &str,
        hint: &str,
    ) -> Self {
        Self::log(connection_id, "error", message)
            .with("code", code)
            .with("hint", hint)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Merges every key of a JSON object into the payload.
    pub fn with_fields(mut self, fields: Value) -> Self {
        if let Value::Object(map) = fields {
            self.payload.extend(map);
        }
        self
    }

    /// A string payload field.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// The observer-facing shape: `{"type": kind, "data": {...}}`.
    pub fn to_json(&self) -> Value {
        let mut data = Map::new();
        if let Some(id) = &self.connection_id {
            data.insert("connectionId".into(), Value::String(id.clone()));
        }
        if let Some(id) = &self.session_id {
            data.insert("sessionId".into(), Value::String(id.clone()));
        }
        for (k, v) in &self.payload {
            data.insert(k.clone(), v.clone());
        }
        data.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        json!({ "type": self.kind, "data": Value::Object(data) })
    }
}

#[derive(Debug)]
struct Inner {
    sender: broadcast::Sender<Arc<Event>>,
    /// Registered observers, keyed by handle id.
    observers: DashMap<u64, DateTime<Utc>>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to the shared broadcaster.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    inner: Arc<Inner>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                observers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Delivers `event` to every current observer. Returns the number of
    /// observers it was queued for; zero observers is not an error.
    pub fn publish(&self, event: Event) -> usize {
        metrics::EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[event.kind.as_str()])
            .inc();
        self.inner.sender.send(Arc::new(event)).unwrap_or(0)
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.insert(id, Utc::now());
        Subscription {
            id,
            receiver: self.inner.sender.subscribe(),
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Removes an observer. Dropping the subscription has the same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

/// An observer handle. Receives every event published after it was created.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<Arc<Event>>,
    owner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event. Returns `None` once the broadcaster is gone.
    /// Events dropped because this observer lagged are skipped.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Observer {} lagged; skipped {} events.", self.id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.observers.remove(&self.id);
        }
    }
}
