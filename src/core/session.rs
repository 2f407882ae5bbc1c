// src/core/session.rs

//! The per-handler registry of ephemeral sub-sessions.
//!
//! Every handler that opens shells, exec channels, log tails, port-forwards or
//! polling subscriptions keeps them in a [`SessionRegistry`]. The registry is
//! owned by the handler (which in turn is owned by its connection actor), so it
//! needs no locking. Teardown goes through [`SessionResource::terminate`], and
//! [`SessionRegistry::drain`] is what makes `disconnect` a hard barrier.

use crate::core::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::debug;

/// A live sub-resource that can be torn down.
#[async_trait]
pub trait SessionResource: Send {
    /// Short label reported in session listings (`shell`, `logs`, `exec`, ...).
    fn kind(&self) -> &'static str;

    /// Actively releases the underlying resource: kill the process, close the
    /// channel, cancel the poller. Must not fail.
    async fn terminate(&mut self);

    /// True once the resource ended on its own (process exited, stream closed).
    fn is_finished(&self) -> bool {
        false
    }

    /// Extra fields for session listings.
    fn describe(&self) -> Value {
        Value::Null
    }
}

struct SessionEntry<T> {
    resource: T,
    opened_at: DateTime<Utc>,
}

/// Keyed map of sessions with generated ids and teardown-on-remove.
pub struct SessionRegistry<T: SessionResource> {
    sessions: IndexMap<String, SessionEntry<T>>,
}

impl<T: SessionResource> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SessionResource> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: IndexMap::new(),
        }
    }

    /// Generates a fresh session id. Ids are handed out before the resource
    /// exists so reader tasks can tag their events from the first byte.
    pub fn next_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Registers a resource under a freshly generated id.
    pub fn register(&mut self, resource: T) -> String {
        let id = Self::next_id();
        self.insert(id.clone(), resource);
        id
    }

    /// Registers a resource under an id previously obtained from [`Self::next_id`].
    pub fn insert(&mut self, id: String, resource: T) {
        debug!("Registering {} session {}", resource.kind(), id);
        metrics::OPEN_SESSIONS.inc();
        self.sessions.insert(
            id,
            SessionEntry {
                resource,
                opened_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.sessions.get(id).map(|entry| &entry.resource)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.sessions.get_mut(id).map(|entry| &mut entry.resource)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Removes and terminates a session. Unknown ids are a no-op; the return
    /// value tells whether anything was removed.
    pub async fn remove(&mut self, id: &str) -> bool {
        match self.sessions.shift_remove(id) {
            Some(mut entry) => {
                entry.resource.terminate().await;
                metrics::OPEN_SESSIONS.dec();
                debug!("Terminated {} session {}", entry.resource.kind(), id);
                true
            }
            None => false,
        }
    }

    /// Terminates every session. Returns how many were torn down; the
    /// registry is empty afterwards.
    pub async fn drain(&mut self) -> usize {
        let entries: Vec<_> = self.sessions.drain(..).collect();
        let count = entries.len();
        for (id, mut entry) in entries {
            entry.resource.terminate().await;
            metrics::OPEN_SESSIONS.dec();
            debug!("Drained {} session {}", entry.resource.kind(), id);
        }
        count
    }

    /// Drops sessions whose resource already ended by itself.
    pub fn reap(&mut self) -> Vec<String> {
        let finished: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.resource.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &finished {
            self.sessions.shift_remove(id);
            metrics::OPEN_SESSIONS.dec();
        }
        finished
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// A JSON listing of open sessions.
    pub fn list(&self) -> Vec<Value> {
        self.sessions
            .iter()
            .map(|(id, entry)| {
                let mut row = json!({
                    "sessionId": id,
                    "kind": entry.resource.kind(),
                    "openedAt": entry.opened_at.to_rfc3339(),
                    "finished": entry.resource.is_finished(),
                });
                if let (Value::Object(map), Value::Object(extra)) =
                    (&mut row, entry.resource.describe())
                {
                    map.extend(extra);
                }
                row
            })
            .collect()
    }
}

impl<T: SessionResource> Drop for SessionRegistry<T> {
    fn drop(&mut self) {
        // Resources release themselves on drop; keep the gauge honest.
        for _ in 0..self.sessions.len() {
            metrics::OPEN_SESSIONS.dec();
        }
    }
}
