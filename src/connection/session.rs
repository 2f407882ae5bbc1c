// src/connection/session.rs

//! Defines the state associated with a single front-door client.

use crate::core::events::{Event, Subscription};
use std::sync::Arc;
use std::time::Instant;

/// Holds the state specific to a single client.
#[derive(Debug)]
pub struct ClientSession {
    pub client_id: u64,
    /// Present while the client is subscribed to events.
    pub subscription: Option<Subscription>,
    pub requests_served: u64,
    pub connected_at: Instant,
}

impl ClientSession {
    pub(crate) fn new(client_id: u64) -> Self {
        Self {
            client_id,
            subscription: None,
            requests_served: 0,
            connected_at: Instant::now(),
        }
    }
}

/// Resolves with the next event for a subscribed client; never resolves for
/// an unsubscribed one. Clears the subscription once the broadcaster is gone.
pub(crate) async fn next_event(subscription: &mut Option<Subscription>) -> Option<Arc<Event>> {
    match subscription {
        Some(sub) => {
            let event = sub.recv().await;
            if event.is_none() {
                *subscription = None;
            }
            event
        }
        None => std::future::pending().await,
    }
}
