// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for client resource management.

use crate::core::metrics;
use std::net::SocketAddr;
use tracing::debug;

/// An RAII guard that keeps the connected-clients gauge honest however the
/// client handler exits.
pub struct ConnectionGuard {
    pub(crate) client_id: u64,
    pub(crate) addr: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(client_id: u64, addr: SocketAddr) -> Self {
        Self { client_id, addr }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            "ConnectionGuard dropping for client {} ({})",
            self.client_id, self.addr
        );
    }
}
