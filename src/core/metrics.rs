// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the connection core.
//!
//! This module uses `lazy_static` so metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, HistogramVec, IntGauge, TextEncoder, register_counter_vec, register_gauge,
    register_histogram_vec, register_int_gauge,
};

lazy_static! {
    // --- Gauges ---
    /// Connections currently in the `connected` state.
    pub static ref ACTIVE_CONNECTIONS: IntGauge =
        register_int_gauge!("unicon_active_connections", "Number of live protocol connections.").unwrap();
    /// Front-door clients currently attached.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("unicon_connected_clients", "Number of attached front-door clients.").unwrap();
    /// Open streaming sessions across all handlers.
    pub static ref OPEN_SESSIONS: IntGauge =
        register_int_gauge!("unicon_open_sessions", "Number of open streaming sessions.").unwrap();

    // --- Counters ---
    /// Connect attempts, labeled by protocol and outcome.
    pub static ref CONNECT_ATTEMPTS_TOTAL: CounterVec =
        register_counter_vec!("unicon_connect_attempts_total", "Connect attempts by protocol and outcome.", &["protocol", "outcome"]).unwrap();
    /// Routed operations, labeled by protocol and outcome.
    pub static ref OPERATIONS_TOTAL: CounterVec =
        register_counter_vec!("unicon_operations_total", "Operations by protocol and outcome.", &["protocol", "outcome"]).unwrap();
    /// Events handed to the broadcaster, labeled by event type.
    pub static ref EVENTS_PUBLISHED_TOTAL: CounterVec =
        register_counter_vec!("unicon_events_published_total", "Events published by type.", &["type"]).unwrap();

    // --- Histograms ---
    /// Operation latency per protocol.
    pub static ref OPERATION_LATENCY_SECONDS: HistogramVec =
        register_histogram_vec!("unicon_operation_latency_seconds", "Latency of routed operations in seconds.", &["protocol"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
