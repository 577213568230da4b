//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ws_engine_connections_accepted_total` (counter): accepted sockets
//! - `ws_engine_connections_active` (gauge): open connections across endpoints
//! - `ws_engine_requests_total` (counter, labels: status): completed requests
//! - `ws_engine_sessions_active` (gauge): sessions held by all registries
//! - `ws_engine_sweeps_total` (counter): completed inactive-session sweeps
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is optional and owns its own HTTP listener

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "ws_engine_connections_accepted_total";
pub const CONNECTIONS_ACTIVE: &str = "ws_engine_connections_active";
pub const REQUESTS_TOTAL: &str = "ws_engine_requests_total";
pub const SESSIONS_ACTIVE: &str = "ws_engine_sessions_active";
pub const SWEEPS_TOTAL: &str = "ws_engine_sweeps_total";

/// Install the Prometheus recorder with a scrape endpoint on `addr`.
///
/// Must run inside a tokio runtime. Failure is logged, not fatal.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn connection_opened() {
    counter!(CONNECTIONS_ACCEPTED_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn record_request(status: u16) {
    counter!(REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn sessions_added(count: usize) {
    gauge!(SESSIONS_ACTIVE).increment(count as f64);
}

pub fn sessions_removed(count: usize) {
    gauge!(SESSIONS_ACTIVE).decrement(count as f64);
}

pub fn record_sweep() {
    counter!(SWEEPS_TOTAL).increment(1);
}
