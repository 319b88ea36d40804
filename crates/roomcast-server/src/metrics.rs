//! Metrics collection and export for Roomcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use roomcast_core::RegistryStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "roomcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "roomcast_connections_active";
    pub const MESSAGES_TOTAL: &str = "roomcast_messages_total";
    pub const ROOMS_ACTIVE: &str = "roomcast_rooms_active";
    pub const USERS_ONLINE: &str = "roomcast_users_online";
    pub const DISCONNECTS_PENDING: &str = "roomcast_disconnects_pending";
    pub const ERRORS_TOTAL: &str = "roomcast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of events processed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of occupied rooms");
    metrics::describe_gauge!(names::USERS_ONLINE, "Current number of online users");
    metrics::describe_gauge!(
        names::DISCONNECTS_PENDING,
        "Disconnects currently inside their reconnect grace window"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed event.
pub fn record_message(direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Update the presence gauges from a registry snapshot.
pub fn update_presence(stats: &RegistryStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    gauge!(names::USERS_ONLINE).set(stats.online_count as f64);
    gauge!(names::DISCONNECTS_PENDING).set(stats.pending_count as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
