//! Prometheus metrics for relay gateway observability
//!
//! Exposes metrics at /metrics endpoint for scraping by Prometheus.

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use workout_bridge::RelayChannel;

/// Global Prometheus handle
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Metric names
pub const CONNECTIONS_TOTAL: &str = "workout_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "workout_connections_active";
pub const FRONTEND_REQUESTS: &str = "workout_frontend_requests_total";
pub const RELAY_EVENTS: &str = "workout_relay_events_total";
pub const EVENT_LAG: &str = "workout_event_lag_total";

/// Initialize the metrics system
pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Metrics already initialized"))?;

    // Describe metrics for Prometheus
    describe_counter!(CONNECTIONS_TOTAL, "Total number of frontend WebSocket connections");
    describe_gauge!(CONNECTIONS_ACTIVE, "Number of currently connected frontends");
    describe_counter!(FRONTEND_REQUESTS, "Frontend requests by kind");
    describe_counter!(RELAY_EVENTS, "Events relayed to the frontend by channel");
    describe_counter!(EVENT_LAG, "Relay events skipped by clients that fell behind");

    tracing::info!("Metrics system initialized");
    Ok(())
}

/// Handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    METRICS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Record a new connection
pub fn record_connection() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed
pub fn record_disconnection() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

// ============================================================================
// Relay Metrics
// ============================================================================

/// Record a request read from a frontend (`init`, `unrecognized`, `malformed`)
pub fn record_frontend_request(kind: &'static str) {
    counter!(FRONTEND_REQUESTS, "kind" => kind).increment(1);
}

/// Record an event handed to the frontend fan-out
pub fn record_relay_event(channel: RelayChannel) {
    counter!(RELAY_EVENTS, "channel" => channel.as_str()).increment(1);
}

/// Record events a lagging client never received
pub fn record_event_lag(skipped: u64) {
    counter!(EVENT_LAG).increment(skipped);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_metrics_are_labelled() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_relay_event(RelayChannel::FrameUpdate);
            record_relay_event(RelayChannel::FrameUpdate);
            record_relay_event(RelayChannel::Error);
            record_frontend_request("init");
            record_event_lag(3);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"workout_relay_events_total{channel="frame-update"} 2"#));
        assert!(rendered.contains(r#"workout_relay_events_total{channel="error"} 1"#));
        assert!(rendered.contains(r#"workout_frontend_requests_total{kind="init"} 1"#));
        assert!(rendered.contains("workout_event_lag_total 3"));
    }

    #[tokio::test]
    async fn test_handler_without_recorder_is_empty() {
        // Only main installs the global recorder
        if METRICS_HANDLE.get().is_none() {
            assert_eq!(metrics_handler().await, "");
        }
    }
}
