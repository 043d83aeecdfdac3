//! Shared application state for the relay gateway.
//!
//! One bridge controller runs per gateway. Every connected frontend
//! subscribes to the same event fan-out and sends its requests into the
//! same controller queue.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use workout_bridge::{BridgeStatus, FrontendRequest, FrontendSink, RelayEvent};

use crate::connection::{ConnectionId, ConnectionInfo};

/// Type alias for connection ID to connection info mapping.
pub type ConnectionsMap = DashMap<ConnectionId, ConnectionInfo>;

/// Frame rate the inference worker streams at
pub const WORKER_FRAME_RATE: usize = 30;

/// Seconds of relay events buffered for a slow frontend
pub const EVENT_BUFFER_SECS: usize = 4;

/// Broadcast channel capacity for relay events.
///
/// Every slot holds one `Arc`-shared event, so the buffer costs at most
/// this many frames (one JPEG each) regardless of client count. A client
/// more than this many events behind skips the oldest ones whatever
/// their channel: a `status` or `error` event can be lost along with the
/// frames around it. The skip is logged and counted in
/// `workout_event_lag_total`.
pub const EVENT_CHANNEL_CAPACITY: usize = WORKER_FRAME_RATE * EVENT_BUFFER_SECS;

/// Capacity of the frontend request queue feeding the controller
pub const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Event sink handed to the bridge controller; counts every relayed event.
#[derive(Clone)]
pub struct MeteredSink {
    events: broadcast::Sender<RelayEvent>,
}

impl MeteredSink {
    pub fn new(events: broadcast::Sender<RelayEvent>) -> Self {
        Self { events }
    }
}

impl FrontendSink for MeteredSink {
    fn deliver(&self, event: RelayEvent) {
        crate::metrics::record_relay_event(event.channel());
        self.events.deliver(event);
    }
}

/// Shared application state for the relay gateway.
#[derive(Clone)]
pub struct AppState {
    /// Requests to the bridge controller
    pub requests: mpsc::Sender<FrontendRequest>,

    /// Relay event fan-out; each connection subscribes
    pub events: broadcast::Sender<RelayEvent>,

    /// Thread-safe map of connection IDs to their metadata.
    pub connections: Arc<ConnectionsMap>,

    /// Latest controller snapshot
    pub bridge_status: watch::Receiver<BridgeStatus>,

    /// Service start time for uptime calculations
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Body of the readiness endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyReport {
    pub ok: bool,
    pub uptime_secs: i64,
    pub connections: usize,
    pub bridge: BridgeStatus,
}

impl AppState {
    pub fn new(
        requests: mpsc::Sender<FrontendRequest>,
        events: broadcast::Sender<RelayEvent>,
        bridge_status: watch::Receiver<BridgeStatus>,
    ) -> Self {
        Self {
            requests,
            events,
            connections: Arc::new(DashMap::new()),
            bridge_status,
            started_at: chrono::Utc::now(),
        }
    }

    /// Register a new connection.
    pub fn register_connection(&self, info: ConnectionInfo) {
        let id = info.id.clone();
        self.connections.insert(id.clone(), info);
        crate::metrics::record_connection();
        tracing::debug!(connection_id = %id, "Connection registered");
    }

    /// Unregister a connection.
    pub fn unregister_connection(&self, connection_id: &str) -> Option<ConnectionInfo> {
        let removed = self.connections.remove(connection_id);
        if removed.is_some() {
            crate::metrics::record_disconnection();
            tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        }
        removed.map(|(_, v)| v)
    }

    /// Update connection info.
    pub fn update_connection<F>(&self, connection_id: &str, update_fn: F)
    where
        F: FnOnce(&mut ConnectionInfo),
    {
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            update_fn(&mut entry);
        }
    }

    /// Get service uptime in seconds.
    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }

    /// Get total number of connected clients.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn ready_report(&self) -> ReadyReport {
        ReadyReport {
            ok: true,
            uptime_secs: self.uptime_secs(),
            connections: self.connection_count(),
            bridge: self.bridge_status.borrow().clone(),
        }
    }
}
