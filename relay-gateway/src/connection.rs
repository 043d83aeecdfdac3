//! Connection tracking for frontend WebSocket clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique connection identifier
pub type ConnectionId = String;

/// Metadata kept for each connected frontend
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,

    /// Peer address, when the listener reported one
    pub peer: Option<SocketAddr>,

    /// Timestamp when connection was established
    pub connected_at: DateTime<Utc>,

    /// Last activity timestamp
    pub last_activity: DateTime<Utc>,

    /// Relay events written to this client
    pub events_sent: u64,

    /// Frontend requests read from this client
    pub requests_received: u64,
}

impl ConnectionInfo {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>) -> Self {
        let now = Utc::now();
        Self {
            id,
            peer,
            connected_at: now,
            last_activity: now,
            events_sent: 0,
            requests_received: 0,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn increment_sent(&mut self) {
        self.events_sent += 1;
        self.touch();
    }

    pub fn increment_received(&mut self) {
        self.requests_received += 1;
        self.touch();
    }

    /// Get connection duration
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Global connection counter for generating unique IDs
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique connection ID
pub fn generate_connection_id() -> ConnectionId {
    let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
    let timestamp = Utc::now().timestamp_millis();
    format!("conn_{:x}_{:x}", timestamp, counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let mut conn = ConnectionInfo::new("conn_test".to_string(), None);
        let created = conn.last_activity;

        conn.increment_sent();
        conn.increment_sent();
        conn.increment_received();

        assert_eq!(conn.events_sent, 2);
        assert_eq!(conn.requests_received, 1);
        assert!(conn.last_activity >= created);
    }

    #[test]
    fn test_generate_connection_id() {
        let id1 = generate_connection_id();
        let id2 = generate_connection_id();

        assert!(id1.starts_with("conn_"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_serializes_peer() {
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let conn = ConnectionInfo::new("conn_peer".to_string(), Some(peer));
        let value = serde_json::to_value(&conn).unwrap();
        assert_eq!(value["peer"], "127.0.0.1:50000");
        assert_eq!(value["events_sent"], 0);
    }
}
