//! WebSocket handler for the frontend relay.
//!
//! - Every connected frontend receives every relay event
//! - Text frames from the frontend are parsed as frontend requests and
//!   queued for the bridge controller
//! - Clients that fall behind skip events instead of stalling the bridge.
//!   The skip drops the oldest buffered events of every channel, errors
//!   included (see [`crate::state::EVENT_CHANNEL_CAPACITY`])
//! - Connection tracking with metadata, cleaned up on disconnect

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use workout_bridge::FrontendRequest;

use crate::connection::{generate_connection_id, ConnectionInfo};
use crate::state::AppState;

/// WebSocket upgrade handler for GET /ws endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let connection_id = generate_connection_id();
    info!(connection_id = %connection_id, peer = %addr, "Frontend connecting");

    ws.on_upgrade(move |socket| handle_socket(socket, connection_id, addr, state))
}

/// Handles an active WebSocket connection.
///
/// # Message Flow
/// 1. Subscribes to the relay event fan-out
/// 2. Spawns a task to forward relay events to this client
/// 3. Queues incoming requests for the bridge controller
/// 4. Cleans up resources on disconnect
async fn handle_socket(socket: WebSocket, connection_id: String, peer: SocketAddr, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Subscribe before registering so no event after "connected" is missed
    let mut rx = state.events.subscribe();
    state.register_connection(ConnectionInfo::new(connection_id.clone(), Some(peer)));

    // Task: Forward relay events to this WebSocket client
    let forward_conn_id = connection_id.clone();
    let forward_state = state.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(connection_id = %forward_conn_id, skipped, "Frontend fell behind, events skipped");
                    crate::metrics::record_event_lag(skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, channel = event.channel().as_str(), "Failed to encode relay event");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text)).await.is_err() {
                info!(connection_id = %forward_conn_id, "Frontend disconnected (send failed)");
                break;
            }
            forward_state.update_connection(&forward_conn_id, |c| c.increment_sent());
        }
    });

    // Main loop: Receive requests from the frontend
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                state.update_connection(&connection_id, |c| c.increment_received());
                forward_request(&state, &connection_id, &text).await;
            }
            Ok(Message::Binary(data)) => {
                warn!(connection_id = %connection_id, len = data.len(), "Ignoring binary frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Axum answers pings itself
                state.update_connection(&connection_id, |c| c.touch());
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Frontend sent close frame");
                break;
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Cleanup
    forward_task.abort();

    if let Some(info) = state.unregister_connection(&connection_id) {
        info!(
            connection_id = %connection_id,
            events_sent = info.events_sent,
            requests_received = info.requests_received,
            duration_secs = info.duration().num_seconds(),
            "Frontend disconnected"
        );
    }
}

/// Parse one frontend text frame and queue it for the controller.
///
/// Malformed and unrecognized requests are logged and dropped; they never
/// close the connection.
async fn forward_request(state: &AppState, connection_id: &str, text: &str) {
    let request = match FrontendRequest::from_json(text) {
        Ok(request) => request,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "Ignoring malformed frontend request");
            crate::metrics::record_frontend_request("malformed");
            return;
        }
    };

    match request {
        FrontendRequest::Init(config) => {
            crate::metrics::record_frontend_request("init");
            debug!(
                connection_id = %connection_id,
                camera_index = config.camera_index,
                exercise_type = %config.exercise_type,
                "Queueing init request"
            );
            if state.requests.send(FrontendRequest::Init(config)).await.is_err() {
                error!(connection_id = %connection_id, "Bridge controller is gone, init request dropped");
            }
        }
        FrontendRequest::Unrecognized { notification } => {
            crate::metrics::record_frontend_request("unrecognized");
            debug!(connection_id = %connection_id, notification = %notification, "Ignoring unrecognized notification");
        }
    }
}
