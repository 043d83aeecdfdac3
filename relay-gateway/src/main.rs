//! Relay Gateway
//!
//! Hosts one workout bridge and exposes it to the mirror frontend:
//! - GET /ws - WebSocket carrying frontend requests and relay events
//! - GET /health - Health check
//! - GET /ready - Readiness check (includes the live worker)
//! - GET /metrics - Prometheus metrics

mod connection;
mod metrics;
mod state;
mod ws_handler;

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use workout_bridge::{BridgeController, LaunchSettings, Launcher, Platform};
use workout_core::LogFormat;

use state::{AppState, MeteredSink, ReadyReport, EVENT_CHANNEL_CAPACITY, REQUEST_CHANNEL_CAPACITY};

/// Listen address when `WORKOUT_BIND_ADDR` is unset
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8090";

// ============================================================================
// Handlers
// ============================================================================

/// Health check
async fn health_handler() -> &'static str {
    "OK"
}

/// Readiness check (includes bridge status)
async fn ready_handler(State(state): State<Arc<AppState>>) -> Json<ReadyReport> {
    Json(state.ready_report())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// One bridge controller and the shared state its frontends connect through
struct Gateway {
    state: Arc<AppState>,
    shutdown: oneshot::Sender<()>,
    bridge: JoinHandle<()>,
}

impl Gateway {
    /// Start the bridge controller for `launcher`; no worker runs until a
    /// frontend sends INIT.
    fn start(launcher: Launcher) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let controller = BridgeController::new(launcher, MeteredSink::new(events_tx.clone()));
        let bridge_status = controller.status();
        let bridge = tokio::spawn(controller.run(requests_rx, async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            state: Arc::new(AppState::new(requests_tx, events_tx, bridge_status)),
            shutdown,
            bridge,
        }
    }

    fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Stop the live worker and wait for the controller to finish
    async fn stop(self) -> Result<(), JoinError> {
        let _ = self.shutdown.send(());
        self.bridge.await
    }
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    workout_core::init_tracing_with("relay-gateway", LogFormat::from_env());
    metrics::init_metrics()?;

    let bind_addr = std::env::var("WORKOUT_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let launcher = Launcher::resolve(LaunchSettings::from_env(), Platform::current())
        .context("Failed to resolve worker launcher")?;
    info!(
        interpreter = %launcher.interpreter().display(),
        script = %launcher.script().display(),
        "Worker launcher resolved"
    );

    // Bridge controller, fed by every connected frontend
    let gateway = Gateway::start(launcher);
    let app = gateway.router();

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!(bind_addr = %bind_addr, "Relay gateway starting");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    // Stop the live worker before exiting
    gateway.stop().await.context("Bridge controller task failed")?;

    info!("Relay gateway stopped");
    Ok(())
}
