//! Workout Bridge - supervisor and relay for the inference worker
//!
//! This crate launches the body-tracking inference worker as a child
//! process, decodes the JSON records it prints on stdout, and relays them
//! to a rendering frontend as typed events.
//!
//! # Architecture
//!
//! - [`workers`]: owns one child process and turns its stdout, stderr and
//!   exit into [`workers::WorkerSignal`]s tagged with the worker's id
//! - [`codec`]: decodes one stdout line into an [`InboundMessage`], keeping
//!   the original payload for the relay
//! - [`controller`]: the single stateful orchestrator; restarts the worker
//!   on every init request and drops signals from superseded workers
//! - [`relay`]: the frontend-facing request/event contract
//!
//! # Example
//!
//! ```ignore
//! use workout_bridge::{BridgeController, FrontendRequest, LaunchSettings, Launcher, Platform, WorkerConfig};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), workout_bridge::BridgeError> {
//!     let launcher = Launcher::resolve(LaunchSettings::from_env(), Platform::current())?;
//!     let (events_tx, mut events) = mpsc::unbounded_channel();
//!     let (requests_tx, requests) = mpsc::channel(8);
//!
//!     let bridge = BridgeController::new(launcher, events_tx);
//!     tokio::spawn(bridge.run(requests, std::future::pending()));
//!
//!     requests_tx.send(FrontendRequest::Init(WorkerConfig::default())).await.ok();
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {:?}", event.channel().as_str(), event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod relay;
pub mod workers;

// Re-export main types for convenience
pub use codec::{
    decode, decode_record, encode, FramePayload, InboundMessage, MessagePayload, WorkerRecord, WorkoutStats,
};
pub use config::{LaunchSettings, Launcher, Platform, WorkerConfig};
pub use controller::{BridgeController, BridgeStatus};
pub use error::{BridgeError, BridgeResult, DecodeError};
pub use relay::{FrontendRequest, FrontendSink, RelayChannel, RelayEvent};
pub use workers::{WorkerEvent, WorkerExit, WorkerHandle, WorkerId, WorkerSignal};
