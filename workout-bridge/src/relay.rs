//! Frontend relay contract.
//!
//! Inbound, the frontend sends notifications:
//!
//! ```text
//! {"notification": "INIT", "payload": {"cameraIndex": 0, "exerciseType": "Automatic Detection"}}
//! ```
//!
//! Outbound, the bridge emits events on exactly three channels:
//!
//! ```text
//! {"channel": "frame-update", "payload": {"frame": "...", "repCount": 5, ...}}
//! {"channel": "status", "payload": {"message": "..."}}
//! {"channel": "error", "payload": {"message": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::codec::{FramePayload, InboundMessage, WorkerRecord};
use crate::config::WorkerConfig;
use crate::error::DecodeError;

/// Notification that (re)starts the worker
pub const INIT_NOTIFICATION: &str = "INIT";

/// Outbound channel names
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RelayChannel {
    FrameUpdate,
    Status,
    Error,
}

impl RelayChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayChannel::FrameUpdate => "frame-update",
            RelayChannel::Status => "status",
            RelayChannel::Error => "error",
        }
    }
}

/// An event relayed to the frontend.
///
/// The payload is the worker's payload, untouched: fields the bridge does
/// not model pass through, and nothing absent is filled in.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RelayEvent {
    channel: RelayChannel,
    payload: Value,
}

impl RelayEvent {
    pub fn new(channel: RelayChannel, payload: Value) -> Self {
        Self { channel, payload }
    }

    /// Error event with a human-readable message
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_message(RelayChannel::Error, message)
    }

    /// Status event with an informational message
    pub fn status(message: impl Into<String>) -> Self {
        Self::with_message(RelayChannel::Status, message)
    }

    fn with_message(channel: RelayChannel, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(channel, json!({ "message": message }))
    }

    pub fn channel(&self) -> RelayChannel {
        self.channel
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// `message` of a status or error payload
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }

    /// Typed view of a `frame-update` payload.
    pub fn frame(&self) -> Option<FramePayload> {
        if self.channel != RelayChannel::FrameUpdate {
            return None;
        }
        FramePayload::deserialize(&self.payload).ok()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&InboundMessage> for RelayChannel {
    fn from(message: &InboundMessage) -> Self {
        match message {
            InboundMessage::Frame(_) => RelayChannel::FrameUpdate,
            InboundMessage::Status(_) => RelayChannel::Status,
            InboundMessage::Error(_) => RelayChannel::Error,
        }
    }
}

impl From<WorkerRecord> for RelayEvent {
    fn from(record: WorkerRecord) -> Self {
        RelayEvent::new(RelayChannel::from(&record.message), record.payload)
    }
}

/// A request from the frontend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendRequest {
    /// Start, or restart, the worker with this configuration
    Init(WorkerConfig),
    /// Any other notification; ignored so newer frontends keep working
    Unrecognized { notification: String },
}

#[derive(Serialize, Deserialize)]
struct RawRequest {
    notification: String,
    #[serde(default)]
    payload: Value,
}

impl FrontendRequest {
    /// Parse a frontend notification.
    ///
    /// Unknown notifications are not an error; they parse to
    /// `FrontendRequest::Unrecognized`.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let raw: RawRequest = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

        if raw.notification != INIT_NOTIFICATION {
            return Ok(FrontendRequest::Unrecognized {
                notification: raw.notification,
            });
        }

        // An INIT without payload means "use the defaults"
        let payload = match raw.payload {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        let config = serde_json::from_value(payload).map_err(|source| DecodeError::InvalidPayload {
            tag: INIT_NOTIFICATION.to_string(),
            source,
        })?;
        Ok(FrontendRequest::Init(config))
    }

    /// Wire form of this request.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let raw = match self {
            FrontendRequest::Init(config) => RawRequest {
                notification: INIT_NOTIFICATION.to_string(),
                payload: serde_json::to_value(config)?,
            },
            FrontendRequest::Unrecognized { notification } => RawRequest {
                notification: notification.clone(),
                payload: Value::Null,
            },
        };
        serde_json::to_string(&raw)
    }
}

/// Destination of relayed events.
///
/// Delivery is fire-and-forget: the bridge keeps no display state, so an
/// event nobody receives is simply gone.
pub trait FrontendSink: Send + 'static {
    fn deliver(&self, event: RelayEvent);
}

impl FrontendSink for broadcast::Sender<RelayEvent> {
    fn deliver(&self, event: RelayEvent) {
        let channel = event.channel();
        if self.send(event).is_err() {
            debug!(channel = channel.as_str(), "No frontend subscribed, event dropped");
        }
    }
}

impl FrontendSink for mpsc::UnboundedSender<RelayEvent> {
    fn deliver(&self, event: RelayEvent) {
        let channel = event.channel();
        if self.send(event).is_err() {
            debug!(channel = channel.as_str(), "Frontend receiver closed, event dropped");
        }
    }
}
