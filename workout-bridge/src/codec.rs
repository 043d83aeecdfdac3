//! Worker record codec.
//!
//! The worker prints one JSON object per line on stdout:
//!
//! ```text
//! {"type": "FRAME", "payload": {"frame": "data:image/jpeg;base64,...", "repCount": 5, ...}}
//! {"type": "STATUS", "payload": {"message": "Camera ready"}}
//! {"type": "ERROR", "payload": {"message": "Could not open camera 1"}}
//! ```
//!
//! `decode` selects the variant from the `type` tag and validates the
//! `payload` against that variant's shape. Anything that does not fit is a
//! [`DecodeError`]; callers drop the record and keep reading.
//!
//! The typed payloads are for validation and inspection only. The relay
//! forwards the payload exactly as the worker wrote it, so
//! [`decode_record`] keeps the original `payload` value next to the typed
//! message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Tag of a rendered camera frame with its rep statistics
pub const FRAME_TAG: &str = "FRAME";

/// Legacy tag for frames, still emitted by the bundled worker script
pub const VIDEO_FRAME_TAG: &str = "VIDEO_FRAME";

/// Tag of an informational message
pub const STATUS_TAG: &str = "STATUS";

/// Tag of an error the worker reports about itself
pub const ERROR_TAG: &str = "ERROR";

/// Payload of a `FRAME` record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    /// Encoded frame, usually a `data:image/jpeg;base64,` URL
    pub frame: String,

    /// Repetitions counted so far in this session
    pub rep_count: u32,

    /// Exercise the worker is currently tracking
    pub exercise: String,

    /// Most recent form cues, oldest first
    #[serde(default)]
    pub feedback: Vec<String>,

    #[serde(default)]
    pub stats: WorkoutStats,
}

/// Running session statistics carried by every frame
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutStats {
    #[serde(default)]
    pub calories: f64,

    #[serde(default)]
    pub reps_per_min: f64,
}

/// Payload of `STATUS` and `ERROR` records
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessagePayload {
    pub message: String,
}

impl MessagePayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A decoded worker record
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    Frame(FramePayload),
    Status(MessagePayload),
    Error(MessagePayload),
}

impl InboundMessage {
    /// Canonical tag of this message on the wire
    pub fn tag(&self) -> &'static str {
        match self {
            InboundMessage::Frame(_) => FRAME_TAG,
            InboundMessage::Status(_) => STATUS_TAG,
            InboundMessage::Error(_) => ERROR_TAG,
        }
    }
}

/// A validated record together with the payload exactly as it was received
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRecord {
    pub message: InboundMessage,

    /// Untouched `payload` object, including fields the bridge does not model
    pub payload: Value,
}

/// Decode one record into a typed message.
pub fn decode(record: &str) -> Result<InboundMessage, DecodeError> {
    decode_record(record).map(|decoded| decoded.message)
}

/// Decode one record, keeping its original payload for relaying.
pub fn decode_record(record: &str) -> Result<WorkerRecord, DecodeError> {
    let mut fields: Map<String, Value> =
        serde_json::from_str(record).map_err(DecodeError::Malformed)?;

    let tag = match fields.remove("type") {
        Some(Value::String(tag)) => tag,
        _ => return Err(DecodeError::MissingTag),
    };
    let payload = fields.remove("payload").unwrap_or(Value::Null);

    let message = match tag.as_str() {
        FRAME_TAG | VIDEO_FRAME_TAG => {
            let frame: FramePayload = parse_payload(&tag, &payload)?;
            validate_stats(&tag, &frame.stats)?;
            InboundMessage::Frame(frame)
        }
        STATUS_TAG => InboundMessage::Status(parse_payload(&tag, &payload)?),
        ERROR_TAG => InboundMessage::Error(parse_payload(&tag, &payload)?),
        _ => return Err(DecodeError::UnrecognizedTag(tag)),
    };
    Ok(WorkerRecord { message, payload })
}

/// Encode a message as a single record line (without the trailing newline).
pub fn encode(message: &InboundMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Turn one raw line from the worker into record text.
///
/// Strips the line terminator and returns `None` for blank lines. Invalid
/// UTF-8 is replaced rather than rejected so one bad line cannot end the
/// stream.
pub fn line_text(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end_matches(&['\n', '\r'][..]);
    if trimmed.trim().is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_payload<T>(tag: &str, payload: &Value) -> Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    T::deserialize(payload).map_err(|source| DecodeError::InvalidPayload {
        tag: tag.to_string(),
        source,
    })
}

fn validate_stats(tag: &str, stats: &WorkoutStats) -> Result<(), DecodeError> {
    let checks = [("calories", stats.calories), ("repsPerMin", stats.reps_per_min)];
    for (field, value) in checks {
        // also rejects NaN
        if !(value >= 0.0) {
            return Err(DecodeError::NegativeField {
                tag: tag.to_string(),
                field,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUAT_FRAME: &str = r#"{"type":"FRAME","payload":{"frame":"<data>","repCount":5,"exercise":"Squat","feedback":["Keep back straight"],"stats":{"calories":12,"repsPerMin":8}}}"#;

    #[test]
    fn test_decode_frame() {
        let message = decode(SQUAT_FRAME).unwrap();
        let InboundMessage::Frame(frame) = message else {
            panic!("expected a frame");
        };
        assert_eq!(frame.frame, "<data>");
        assert_eq!(frame.rep_count, 5);
        assert_eq!(frame.exercise, "Squat");
        assert_eq!(frame.feedback, vec!["Keep back straight".to_string()]);
        assert_eq!(frame.stats.calories, 12.0);
        assert_eq!(frame.stats.reps_per_min, 8.0);
    }

    #[test]
    fn test_decode_video_frame_alias() {
        let record = r#"{"type":"VIDEO_FRAME","payload":{"frame":"x","repCount":0,"exercise":"None detected","feedback":[],"stats":{"calories":0.0,"repsPerMin":0.0}}}"#;
        let message = decode(record).unwrap();
        assert_eq!(message.tag(), FRAME_TAG);
    }

    #[test]
    fn test_decode_frame_defaults_feedback_and_stats() {
        let record = r#"{"type":"FRAME","payload":{"frame":"x","repCount":1,"exercise":"Push-up"}}"#;
        let InboundMessage::Frame(frame) = decode(record).unwrap() else {
            panic!("expected a frame");
        };
        assert!(frame.feedback.is_empty());
        assert_eq!(frame.stats, WorkoutStats::default());
    }

    #[test]
    fn test_decode_status_and_error() {
        let status = decode(r#"{"type":"STATUS","payload":{"message":"Camera ready"}}"#).unwrap();
        assert_eq!(status, InboundMessage::Status(MessagePayload::new("Camera ready")));

        let error = decode(r#"{"type":"ERROR","payload":{"message":"Could not open camera 1"}}"#).unwrap();
        assert_eq!(error, InboundMessage::Error(MessagePayload::new("Could not open camera 1")));
    }

    #[test]
    fn test_encode_recovers_tag_and_payload() {
        let original = decode(SQUAT_FRAME).unwrap();
        let record = encode(&original).unwrap();
        assert!(record.starts_with(r#"{"type":"FRAME","payload":"#));
        assert_eq!(decode(&record).unwrap(), original);

        let status = InboundMessage::Status(MessagePayload::new("warming up"));
        assert_eq!(decode(&encode(&status).unwrap()).unwrap(), status);

        let error = InboundMessage::Error(MessagePayload::new("Could not open camera 2"));
        let record = encode(&error).unwrap();
        assert!(record.starts_with(r#"{"type":"ERROR","payload":"#));
        assert_eq!(decode(&record).unwrap(), error);
    }

    #[test]
    fn test_decode_record_keeps_payload_untouched() {
        let payload = r#"{"frame":"x","repCount":1,"exercise":"Squat","sessionId":"abc"}"#;
        let record = format!(r#"{{"type":"FRAME","payload":{}}}"#, payload);

        let decoded = decode_record(&record).unwrap();
        assert_eq!(decoded.payload["sessionId"], "abc");
        assert!(decoded.payload.get("feedback").is_none());
        assert!(decoded.payload.get("stats").is_none());
        assert_eq!(serde_json::to_string(&decoded.payload).unwrap(), payload);

        let InboundMessage::Frame(frame) = decoded.message else {
            panic!("expected a frame");
        };
        assert_eq!(frame.stats, WorkoutStats::default());
    }

    #[test]
    fn test_decode_record_keeps_integer_stats() {
        let payload = r#"{"frame":"x","repCount":5,"exercise":"Squat","feedback":[],"stats":{"calories":12,"repsPerMin":8}}"#;
        let record = format!(r#"{{"type":"VIDEO_FRAME","payload":{}}}"#, payload);

        let decoded = decode_record(&record).unwrap();
        assert_eq!(decoded.message.tag(), FRAME_TAG);
        assert_eq!(serde_json::to_string(&decoded.payload).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(matches!(decode("Traceback (most recent call last):"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("[1, 2, 3]"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_missing_tag() {
        assert!(matches!(decode(r#"{"payload":{"message":"hi"}}"#), Err(DecodeError::MissingTag)));
        assert!(matches!(decode(r#"{"type":7,"payload":{}}"#), Err(DecodeError::MissingTag)));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let err = decode(r#"{"type":"HEARTBEAT","payload":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnrecognizedTag(ref tag) if tag == "HEARTBEAT"));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let missing_reps = r#"{"type":"FRAME","payload":{"frame":"x","exercise":"Squat"}}"#;
        assert!(matches!(decode(missing_reps), Err(DecodeError::InvalidPayload { .. })));

        let missing_payload = r#"{"type":"STATUS"}"#;
        assert!(matches!(decode(missing_payload), Err(DecodeError::InvalidPayload { .. })));

        let negative_reps = r#"{"type":"FRAME","payload":{"frame":"x","repCount":-1,"exercise":"Squat"}}"#;
        assert!(matches!(decode(negative_reps), Err(DecodeError::InvalidPayload { .. })));
    }

    #[test]
    fn test_decode_rejects_negative_stats() {
        let record = r#"{"type":"FRAME","payload":{"frame":"x","repCount":2,"exercise":"Squat","stats":{"calories":-1,"repsPerMin":3}}}"#;
        let err = decode(record).unwrap_err();
        assert!(matches!(err, DecodeError::NegativeField { field: "calories", .. }));
    }

    #[test]
    fn test_line_text() {
        assert_eq!(line_text(b"{\"a\":1}\r\n").as_deref(), Some("{\"a\":1}"));
        assert_eq!(line_text(b"plain\n").as_deref(), Some("plain"));
        assert_eq!(line_text(b"   \n"), None);
        assert_eq!(line_text(b""), None);
        assert!(line_text(&[0x66, 0xff, 0x0a]).is_some());
    }
}
