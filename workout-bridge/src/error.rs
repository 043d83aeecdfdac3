//! Bridge error types.

use thiserror::Error;

use crate::workers::WorkerExit;

/// Errors that can occur while supervising the worker
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to start worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dropped worker record: {0}")]
    Decode(#[from] DecodeError),

    #[error("Worker reported an error: {0}")]
    WorkerRuntime(String),

    #[error("Worker {0}")]
    WorkerExit(WorkerExit),

    #[error("Invalid bridge configuration: {0}")]
    Config(String),
}

/// Reasons a worker record could not be turned into an [`InboundMessage`].
///
/// [`InboundMessage`]: crate::codec::InboundMessage
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record is not a JSON object: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("record has no `type` tag")]
    MissingTag,

    #[error("unrecognized record tag `{0}`")]
    UnrecognizedTag(String),

    #[error("invalid `{tag}` payload: {source}")]
    InvalidPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid `{tag}` payload: `{field}` must be a non-negative number")]
    NegativeField { tag: String, field: &'static str },
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_message_names_program() {
        let err = BridgeError::Spawn {
            program: "/opt/venv/bin/python3".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        };
        let message = err.to_string();
        assert!(message.contains("/opt/venv/bin/python3"));
        assert!(message.contains("No such file"));
    }

    #[test]
    fn test_exit_error_message() {
        let err = BridgeError::WorkerExit(WorkerExit {
            code: Some(3),
            requested: false,
        });
        assert_eq!(err.to_string(), "Worker exited unexpectedly with exit code 3");
    }

    #[test]
    fn test_decode_error_converts() {
        let err: BridgeError = DecodeError::UnrecognizedTag("HEARTBEAT".to_string()).into();
        assert!(err.to_string().contains("HEARTBEAT"));
    }
}
