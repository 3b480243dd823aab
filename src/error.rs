//! Error types for cube-native-client.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all Arrow Native operations.
///
/// Every protocol-level variant carries enough context (offsets, byte counts,
/// session state) to diagnose a desync without capturing raw bytes.
#[derive(Debug, Error)]
pub enum CubeError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream before a complete frame arrived.
    #[error("Connection closed (expected {expected} bytes, received {received})")]
    ConnectionClosed { expected: usize, received: usize },

    /// Declared frame length exceeds the configured ceiling.
    #[error("Frame length {length} exceeds maximum {max}")]
    FrameTooLarge { length: u32, max: u32 },

    /// Payload cannot be decoded for its declared message type.
    #[error(
        "Malformed {message_type} message at offset {offset}: needed {needed} bytes, {available} available"
    )]
    MalformedMessage {
        message_type: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Frame type byte does not match any known message.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// String field is not valid UTF-8.
    #[error("Invalid UTF-8 in {field} at offset {offset}")]
    InvalidEncoding { field: &'static str, offset: usize },

    /// Arrow IPC chunk framing invariant violated.
    #[error("Invalid Arrow IPC framing at offset {offset}: {reason}")]
    InvalidIpcFraming { offset: usize, reason: String },

    /// Query completed without an Arrow IPC end-of-stream marker.
    #[error("Arrow IPC stream truncated: no end-of-stream marker after {chunks} chunks")]
    TruncatedIpcStream { chunks: usize },

    /// Message not valid for the current session state.
    #[error("Unexpected {event} in state {state}")]
    UnexpectedMessageOrder {
        state: &'static str,
        event: &'static str,
    },

    /// Server answered the handshake with an error.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Server answered the auth request with an error.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server reported a query error (message kept verbatim).
    #[error("{0}")]
    Server(String),

    /// Arrow decoding error.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// I/O did not complete within the configured timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Caller cancelled an in-flight operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Session was closed by the caller.
    #[error("Session closed")]
    SessionClosed,

    /// A previous operation was abandoned mid-frame; the stream is unusable.
    #[error("Session poisoned by an interrupted operation")]
    SessionPoisoned,

    /// Operation not allowed in the current session state.
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CubeError {
    /// Whether the error leaves the byte stream or session unusable.
    ///
    /// Fatal errors require the connection to be discarded.
    pub fn is_fatal(&self) -> bool {
        match self {
            CubeError::Io(_)
            | CubeError::ConnectionClosed { .. }
            | CubeError::FrameTooLarge { .. }
            | CubeError::MalformedMessage { .. }
            | CubeError::UnknownMessageType(_)
            | CubeError::InvalidEncoding { .. }
            | CubeError::UnexpectedMessageOrder { .. }
            | CubeError::HandshakeRejected(_)
            | CubeError::AuthenticationFailed(_)
            | CubeError::Timeout { .. }
            | CubeError::Cancelled
            | CubeError::SessionClosed
            | CubeError::SessionPoisoned => true,
            CubeError::InvalidIpcFraming { .. }
            | CubeError::TruncatedIpcStream { .. }
            | CubeError::Server(_)
            | CubeError::Arrow(_)
            | CubeError::InvalidState { .. }
            | CubeError::Config(_) => false,
        }
    }

    /// Whether the caller may retry on the same or a fresh session.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type alias using CubeError.
pub type Result<T> = std::result::Result<T, CubeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_message_is_verbatim() {
        let err = CubeError::Server("table not found".to_string());
        assert_eq!(err.to_string(), "table not found");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_framing_errors_are_fatal() {
        assert!(CubeError::FrameTooLarge { length: 10, max: 5 }.is_fatal());
        assert!(CubeError::UnknownMessageType(42).is_fatal());
        assert!(CubeError::ConnectionClosed {
            expected: 4,
            received: 1
        }
        .is_fatal());
    }

    #[test]
    fn test_ipc_errors_are_recoverable() {
        let err = CubeError::TruncatedIpcStream { chunks: 2 };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("2 chunks"));
    }

    #[test]
    fn test_unexpected_order_context() {
        let err = CubeError::UnexpectedMessageOrder {
            state: "Idle",
            event: "QueryResponseBatch",
        };
        assert_eq!(err.to_string(), "Unexpected QueryResponseBatch in state Idle");
    }
}
