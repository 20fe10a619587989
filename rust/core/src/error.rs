//! Error types for the sensor transport

use thiserror::Error;

use crate::binary_protocol::ProtocolError;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Region allocation, sizing, mapping or socket bind failed
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Connecting to the control socket or receiving the handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Frame does not fit a slot
    #[error("Frame too large: {required} bytes required, frame size is {frame_size}")]
    FrameTooLarge { required: usize, frame_size: usize },

    /// Frame failed type, length or checksum validation
    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    /// Reader was lapped by the writer
    #[error("Ring buffer overrun: {dropped} frames dropped")]
    Overrun { dropped: u64 },

    /// Producer heartbeat is older than the stall threshold
    #[error("Producer stalled: no heartbeat for {elapsed_ms}ms")]
    Stalled { elapsed_ms: u64 },

    /// Operation timed out
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload envelope errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Wire-format violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::Handshake(_) => true,
            TransportError::CorruptFrame(_) => true,
            TransportError::Overrun { .. } => true,
            TransportError::Stalled { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Serialization(_) => true,
            TransportError::Io(err) => {
                matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                        | std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::NotFound
                )
            }
            _ => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::Setup(_) => ErrorCategory::Setup,
            TransportError::Handshake(_) => ErrorCategory::Handshake,
            TransportError::Timeout { .. } => ErrorCategory::Handshake,
            TransportError::FrameTooLarge { .. } => ErrorCategory::Producer,
            TransportError::CorruptFrame(_) => ErrorCategory::Integrity,
            TransportError::Protocol(_) => ErrorCategory::Integrity,
            TransportError::Overrun { .. } => ErrorCategory::Overrun,
            TransportError::Stalled { .. } => ErrorCategory::Liveness,
            TransportError::Io(_) => ErrorCategory::Io,
            TransportError::Serialization(_) => ErrorCategory::Serialization,
            TransportError::Configuration(_) => ErrorCategory::Configuration,
        }
    }
}

/// Error categories for metrics and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Setup,
    Handshake,
    Producer,
    Integrity,
    Overrun,
    Liveness,
    Io,
    Serialization,
    Configuration,
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}
