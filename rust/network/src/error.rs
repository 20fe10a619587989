//! Control channel error types

use std::path::PathBuf;
use thiserror::Error;
use vitals_portal_core::{ProtocolError, TransportError};

/// Control channel error types
#[derive(Error, Debug)]
pub enum ControlChannelError {
    /// Binding or configuring the listening socket failed
    #[error("Failed to bind control socket {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the control socket failed
    #[error("Failed to connect to control socket {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Handshake did not complete in time
    #[error("Handshake timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Peer closed the connection before the full message arrived
    #[error("Connection closed after {received} of {expected} handshake bytes")]
    ConnectionClosed { received: usize, expected: usize },

    /// Handshake arrived without a region descriptor
    #[error("Handshake carried no descriptor")]
    MissingDescriptor,

    /// Handshake advertised an unusable region
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Malformed handshake bytes
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, ControlChannelError>;

impl ControlChannelError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ControlChannelError::Bind { .. })
    }
}

impl From<ControlChannelError> for TransportError {
    fn from(err: ControlChannelError) -> Self {
        match err {
            ControlChannelError::Bind { .. } => TransportError::Setup(err.to_string()),
            ControlChannelError::Timeout { timeout_ms } => TransportError::Timeout { timeout_ms },
            other => TransportError::Handshake(other.to_string()),
        }
    }
}
