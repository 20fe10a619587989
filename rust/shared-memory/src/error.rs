//! Shared memory specific error types

use thiserror::Error;
use vitals_portal_core::{ProtocolError, TransportError};

/// Shared memory error types
#[derive(Error, Debug)]
pub enum SharedMemoryError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),

    /// Invalid region size
    #[error("Invalid region size: {size}, expected at least {min}")]
    InvalidSize { size: usize, min: usize },

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MappingFailed(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Header or frame layout violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Frame does not fit a slot
    #[error("Frame too large: {required} bytes required, frame size is {frame_size}")]
    FrameTooLarge { required: usize, frame_size: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, SharedMemoryError>;

impl SharedMemoryError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            SharedMemoryError::FrameTooLarge { .. } => true,
            SharedMemoryError::Io(err) => {
                matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                )
            }
            _ => false,
        }
    }

    /// Convert platform-specific error codes to SharedMemoryError
    #[cfg(unix)]
    pub fn from_errno(errno: nix::errno::Errno, message: impl Into<String>) -> Self {
        use nix::errno::Errno;

        match errno {
            Errno::EACCES | Errno::EPERM => SharedMemoryError::PermissionDenied(message.into()),
            Errno::ENOMEM | Errno::EINVAL => {
                SharedMemoryError::MappingFailed(format!("{}: {}", message.into(), errno))
            }
            _ => SharedMemoryError::Platform(format!("{}: {}", message.into(), errno)),
        }
    }
}

impl From<SharedMemoryError> for TransportError {
    fn from(err: SharedMemoryError) -> Self {
        match err {
            SharedMemoryError::FrameTooLarge {
                required,
                frame_size,
            } => TransportError::FrameTooLarge {
                required,
                frame_size,
            },
            SharedMemoryError::Protocol(e) => TransportError::Protocol(e),
            other => TransportError::Setup(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let err = SharedMemoryError::from_errno(nix::errno::Errno::EACCES, "memfd_create failed");
        assert!(matches!(err, SharedMemoryError::PermissionDenied(_)));

        let err = SharedMemoryError::from_errno(nix::errno::Errno::EMFILE, "memfd_create failed");
        assert!(matches!(err, SharedMemoryError::Platform(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: TransportError = SharedMemoryError::FrameTooLarge {
            required: 5000,
            frame_size: 4096,
        }
        .into();
        assert!(matches!(err, TransportError::FrameTooLarge { required: 5000, .. }));

        let err: TransportError = SharedMemoryError::MappingFailed("mmap".to_string()).into();
        assert!(matches!(err, TransportError::Setup(_)));
    }
}
