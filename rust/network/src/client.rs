//! Control channel client
//!
//! Connects once, receives the handshake and region descriptor, and drops the
//! socket. Everything after that happens through shared memory.

use crate::error::{ControlChannelError, Result};
use crate::protocol::recv_with_descriptor;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, instrument};
use vitals_portal_core::{HandshakeMessage, HANDSHAKE_SIZE, RING_HEADER_SIZE};

/// What a consumer needs to map the region
#[derive(Debug)]
pub struct Bootstrap {
    pub descriptor: OwnedFd,
    pub handshake: HandshakeMessage,
}

impl Bootstrap {
    /// Region size advertised by the producer
    pub fn region_size(&self) -> usize {
        self.handshake.ring_buffer_size as usize
    }
}

/// Control channel client
pub struct ControlClient;

impl ControlClient {
    /// Connect to `socket_path` and receive the bootstrap, within `timeout`
    #[instrument]
    pub async fn handshake(socket_path: &Path, timeout: Duration) -> Result<Bootstrap> {
        let result = tokio::time::timeout(timeout, async {
            let stream = Self::connect(socket_path).await?;
            Self::receive_bootstrap(stream).await
        })
        .await;

        result.unwrap_or(Err(ControlChannelError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }))
    }

    /// Open the control connection
    pub async fn connect(socket_path: &Path) -> Result<UnixStream> {
        UnixStream::connect(socket_path)
            .await
            .map_err(|source| ControlChannelError::Connect {
                path: socket_path.to_path_buf(),
                source,
            })
    }

    /// Read the handshake and descriptor, then drop the connection
    pub async fn receive_bootstrap(mut stream: UnixStream) -> Result<Bootstrap> {
        let mut buf = [0u8; HANDSHAKE_SIZE];
        let (received, descriptor) = recv_with_descriptor(&mut stream, &mut buf).await?;
        if received < HANDSHAKE_SIZE {
            return Err(ControlChannelError::ConnectionClosed {
                received,
                expected: HANDSHAKE_SIZE,
            });
        }

        let handshake = HandshakeMessage::from_bytes(&buf)?;
        let descriptor = descriptor.ok_or(ControlChannelError::MissingDescriptor)?;

        let size = handshake.ring_buffer_size;
        if size <= RING_HEADER_SIZE as u64 || usize::try_from(size).is_err() {
            return Err(ControlChannelError::InvalidHandshake(format!(
                "ring buffer size {} is unusable",
                size
            )));
        }

        debug!(
            "Received handshake: {} byte region, advertised path {:?}",
            size, handshake.socket_path
        );

        Ok(Bootstrap { descriptor, handshake })
    }
}
