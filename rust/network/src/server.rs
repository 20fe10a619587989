//! Control channel server
//!
//! Listens on a Unix stream socket and hands every connecting consumer one
//! handshake message with the region descriptor attached, then closes the
//! connection. The socket carries nothing else.

use crate::error::{ControlChannelError, Result};
use crate::protocol::send_with_descriptor;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use vitals_portal_core::{HandshakeMessage, ServerStats, TransportCounters};

/// Capacity of the server event channel
const EVENT_CAPACITY: usize = 64;

/// Something the server did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A consumer connected; credentials are logged, not checked
    ClientConnected { uid: Option<u32>, pid: Option<i32> },
    /// Handshake and descriptor delivered
    HandshakeSent { ring_buffer_size: u64 },
    Error { message: String },
}

/// Control channel server
pub struct ControlServer {
    socket_path: PathBuf,
    accept_task: Option<JoinHandle<()>>,
    events: broadcast::Sender<ServerEvent>,
    counters: Arc<TransportCounters>,
}

impl ControlServer {
    /// Bind `socket_path` and start serving `region_fd`.
    ///
    /// A stale socket left at `socket_path` is removed first; any other kind of
    /// file there is left alone and reported as a bind failure. Bind failures
    /// are fatal.
    #[instrument(skip(region_fd))]
    pub async fn start(socket_path: &Path, region_fd: Arc<OwnedFd>, ring_buffer_size: u64) -> Result<Self> {
        let bind_error = |source| ControlChannelError::Bind {
            path: socket_path.to_path_buf(),
            source,
        };

        match std::fs::symlink_metadata(socket_path) {
            Ok(meta) if meta.file_type().is_socket() => {
                std::fs::remove_file(socket_path).map_err(bind_error)?;
                debug!("Removed stale socket {:?}", socket_path);
            }
            Ok(_) => {
                return Err(bind_error(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(e)),
        }

        let listener = UnixListener::bind(socket_path).map_err(bind_error)?;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600)).map_err(bind_error)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let counters = Arc::new(TransportCounters::new());
        let handshake = HandshakeMessage::new(ring_buffer_size, socket_path.to_string_lossy());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            region_fd,
            handshake,
            events.clone(),
            Arc::clone(&counters),
        ));

        info!("Control server listening on {:?}", socket_path);

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            accept_task: Some(accept_task),
            events,
            counters,
        })
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.server_stats()
    }

    /// Stop accepting and remove the socket file
    pub fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove socket {:?}: {}", self.socket_path, e);
                }
            }
            info!("Control server on {:?} stopped", self.socket_path);
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: UnixListener,
    region_fd: Arc<OwnedFd>,
    handshake: HandshakeMessage,
    events: broadcast::Sender<ServerEvent>,
    counters: Arc<TransportCounters>,
) {
    let message = handshake.to_bytes();

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let region_fd = Arc::clone(&region_fd);
                let events = events.clone();
                let counters = Arc::clone(&counters);
                let ring_buffer_size = handshake.ring_buffer_size;

                tokio::spawn(async move {
                    match serve_client(stream, &region_fd, &message, &events).await {
                        Ok(()) => {
                            counters.record_handshake();
                            let _ = events.send(ServerEvent::HandshakeSent { ring_buffer_size });
                        }
                        Err(e) => {
                            counters.record_handshake_failure();
                            counters.record_error(&e);
                            warn!("Handshake failed: {}", e);
                            let _ = events.send(ServerEvent::Error {
                                message: e.to_string(),
                            });
                        }
                    }
                });
            }
            Err(e) => {
                error!("Accept failed: {}", e);
                counters.record_error(&e);
                let _ = events.send(ServerEvent::Error {
                    message: format!("accept failed: {}", e),
                });
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_client(
    mut stream: UnixStream,
    region_fd: &OwnedFd,
    message: &[u8],
    events: &broadcast::Sender<ServerEvent>,
) -> Result<()> {
    let (uid, pid) = match stream.peer_cred() {
        Ok(cred) => (Some(cred.uid()), cred.pid()),
        Err(e) => {
            debug!("Peer credentials unavailable: {}", e);
            (None, None)
        }
    };
    info!("Consumer connected (uid {:?}, pid {:?})", uid, pid);
    let _ = events.send(ServerEvent::ClientConnected { uid, pid });

    send_with_descriptor(&mut stream, message, region_fd.as_fd()).await?;
    debug!("Sent {} byte handshake with region descriptor", message.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ControlClient;
    use std::time::Duration;

    fn region_fd() -> Arc<OwnedFd> {
        Arc::new(OwnedFd::from(tempfile::tempfile().unwrap()))
    }

    #[tokio::test]
    async fn test_socket_permissions_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.sock");

        let mut server = ControlServer::start(&path, region_fd(), 4096).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(server.is_running());

        server.stop();
        assert!(!path.exists());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let _server = ControlServer::start(&path, region_fd(), 4096).await.unwrap();
        let bootstrap = ControlClient::handshake(&path, Duration::from_secs(1)).await.unwrap();
        assert_eq!(bootstrap.handshake.ring_buffer_size, 4096);
    }

    #[tokio::test]
    async fn test_regular_file_at_socket_path_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        let result = ControlServer::start(&path, region_fd(), 4096).await;
        match result {
            Err(ControlChannelError::Bind { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists)
            }
            other => panic!("expected a bind error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"not a socket");
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let result = ControlServer::start(Path::new("/nonexistent/dir/sensor.sock"), region_fd(), 4096).await;
        assert!(matches!(result, Err(ControlChannelError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_events_for_each_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.sock");

        let server = ControlServer::start(&path, region_fd(), 8192).await.unwrap();
        let mut events = server.subscribe();

        for _ in 0..2 {
            ControlClient::handshake(&path, Duration::from_secs(1)).await.unwrap();
        }

        let mut connected = 0;
        let mut sent = 0;
        while sent < 2 {
            match tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
                ServerEvent::ClientConnected { uid, .. } => {
                    assert_eq!(uid, Some(nix::unistd::getuid().as_raw()));
                    connected += 1;
                }
                ServerEvent::HandshakeSent { ring_buffer_size } => {
                    assert_eq!(ring_buffer_size, 8192);
                    sent += 1;
                }
                ServerEvent::Error { message } => panic!("unexpected error: {}", message),
            }
        }

        assert_eq!(connected, 2);
        assert_eq!(server.stats().handshakes_served, 2);
    }

    #[tokio::test]
    async fn test_drop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.sock");

        {
            let _server = ControlServer::start(&path, region_fd(), 4096).await.unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
