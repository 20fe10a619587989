//! Consumer data source
//!
//! Drives the connection state machine
//! `Disconnected -> Connecting -> Handshaking -> Streaming <-> Stalled -> Disconnected`
//! and publishes decoded records, state changes, overruns and errors on an
//! async channel.
//!
//! Connection phases run on the async runtime. Once a region is mapped, the
//! polling loop moves to a blocking thread and spins, yields and sleeps
//! between empty polls.

use crate::{
    ControlClient, FrameHeader, LivenessState, ReaderEvent, ReaderOptions,
    ReaderStats, Result, RingBufferReader, SensorRecord, SpinBackoff, TransportConfig,
    TransportCounters, TransportError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Consumer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Streaming,
    Stalled,
}

/// Events published to collaborators
#[derive(Debug)]
pub enum SourceEvent {
    Record {
        sequence: u64,
        timestamp_ms: u64,
        record: SensorRecord,
    },
    StateChanged(ConnectionState),
    Overrun {
        dropped: u64,
    },
    Error(TransportError),
}

/// Why a streaming session ended
#[derive(Debug)]
enum SessionEnd {
    Stopped,
    ReceiverClosed,
    ProducerLost { stalled_for: Duration },
}

/// State shared between the handle and the background task
struct Shared {
    config: TransportConfig,
    state: Mutex<ConnectionState>,
    counters: Arc<TransportCounters>,
    stop: AtomicBool,
    wake: Notify,
}

impl Shared {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Record the new state, returning the event to publish if it changed
    fn transition(&self, next: ConnectionState) -> Option<SourceEvent> {
        let mut state = self.state.lock();
        if *state == next {
            return None;
        }
        debug!("Connection state {:?} -> {:?}", *state, next);
        *state = next;
        Some(SourceEvent::StateChanged(next))
    }
}

/// Shared-memory sensor data source
pub struct SensorDataSource {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl SensorDataSource {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                counters: Arc::new(TransportCounters::new()),
                stop: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            task: None,
        }
    }

    /// Start connecting and streaming; events arrive on the returned receiver
    pub fn start(&mut self) -> Result<mpsc::Receiver<SourceEvent>> {
        if self.task.is_some() {
            return Err(TransportError::Configuration(
                "data source already started".to_string(),
            ));
        }
        self.shared.config.validate()?;

        self.shared.stop.store(false, Ordering::Release);
        let (tx, rx) = mpsc::channel(self.shared.config.event_channel_capacity);
        self.task = Some(tokio::spawn(run(Arc::clone(&self.shared), tx)));

        Ok(rx)
    }

    /// Stop streaming and wait for the background task to finish
    pub async fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_one();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Data source task ended abnormally: {}", e);
            }
        }
        *self.shared.state.lock() = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn stats(&self) -> ReaderStats {
        self.shared.counters.reader_stats()
    }
}

impl Drop for SensorDataSource {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

/// Resolves once `stop` has been requested
async fn stop_requested(shared: &Shared) {
    while !shared.stopped() {
        shared.wake.notified().await;
    }
}

/// Send from the async side; gives up when the receiver is gone or stop is requested
async fn publish(shared: &Shared, tx: &mpsc::Sender<SourceEvent>, event: Option<SourceEvent>) -> bool {
    let Some(event) = event else {
        return true;
    };
    if shared.stopped() {
        return false;
    }
    tokio::select! {
        sent = tx.send(event) => sent.is_ok(),
        _ = stop_requested(shared) => false,
    }
}

/// Outcome of handing an event over from the polling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Stopped,
    Closed,
}

/// Send from the polling thread, waiting out a full channel until stop is requested
fn deliver(shared: &Shared, tx: &mpsc::Sender<SourceEvent>, mut event: SourceEvent) -> Delivery {
    loop {
        match tx.try_send(event) {
            Ok(()) => return Delivery::Sent,
            Err(TrySendError::Closed(_)) => return Delivery::Closed,
            Err(TrySendError::Full(pending)) => {
                if shared.stopped() {
                    return Delivery::Stopped;
                }
                event = pending;
                std::thread::sleep(shared.config.poll_interval());
            }
        }
    }
}

async fn run(shared: Arc<Shared>, tx: mpsc::Sender<SourceEvent>) {
    let mut attempt: u32 = 0;

    while !shared.stopped() {
        let reader = match connect(&shared, &tx).await {
            Ok(Some(reader)) => reader,
            Ok(None) => break,
            Err(e) => {
                shared.counters.record_handshake_failure();
                shared.counters.record_error(&e);
                warn!("Connection attempt {} failed: {}", attempt + 1, e);

                let delay = shared.config.reconnect_delay(attempt);
                attempt = attempt.saturating_add(1);
                if !publish(&shared, &tx, Some(SourceEvent::Error(e))).await
                    || !publish(&shared, &tx, shared.transition(ConnectionState::Disconnected)).await
                {
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shared.wake.notified() => {}
                }
                continue;
            }
        };

        attempt = 0;
        if !publish(&shared, &tx, shared.transition(ConnectionState::Streaming)).await {
            break;
        }

        let session_shared = Arc::clone(&shared);
        let session_tx = tx.clone();
        let end = tokio::task::spawn_blocking(move || stream_frames(reader, &session_shared, &session_tx)).await;

        match end {
            Ok(SessionEnd::Stopped) | Ok(SessionEnd::ReceiverClosed) => break,
            Ok(SessionEnd::ProducerLost { stalled_for }) => {
                warn!(
                    "Producer silent for {}ms, reconnecting",
                    stalled_for.as_millis()
                );
                let error = TransportError::Stalled {
                    elapsed_ms: stalled_for.as_millis() as u64,
                };
                if !publish(&shared, &tx, Some(SourceEvent::Error(error))).await
                    || !publish(&shared, &tx, shared.transition(ConnectionState::Disconnected)).await
                {
                    break;
                }
            }
            Err(e) => {
                warn!("Streaming task failed: {}", e);
                break;
            }
        }
    }

    if let Some(event) = shared.transition(ConnectionState::Disconnected) {
        let _ = tx.try_send(event);
    }
    info!("Data source stopped");
}

/// Connect, handshake and map the region. `Ok(None)` means stop was requested.
#[instrument(skip_all, fields(socket = ?shared.config.socket_path))]
async fn connect(shared: &Shared, tx: &mpsc::Sender<SourceEvent>) -> Result<Option<RingBufferReader>> {
    let config = &shared.config;
    let timeout = config.handshake_timeout();
    let timeout_error = || TransportError::Timeout {
        timeout_ms: config.handshake_timeout_ms,
    };

    if !publish(shared, tx, shared.transition(ConnectionState::Connecting)).await || shared.stopped() {
        return Ok(None);
    }
    let stream = tokio::time::timeout(timeout, ControlClient::connect(&config.socket_path))
        .await
        .map_err(|_| timeout_error())??;

    if !publish(shared, tx, shared.transition(ConnectionState::Handshaking)).await || shared.stopped() {
        return Ok(None);
    }
    let bootstrap = tokio::time::timeout(timeout, ControlClient::receive_bootstrap(stream))
        .await
        .map_err(|_| timeout_error())??;

    let region_size = bootstrap.region_size();
    let reader = RingBufferReader::attach(bootstrap.descriptor, region_size, ReaderOptions::from(config))
        .map_err(|e| TransportError::Handshake(format!("cannot map region: {}", e)))?
        .with_counters(Arc::clone(&shared.counters));

    info!("Mapped {} byte region, streaming", region_size);
    Ok(Some(reader))
}

fn stream_frames(
    mut reader: RingBufferReader,
    shared: &Shared,
    tx: &mpsc::Sender<SourceEvent>,
) -> SessionEnd {
    let config = &shared.config;
    let mut backoff = SpinBackoff::new(config.spin_count, config.poll_interval());

    loop {
        if shared.stopped() {
            return SessionEnd::Stopped;
        }

        let mut halted = Delivery::Sent;
        let summary = reader.poll_with(|event| {
            if halted != Delivery::Sent {
                return;
            }
            let out = match event {
                ReaderEvent::Frame(frame) => match frame.record() {
                    Ok(record) => Some(record_event(&frame.header, record)),
                    Err(e) => {
                        shared.counters.record_decode_failure();
                        shared.counters.record_error(&e);
                        warn!("Undecodable payload in frame {}: {}", frame.header.sequence, e);
                        Some(SourceEvent::Error(e))
                    }
                },
                ReaderEvent::Overrun { dropped } => Some(SourceEvent::Overrun { dropped }),
                ReaderEvent::Corrupt { slot, error } => Some(SourceEvent::Error(TransportError::CorruptFrame(
                    format!("slot {}: {}", slot, error),
                ))),
                ReaderEvent::LivenessChanged(LivenessState::Stalled) => shared.transition(ConnectionState::Stalled),
                ReaderEvent::LivenessChanged(LivenessState::Streaming) => {
                    shared.transition(ConnectionState::Streaming)
                }
            };

            if let Some(out) = out {
                halted = deliver(shared, tx, out);
            }
        });

        match halted {
            Delivery::Closed => return SessionEnd::ReceiverClosed,
            Delivery::Stopped => return SessionEnd::Stopped,
            Delivery::Sent => {}
        }

        if reader.liveness() == LivenessState::Stalled {
            let stalled_for = reader.heartbeat_age();
            if stalled_for > config.reconnect_after_stall() {
                return SessionEnd::ProducerLost { stalled_for };
            }
        }

        if summary.frames > 0 || summary.corrupt > 0 || summary.overrun {
            backoff.reset();
        } else {
            backoff.snooze();
        }
    }
}

fn record_event(header: &FrameHeader, record: SensorRecord) -> SourceEvent {
    SourceEvent::Record {
        sequence: header.sequence,
        timestamp_ms: header.timestamp,
        record,
    }
}
