//! Transport counters
//!
//! Per-frame anomalies never fail the transport; they are aggregated here and
//! surfaced as serializable snapshots.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared between the data path and observers
#[derive(Debug, Default)]
pub struct TransportCounters {
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
    oversize_rejections: AtomicU64,
    frames_read: AtomicU64,
    bytes_read: AtomicU64,
    corrupt_frames: AtomicU64,
    dropped_frames: AtomicU64,
    overruns: AtomicU64,
    stalls: AtomicU64,
    decode_failures: AtomicU64,
    handshakes_served: AtomicU64,
    handshake_failures: AtomicU64,
    last_error: parking_lot::Mutex<Option<String>>,
}

impl TransportCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, bytes: usize) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_oversize(&self) {
        self.oversize_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_corrupt(&self) {
        self.corrupt_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, frames: u64) {
        self.dropped_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_overrun(&self, dropped: u64) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
        self.record_dropped(dropped);
    }

    pub fn record_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake(&self) {
        self.handshakes_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: impl ToString) {
        *self.last_error.lock() = Some(error.to_string());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn reader_stats(&self) -> ReaderStats {
        ReaderStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }

    pub fn writer_stats(&self) -> WriterStats {
        WriterStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            oversize_rejections: self.oversize_rejections.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }

    pub fn server_stats(&self) -> ServerStats {
        ServerStats {
            handshakes_served: self.handshakes_served.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }
}

/// Consumer-side snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderStats {
    pub frames_read: u64,
    pub bytes_read: u64,
    pub corrupt_frames: u64,
    pub dropped_frames: u64,
    pub overruns: u64,
    pub stalls: u64,
    pub decode_failures: u64,
    pub last_error: Option<String>,
}

/// Producer-side snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub frames_written: u64,
    pub bytes_written: u64,
    pub oversize_rejections: u64,
    pub last_error: Option<String>,
}

/// Control server snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub handshakes_served: u64,
    pub handshake_failures: u64,
    pub last_error: Option<String>,
}
