//! Ring buffer reader
//!
//! Each reader keeps a private slot cursor and the sequence number it expects
//! next; the shared read index is never consulted. Polling is non-blocking and
//! never writes to shared memory.
//!
//! Every frame is copied out of its slot before validation, so a frame torn by
//! a concurrent overwrite fails its checksum instead of being delivered.

use crate::platform::monotonic_millis;
use crate::protocol::RingBufferHeader;
use crate::region::map_read_only;
use crate::Result;
use bytes::Bytes;
use memmap2::Mmap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vitals_portal_core::{
    FrameHeader, ProtocolError, ReaderStats, RingGeometry, RingHeaderSnapshot, SensorRecord,
    StartPosition, TransportConfig, TransportCounters, TransportError, RING_HEADER_SIZE,
};

/// Reader tuning
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub start_position: StartPosition,
    pub stall_threshold: Duration,
    pub max_frames_per_poll: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for ReaderOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            start_position: config.start_position,
            stall_threshold: config.stall_threshold(),
            max_frames_per_poll: config.max_frames_per_poll.max(1),
        }
    }
}

/// Producer liveness as seen by a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Streaming,
    Stalled,
}

/// A validated frame copied out of the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Decode the payload envelope
    pub fn record(&self) -> vitals_portal_core::Result<SensorRecord> {
        SensorRecord::decode(self.header.frame_type, &self.payload)
    }
}

/// Something a poll observed
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    Frame(Frame),
    /// The writer lapped the reader; it resynchronized to the live cursor
    Overrun { dropped: u64 },
    /// A slot failed validation and was skipped
    Corrupt { slot: u64, error: ProtocolError },
    LivenessChanged(LivenessState),
}

/// Totals for a single poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub frames: usize,
    pub dropped: u64,
    pub corrupt: u64,
    pub overrun: bool,
}

/// Read-only consumer of a mapped ring buffer
pub struct RingBufferReader {
    map: Mmap,
    geometry: RingGeometry,
    local_read_index: u64,
    expected_sequence: u64,
    liveness: LivenessState,
    options: ReaderOptions,
    counters: Arc<TransportCounters>,
    scratch: Vec<u8>,
}

impl RingBufferReader {
    /// Map a received descriptor and validate the header
    pub fn attach(fd: OwnedFd, region_size: usize, options: ReaderOptions) -> Result<Self> {
        let map = map_read_only(fd, region_size)?;
        Self::from_mapping(map, options)
    }

    /// Validate an existing mapping and position the cursor
    pub fn from_mapping(map: Mmap, options: ReaderOptions) -> Result<Self> {
        let snapshot = RingHeaderSnapshot::from_bytes(&map[..map.len().min(RING_HEADER_SIZE)])?;
        let geometry = snapshot.validate(map.len())?;

        let mut reader = Self {
            map,
            geometry,
            local_read_index: 0,
            expected_sequence: 0,
            liveness: LivenessState::Streaming,
            options,
            counters: Arc::new(TransportCounters::new()),
            scratch: vec![0u8; geometry.frame_size as usize],
        };

        match reader.options.start_position {
            StartPosition::Live => reader.resync_to_live(),
            StartPosition::Beginning => {
                reader.local_read_index = 0;
                reader.expected_sequence = 0;
            }
        }

        info!(
            "Attached reader: {} slots x {} bytes, cursor {} expecting sequence {}",
            geometry.frame_count, geometry.frame_size, reader.local_read_index, reader.expected_sequence
        );

        Ok(reader)
    }

    fn header(&self) -> &RingBufferHeader {
        // Safety: the mapping is page-aligned, validated and owned by self
        unsafe { RingBufferHeader::from_ptr(self.map.as_ptr()) }
    }

    /// Copy a slot into the scratch buffer and validate it
    fn read_slot(&mut self, slot: u64) -> std::result::Result<FrameHeader, ProtocolError> {
        let offset = self.geometry.slot_offset(slot);
        fence(Ordering::Acquire);
        // Safety: slot_offset keeps the slot inside the mapping; the writer may
        // be mutating it concurrently, which the checksum check below catches
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.map.as_ptr().add(offset),
                self.scratch.as_mut_ptr(),
                self.scratch.len(),
            );
        }
        FrameHeader::decode_slot(&self.scratch).map(|(header, _)| header)
    }

    /// Sequence of the newest published frame, if that slot holds a valid one
    fn newest_sequence(&mut self, write_index: u64) -> Option<u64> {
        let slot = self.geometry.previous_index(write_index);
        self.read_slot(slot).ok().map(|header| header.sequence)
    }

    fn resync_to_live(&mut self) {
        let write_index = self.header().load_write_index() % self.geometry.frame_count as u64;
        self.local_read_index = write_index;
        self.expected_sequence = self
            .newest_sequence(write_index)
            .map(|newest| newest + 1)
            .unwrap_or(0);
    }

    /// Poll and collect everything observed into a vector
    pub fn poll(&mut self) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        self.poll_with(|event| events.push(event));
        events
    }

    /// Poll, handing each event to `on_event`
    pub fn poll_with<F: FnMut(ReaderEvent)>(&mut self, on_event: F) -> PollSummary {
        self.poll_at(monotonic_millis(), on_event)
    }

    /// Poll with an explicit monotonic clock reading
    pub fn poll_at<F: FnMut(ReaderEvent)>(&mut self, now_ms: u64, mut on_event: F) -> PollSummary {
        let mut summary = PollSummary::default();
        self.check_liveness(now_ms, &mut on_event);

        let frame_count = self.geometry.frame_count as u64;
        let write_index = self.header().load_write_index();
        if write_index >= frame_count {
            self.counters.record_corrupt();
            self.counters
                .record_error(format!("write index {} outside {} slots", write_index, frame_count));
            warn!("Corrupt ring header: write index {} >= {}", write_index, frame_count);
            return summary;
        }

        let available = match self.newest_sequence(write_index) {
            Some(newest) if newest >= self.expected_sequence => newest + 1 - self.expected_sequence,
            Some(_) => return summary,
            // Newest slot unreadable: fall back to the slot distance to the cursor
            None => (write_index + frame_count - self.local_read_index) % frame_count,
        };
        if available == 0 {
            return summary;
        }

        if available > frame_count {
            let newest = self.expected_sequence + available - 1;
            let dropped = available;
            self.counters.record_overrun(dropped);
            self.counters.record_error(TransportError::Overrun { dropped });
            warn!("Reader overrun: {} frames dropped, resynchronizing", dropped);
            self.local_read_index = write_index;
            self.expected_sequence = newest + 1;
            summary.overrun = true;
            summary.dropped += dropped;
            on_event(ReaderEvent::Overrun { dropped });
            return summary;
        }

        let budget = available.min(self.options.max_frames_per_poll as u64);
        for _ in 0..budget {
            let slot = self.local_read_index;
            match self.read_slot(slot) {
                Ok(header) if header.sequence < self.expected_sequence => {
                    // Slot not rewritten yet on this lap; pick up again next poll
                    debug!(
                        "Slot {} holds stale sequence {}, expected {}",
                        slot, header.sequence, self.expected_sequence
                    );
                    break;
                }
                Ok(header) => {
                    if header.sequence > self.expected_sequence {
                        let gap = header.sequence - self.expected_sequence;
                        self.counters.record_dropped(gap);
                        summary.dropped += gap;
                        debug!("Sequence gap of {} frames before {}", gap, header.sequence);
                    }

                    let payload = Bytes::copy_from_slice(
                        &self.scratch[vitals_portal_core::FRAME_HEADER_SIZE..header.total_size()],
                    );
                    self.counters.record_read(header.total_size());
                    self.expected_sequence = header.sequence + 1;
                    summary.frames += 1;
                    on_event(ReaderEvent::Frame(Frame { header, payload }));
                }
                Err(error) => {
                    self.counters.record_corrupt();
                    self.counters.record_error(&error);
                    warn!("Dropping corrupt frame in slot {}: {}", slot, error);
                    self.expected_sequence += 1;
                    summary.corrupt += 1;
                    on_event(ReaderEvent::Corrupt { slot, error });
                }
            }
            self.local_read_index = self.geometry.next_index(slot);
        }

        summary
    }

    fn check_liveness<F: FnMut(ReaderEvent)>(&mut self, now_ms: u64, on_event: &mut F) {
        let age = now_ms.saturating_sub(self.header().load_heartbeat());
        let stalled = age > self.options.stall_threshold.as_millis() as u64;

        match (self.liveness, stalled) {
            (LivenessState::Streaming, true) => {
                self.liveness = LivenessState::Stalled;
                self.counters.record_stall();
                warn!("Producer heartbeat is {}ms old, marking stalled", age);
                on_event(ReaderEvent::LivenessChanged(LivenessState::Stalled));
            }
            (LivenessState::Stalled, false) => {
                self.liveness = LivenessState::Streaming;
                info!("Producer heartbeat resumed");
                on_event(ReaderEvent::LivenessChanged(LivenessState::Streaming));
            }
            _ => {}
        }
    }

    /// Age of the producer heartbeat
    pub fn heartbeat_age(&self) -> Duration {
        Duration::from_millis(monotonic_millis().saturating_sub(self.header().load_heartbeat()))
    }

    pub fn liveness(&self) -> LivenessState {
        self.liveness
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    /// Private slot cursor
    pub fn local_read_index(&self) -> u64 {
        self.local_read_index
    }

    pub fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    /// Share counters with an outer component
    pub fn with_counters(mut self, counters: Arc<TransportCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> Arc<TransportCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> ReaderStats {
        self.counters.reader_stats()
    }
}

impl std::fmt::Debug for RingBufferReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferReader")
            .field("geometry", &self.geometry)
            .field("local_read_index", &self.local_read_index)
            .field("expected_sequence", &self.expected_sequence)
            .field("liveness", &self.liveness)
            .finish()
    }
}
