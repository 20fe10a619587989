//! Single-producer frame writer
//!
//! The writer owns the read-write mapping, fills slots in order and publishes
//! each frame by advancing the write cursor with release ordering. It never
//! waits for readers: a lagging reader simply loses overwritten frames.

use crate::platform::{monotonic_millis, PlatformOptimizations};
use crate::protocol::RingBufferHeader;
use crate::region::SharedRegion;
use crate::{Result, SharedMemoryError};
use memmap2::MmapRaw;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vitals_portal_core::{
    FrameHeader, FrameType, ProtocolError, RingGeometry, SensorRecord, TransportCounters,
    WriterStats, FRAME_HEADER_SIZE,
};

/// Frame writer over a freshly initialized region
pub struct FrameWriter {
    map: Arc<MmapRaw>,
    geometry: RingGeometry,
    write_index: u64,
    next_sequence: u64,
    counters: Arc<TransportCounters>,
}

impl FrameWriter {
    /// Map `region` and initialize its header and every slot.
    ///
    /// The region must be exactly `geometry.region_size()` bytes.
    pub fn initialize(region: &SharedRegion, geometry: RingGeometry) -> Result<Self> {
        if region.size() != geometry.region_size() {
            return Err(SharedMemoryError::InvalidSize {
                size: region.size(),
                min: geometry.region_size(),
            });
        }

        let map = region.map_writable()?;
        if let Err(e) = PlatformOptimizations::advise_will_need(map.as_mut_ptr(), map.len()) {
            debug!("Ignoring madvise failure: {}", e);
        }

        let base = map.as_mut_ptr();
        for slot in 0..geometry.frame_count as u64 {
            let offset = geometry.slot_offset(slot);
            // Safety: slot_offset keeps every slot inside the mapped region
            unsafe {
                std::ptr::write_bytes(base.add(offset), 0, geometry.frame_size as usize);
                *base.add(offset) = FrameType::Invalid as u8;
            }
        }

        // Safety: the mapping is page-aligned and at least a header long
        unsafe { RingBufferHeader::initialize(base, &geometry, monotonic_millis()) };

        info!(
            "Initialized ring buffer: {} slots x {} bytes ({} bytes total)",
            geometry.frame_count,
            geometry.frame_size,
            geometry.region_size()
        );

        Ok(Self {
            map: Arc::new(map),
            geometry,
            write_index: 0,
            next_sequence: 0,
            counters: Arc::new(TransportCounters::new()),
        })
    }

    fn header(&self) -> &RingBufferHeader {
        // Safety: the mapping outlives self and was initialized in `initialize`
        unsafe { RingBufferHeader::from_ptr(self.map.as_ptr()) }
    }

    /// Write one frame and return its sequence number.
    ///
    /// An oversized payload fails without touching the slot or the write
    /// cursor. The heartbeat is stamped either way.
    pub fn write_frame(&mut self, frame_type: FrameType, timestamp: u64, payload: &[u8]) -> Result<u64> {
        let result = self.write_slot(frame_type, timestamp, payload);
        self.heartbeat();
        result
    }

    fn write_slot(&mut self, frame_type: FrameType, timestamp: u64, payload: &[u8]) -> Result<u64> {
        let required = FRAME_HEADER_SIZE + payload.len();
        let frame_size = self.geometry.frame_size as usize;
        if required > frame_size {
            self.counters.record_oversize();
            warn!("Rejected {} byte frame, frame size is {}", required, frame_size);
            return Err(SharedMemoryError::FrameTooLarge {
                required,
                frame_size,
            });
        }

        let offset = self.geometry.slot_offset(self.write_index);
        // Safety: the slot lies inside the mapping and only this writer mutates it
        let slot = unsafe {
            std::slice::from_raw_parts_mut(self.map.as_mut_ptr().add(offset), frame_size)
        };
        slot.fill(0);

        let sequence = self.next_sequence;
        FrameHeader::encode_into(slot, frame_type, timestamp, sequence, payload).map_err(
            |e| match e {
                ProtocolError::PayloadTooLarge {
                    required,
                    frame_size,
                } => SharedMemoryError::FrameTooLarge {
                    required,
                    frame_size,
                },
                other => SharedMemoryError::Protocol(other),
            },
        )?;

        self.write_index = self.geometry.next_index(self.write_index);
        self.next_sequence += 1;
        self.header().publish_write_index(self.write_index);
        self.counters.record_write(required);

        Ok(sequence)
    }

    /// Encode a record into the payload envelope and write it
    pub fn write_record(&mut self, timestamp: u64, record: &SensorRecord) -> vitals_portal_core::Result<u64> {
        let payload = record.encode()?;
        Ok(self.write_frame(record.frame_type(), timestamp, &payload)?)
    }

    /// Stamp liveness without writing a frame
    pub fn heartbeat(&self) {
        self.header().store_heartbeat(monotonic_millis());
    }

    /// Handle for an idle ticker running beside the writer
    pub fn heartbeat_handle(&self) -> HeartbeatHandle {
        HeartbeatHandle {
            map: Arc::clone(&self.map),
        }
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    /// Slot the next frame goes into
    pub fn write_index(&self) -> u64 {
        self.write_index
    }

    /// Sequence number the next frame gets
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn counters(&self) -> Arc<TransportCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> WriterStats {
        self.counters.writer_stats()
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("geometry", &self.geometry)
            .field("write_index", &self.write_index)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

/// Touches only the heartbeat field, so it may run concurrently with the writer
#[derive(Clone)]
pub struct HeartbeatHandle {
    map: Arc<MmapRaw>,
}

impl HeartbeatHandle {
    pub fn beat(&self) {
        // Safety: the shared mapping is kept alive by the Arc
        let header = unsafe { RingBufferHeader::from_ptr(self.map.as_ptr()) };
        header.store_heartbeat(monotonic_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitals_portal_core::{RingHeaderSnapshot, VitalsRecord, RING_HEADER_SIZE};

    fn writer(frame_size: u32, frame_count: u32) -> (SharedRegion, FrameWriter) {
        let geometry = RingGeometry::new(frame_size, frame_count).unwrap();
        let region = SharedRegion::create(geometry.region_size()).unwrap();
        let writer = FrameWriter::initialize(&region, geometry).unwrap();
        (region, writer)
    }

    fn region_bytes(writer: &FrameWriter) -> &[u8] {
        unsafe { std::slice::from_raw_parts(writer.map.as_ptr(), writer.map.len()) }
    }

    #[test]
    fn test_initialized_header_and_slots() {
        let (_region, writer) = writer(128, 8);
        let bytes = region_bytes(&writer);

        let snapshot = RingHeaderSnapshot::from_bytes(bytes).unwrap();
        assert_eq!(snapshot.validate(bytes.len()).unwrap(), writer.geometry());
        assert_eq!(snapshot.write_index, 0);
        assert!(snapshot.heartbeat_timestamp > 0);

        for slot in 0..8u64 {
            let offset = writer.geometry().slot_offset(slot);
            assert_eq!(bytes[offset], FrameType::Invalid as u8);
            assert!(bytes[offset + 1..offset + 128].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_write_advances_cursor_and_wraps() {
        let (_region, mut writer) = writer(128, 4);

        for expected in 0..6u64 {
            let sequence = writer.write_frame(FrameType::Vitals, 1000 + expected, b"{}").unwrap();
            assert_eq!(sequence, expected);
        }

        assert_eq!(writer.write_index(), 2);
        let snapshot = RingHeaderSnapshot::from_bytes(region_bytes(&writer)).unwrap();
        assert_eq!(snapshot.write_index, 2);

        let stats = writer.stats();
        assert_eq!(stats.frames_written, 6);
        assert_eq!(stats.bytes_written, 6 * (FRAME_HEADER_SIZE as u64 + 2));
    }

    #[test]
    fn test_written_slot_validates() {
        let (_region, mut writer) = writer(256, 4);
        writer.write_frame(FrameType::Waveform, 77, b"samples").unwrap();

        let offset = writer.geometry().slot_offset(0);
        let slot = &region_bytes(&writer)[offset..offset + 256];
        let (header, payload) = FrameHeader::decode_slot(slot).unwrap();

        assert_eq!(header.frame_type, FrameType::Waveform);
        assert_eq!(header.timestamp, 77);
        assert_eq!(header.sequence, 0);
        assert_eq!(payload, b"samples");
    }

    #[test]
    fn test_oversized_frame_is_rejected_without_side_effects() {
        let (_region, mut writer) = writer(64, 4);
        writer.write_frame(FrameType::Vitals, 1, b"ok").unwrap();
        let before = region_bytes(&writer)[RING_HEADER_SIZE..].to_vec();

        let payload = vec![0u8; 64 - FRAME_HEADER_SIZE + 1];
        let result = writer.write_frame(FrameType::Vitals, 2, &payload);

        assert!(matches!(
            result,
            Err(SharedMemoryError::FrameTooLarge { required: 65, frame_size: 64 })
        ));
        assert_eq!(writer.write_index(), 1);
        assert_eq!(writer.next_sequence(), 1);
        assert_eq!(&region_bytes(&writer)[RING_HEADER_SIZE..], &before[..]);
        assert_eq!(writer.stats().oversize_rejections, 1);
    }

    #[test]
    fn test_heartbeat_stamped_on_failure() {
        let (_region, mut writer) = writer(64, 2);
        let header = writer.header();
        header.store_heartbeat(1);

        let _ = writer.write_frame(FrameType::Vitals, 1, &[0u8; 128]);
        assert!(writer.header().load_heartbeat() > 1);
    }

    #[test]
    fn test_heartbeat_handle() {
        let (_region, writer) = writer(64, 2);
        writer.header().store_heartbeat(1);

        let handle = writer.heartbeat_handle();
        std::thread::spawn(move || handle.beat()).join().unwrap();

        assert!(writer.header().load_heartbeat() > 1);
    }

    #[test]
    fn test_write_record() {
        let (_region, mut writer) = writer(256, 2);
        let record = SensorRecord::Vitals(VitalsRecord::new(72, 98, 16));
        let sequence = writer.write_record(5, &record).unwrap();
        assert_eq!(sequence, 0);

        let offset = writer.geometry().slot_offset(0);
        let slot = &region_bytes(&writer)[offset..offset + 256];
        let (header, payload) = FrameHeader::decode_slot(slot).unwrap();
        assert_eq!(SensorRecord::decode(header.frame_type, payload).unwrap(), record);
    }

    #[test]
    fn test_region_size_mismatch() {
        let geometry = RingGeometry::new(64, 4).unwrap();
        let region = SharedRegion::create(geometry.region_size() + 8).unwrap();
        assert!(matches!(
            FrameWriter::initialize(&region, geometry),
            Err(SharedMemoryError::InvalidSize { .. })
        ));
    }
}
