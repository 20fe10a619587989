//! In-memory overlay of the ring buffer header
//!
//! Byte layout is defined once in `vitals_portal_core::binary_protocol`; this
//! overlay gives typed atomic access to the two fields that change after
//! initialization.

use std::sync::atomic::{AtomicU64, Ordering};
use vitals_portal_core::{
    ring_header_checksum, RingGeometry, RingHeaderSnapshot, HEARTBEAT_OFFSET, RING_HEADER_SIZE,
    RING_MAGIC, RING_VERSION, WRITE_INDEX_OFFSET,
};

/// Ring buffer header as it sits at offset 0 of the region (native endian)
#[repr(C)]
pub struct RingBufferHeader {
    pub magic: u32,
    pub version: u16,
    _reserved: u16,
    pub frame_size: u32,
    pub frame_count: u32,
    /// Next slot the writer fills, always below `frame_count`
    pub write_index: AtomicU64,
    /// Informational; readers keep private cursors
    pub read_index: AtomicU64,
    /// Monotonic milliseconds of the last producer heartbeat
    pub heartbeat_timestamp: AtomicU64,
    pub crc32: u32,
    _padding: u32,
}

const _: () = assert!(std::mem::size_of::<RingBufferHeader>() == RING_HEADER_SIZE);
const _: () = assert!(std::mem::align_of::<RingBufferHeader>() == 8);

impl RingBufferHeader {
    /// Overlay the header on a mapped region.
    ///
    /// # Safety
    /// `base` must point to at least `RING_HEADER_SIZE` mapped bytes, be 8-byte
    /// aligned and outlive the returned reference.
    pub unsafe fn from_ptr<'a>(base: *const u8) -> &'a Self {
        &*(base as *const Self)
    }

    /// Write a fresh header for `geometry`.
    ///
    /// # Safety
    /// Same requirements as [`from_ptr`](Self::from_ptr), and the region must
    /// be writable with no concurrent readers of the header yet.
    pub unsafe fn initialize(base: *mut u8, geometry: &RingGeometry, heartbeat_ms: u64) {
        std::ptr::write(
            base as *mut Self,
            Self {
                magic: RING_MAGIC,
                version: RING_VERSION,
                _reserved: 0,
                frame_size: geometry.frame_size,
                frame_count: geometry.frame_count,
                write_index: AtomicU64::new(0),
                read_index: AtomicU64::new(0),
                heartbeat_timestamp: AtomicU64::new(heartbeat_ms),
                crc32: ring_header_checksum(RING_MAGIC, RING_VERSION, geometry),
                _padding: 0,
            },
        );
    }

    pub fn geometry(&self) -> RingGeometry {
        RingGeometry {
            frame_size: self.frame_size,
            frame_count: self.frame_count,
        }
    }

    /// Acquire-load the write cursor
    pub fn load_write_index(&self) -> u64 {
        self.write_index.load(Ordering::Acquire)
    }

    /// Release-store the write cursor
    pub fn publish_write_index(&self, index: u64) {
        self.write_index.store(index, Ordering::Release);
    }

    pub fn load_heartbeat(&self) -> u64 {
        self.heartbeat_timestamp.load(Ordering::Acquire)
    }

    pub fn store_heartbeat(&self, millis: u64) {
        self.heartbeat_timestamp.store(millis, Ordering::Release);
    }

    /// Snapshot with atomics loaded, for validation and diagnostics
    pub fn snapshot(&self) -> RingHeaderSnapshot {
        RingHeaderSnapshot {
            magic: self.magic,
            version: self.version,
            frame_size: self.frame_size,
            frame_count: self.frame_count,
            write_index: self.load_write_index(),
            read_index: self.read_index.load(Ordering::Relaxed),
            heartbeat_timestamp: self.load_heartbeat(),
            crc32: self.crc32,
        }
    }
}

impl std::fmt::Debug for RingBufferHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferHeader")
            .field("magic", &format_args!("0x{:08x}", self.magic))
            .field("version", &self.version)
            .field("frame_size", &self.frame_size)
            .field("frame_count", &self.frame_count)
            .field("write_index", &self.load_write_index())
            .field("heartbeat_timestamp", &self.load_heartbeat())
            .finish()
    }
}

// Field offsets must agree with the canonical byte layout
const _: () = assert!(WRITE_INDEX_OFFSET == 16 && HEARTBEAT_OFFSET == 32);
