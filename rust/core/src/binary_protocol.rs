//! Canonical wire formats for the sensor ring buffer
//!
//! Fixed-layout binary formats shared by the producer and every consumer.
//! There is exactly one definition of each layout so the two ends cannot
//! drift apart.
//!
//! Ring header layout (48 bytes, little-endian):
//! 0-3:   Magic number
//! 4-5:   Layout version
//! 6-7:   Reserved
//! 8-11:  Frame size (bytes per slot)
//! 12-15: Frame count (number of slots)
//! 16-23: Write index (atomic, next slot to write)
//! 24-31: Read index (informational only)
//! 32-39: Heartbeat timestamp (atomic, monotonic milliseconds)
//! 40-43: CRC32 of bytes 0-39 as written at initialization
//! 44-47: Padding
//!
//! Frame header layout (32 bytes, little-endian), payload follows:
//! 0:     Frame type
//! 1-7:   Reserved
//! 8-15:  Timestamp (producer event time, ms since epoch)
//! 16-23: Sequence number
//! 24-27: Payload length
//! 28-31: CRC32 of bytes 0-27 followed by the payload
//!
//! Handshake message layout (124 bytes, little-endian):
//! 0:       Message type
//! 1-3:     Reserved
//! 4-7:     Descriptor placeholder (always zero, the descriptor is ancillary data)
//! 8-15:    Ring buffer size in bytes
//! 16-123:  Advisory socket path, NUL-terminated

use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;

/// Ring buffer magic number - "SMRB" (Shared Memory Ring Buffer)
pub const RING_MAGIC: u32 = 0x534D5242;

/// Ring buffer layout version
pub const RING_VERSION: u16 = 1;

/// Ring header size (bytes)
pub const RING_HEADER_SIZE: usize = 48;

/// Byte offset of the write index within the ring header
pub const WRITE_INDEX_OFFSET: usize = 16;

/// Byte offset of the read index within the ring header
pub const READ_INDEX_OFFSET: usize = 24;

/// Byte offset of the heartbeat timestamp within the ring header
pub const HEARTBEAT_OFFSET: usize = 32;

/// Byte offset of the header checksum
pub const HEADER_CRC_OFFSET: usize = 40;

/// Frame header size (bytes)
pub const FRAME_HEADER_SIZE: usize = 32;

/// Byte offset of the frame checksum within the frame header
pub const FRAME_CRC_OFFSET: usize = 28;

/// Default bytes per frame slot (4KB)
pub const DEFAULT_FRAME_SIZE: u32 = 4096;

/// Default number of frame slots (8MB region with the default frame size)
pub const DEFAULT_FRAME_COUNT: u32 = 2048;

/// Handshake message size (bytes)
pub const HANDSHAKE_SIZE: usize = 124;

/// Size of the advisory socket path field, matches `sockaddr_un::sun_path`
pub const SOCKET_PATH_FIELD_LEN: usize = 108;

/// Frame types (1 byte)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Vitals = 0x01,
    Waveform = 0x02,
    Invalid = 0xFF,
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => FrameType::Vitals,
            0x02 => FrameType::Waveform,
            _ => FrameType::Invalid,
        }
    }
}

/// Control-channel message types (1 byte)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Handshake = 0x01,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(MessageType::Handshake),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Fixed slot geometry of a ring buffer region.
///
/// Never changes after the region is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    pub frame_size: u32,
    pub frame_count: u32,
}

impl RingGeometry {
    /// Create a validated geometry.
    ///
    /// A slot must hold a frame header plus at least one payload byte and be
    /// 8-byte aligned so every slot header starts on an aligned offset.
    pub fn new(frame_size: u32, frame_count: u32) -> Result<Self, ProtocolError> {
        if (frame_size as usize) <= FRAME_HEADER_SIZE {
            return Err(ProtocolError::InvalidGeometry(format!(
                "frame size {} must exceed the {}-byte frame header",
                frame_size, FRAME_HEADER_SIZE
            )));
        }
        if frame_size % 8 != 0 {
            return Err(ProtocolError::InvalidGeometry(format!(
                "frame size {} must be a multiple of 8",
                frame_size
            )));
        }
        if frame_count == 0 {
            return Err(ProtocolError::InvalidGeometry(
                "frame count must be at least 1".to_string(),
            ));
        }

        let geometry = Self { frame_size, frame_count };
        (frame_size as usize)
            .checked_mul(frame_count as usize)
            .and_then(|slots| slots.checked_add(RING_HEADER_SIZE))
            .ok_or_else(|| {
                ProtocolError::InvalidGeometry(format!(
                    "{} x {} bytes overflows the address space",
                    frame_count, frame_size
                ))
            })?;

        Ok(geometry)
    }

    /// Total region size: header plus every slot
    pub fn region_size(&self) -> usize {
        RING_HEADER_SIZE + self.frame_size as usize * self.frame_count as usize
    }

    /// Byte offset of a slot; the index is reduced modulo the frame count
    pub fn slot_offset(&self, index: u64) -> usize {
        let slot = (index % self.frame_count as u64) as usize;
        RING_HEADER_SIZE + slot * self.frame_size as usize
    }

    /// Largest payload a single slot can carry
    pub fn max_payload(&self) -> usize {
        self.frame_size as usize - FRAME_HEADER_SIZE
    }

    /// Slot that follows `index`
    pub fn next_index(&self, index: u64) -> u64 {
        (index + 1) % self.frame_count as u64
    }

    /// Slot that precedes `index`
    pub fn previous_index(&self, index: u64) -> u64 {
        let count = self.frame_count as u64;
        (index % count + count - 1) % count
    }
}

impl Default for RingGeometry {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            frame_count: DEFAULT_FRAME_COUNT,
        }
    }
}

/// Checksum of the header bytes preceding the CRC field, with the mutable
/// cursor and heartbeat fields taken at their initial zero value.
pub fn ring_header_checksum(magic: u32, version: u16, geometry: &RingGeometry) -> u32 {
    let mut buf = BytesMut::with_capacity(HEADER_CRC_OFFSET);
    buf.put_u32_le(magic);
    buf.put_u16_le(version);
    buf.put_u16_le(0);
    buf.put_u32_le(geometry.frame_size);
    buf.put_u32_le(geometry.frame_count);
    buf.put_u64_le(0); // write index
    buf.put_u64_le(0); // read index
    buf.put_u64_le(0); // heartbeat
    crc32fast::hash(&buf)
}

/// Point-in-time copy of a ring header, decoded from raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingHeaderSnapshot {
    pub magic: u32,
    pub version: u16,
    pub frame_size: u32,
    pub frame_count: u32,
    pub write_index: u64,
    pub read_index: u64,
    pub heartbeat_timestamp: u64,
    pub crc32: u32,
}

impl RingHeaderSnapshot {
    /// Header for a freshly initialized region
    pub fn initial(geometry: &RingGeometry) -> Self {
        Self {
            magic: RING_MAGIC,
            version: RING_VERSION,
            frame_size: geometry.frame_size,
            frame_count: geometry.frame_count,
            write_index: 0,
            read_index: 0,
            heartbeat_timestamp: 0,
            crc32: ring_header_checksum(RING_MAGIC, RING_VERSION, geometry),
        }
    }

    /// Decode from the first `RING_HEADER_SIZE` bytes of a region
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < RING_HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: RING_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let mut buf = &bytes[..RING_HEADER_SIZE];
        let magic = buf.get_u32_le();
        let version = buf.get_u16_le();
        let _reserved = buf.get_u16_le();

        Ok(Self {
            magic,
            version,
            frame_size: buf.get_u32_le(),
            frame_count: buf.get_u32_le(),
            write_index: buf.get_u64_le(),
            read_index: buf.get_u64_le(),
            heartbeat_timestamp: buf.get_u64_le(),
            crc32: buf.get_u32_le(),
        })
    }

    /// Serialize header to bytes (little-endian)
    pub fn to_bytes(&self) -> [u8; RING_HEADER_SIZE] {
        let mut bytes = [0u8; RING_HEADER_SIZE];
        let mut buf = &mut bytes[..];

        buf.put_u32_le(self.magic);
        buf.put_u16_le(self.version);
        buf.put_u16_le(0);
        buf.put_u32_le(self.frame_size);
        buf.put_u32_le(self.frame_count);
        buf.put_u64_le(self.write_index);
        buf.put_u64_le(self.read_index);
        buf.put_u64_le(self.heartbeat_timestamp);
        buf.put_u32_le(self.crc32);

        bytes
    }

    /// Check magic, version, checksum and geometry against the mapped length.
    pub fn validate(&self, region_len: usize) -> Result<RingGeometry, ProtocolError> {
        if self.magic != RING_MAGIC {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }

        if self.version != RING_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }

        let geometry = RingGeometry::new(self.frame_size, self.frame_count)?;
        let expected = ring_header_checksum(self.magic, self.version, &geometry);
        if expected != self.crc32 {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: self.crc32,
            });
        }

        if region_len < geometry.region_size() {
            return Err(ProtocolError::InsufficientData {
                needed: geometry.region_size(),
                available: region_len,
            });
        }

        if self.write_index >= self.frame_count as u64 {
            return Err(ProtocolError::InvalidGeometry(format!(
                "write index {} outside {} slots",
                self.write_index, self.frame_count
            )));
        }

        Ok(geometry)
    }
}

/// Fixed-size header at the start of every frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub timestamp: u64,
    pub sequence: u64,
    pub data_size: u32,
    pub crc32: u32,
}

impl FrameHeader {
    /// Write a complete frame (header, payload, checksum) into a zeroed slot.
    ///
    /// Returns the sealed header. The slot is left untouched when the frame
    /// does not fit.
    pub fn encode_into(
        slot: &mut [u8],
        frame_type: FrameType,
        timestamp: u64,
        sequence: u64,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        let required = FRAME_HEADER_SIZE + payload.len();
        if required > slot.len() {
            return Err(ProtocolError::PayloadTooLarge {
                required,
                frame_size: slot.len(),
            });
        }

        {
            let mut buf = &mut slot[..FRAME_CRC_OFFSET];
            buf.put_u8(frame_type as u8);
            buf.put_bytes(0, 7);
            buf.put_u64_le(timestamp);
            buf.put_u64_le(sequence);
            buf.put_u32_le(payload.len() as u32);
        }
        slot[FRAME_HEADER_SIZE..required].copy_from_slice(payload);

        let crc32 = frame_checksum(&slot[..FRAME_CRC_OFFSET], payload);
        slot[FRAME_CRC_OFFSET..FRAME_HEADER_SIZE].copy_from_slice(&crc32.to_le_bytes());

        Ok(Self {
            frame_type,
            timestamp,
            sequence,
            data_size: payload.len() as u32,
            crc32,
        })
    }

    /// Decode the frame header without validating the checksum
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: FRAME_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let mut buf = &bytes[..FRAME_HEADER_SIZE];
        let frame_type = FrameType::from(buf.get_u8());
        buf.advance(7);

        Ok(Self {
            frame_type,
            timestamp: buf.get_u64_le(),
            sequence: buf.get_u64_le(),
            data_size: buf.get_u32_le(),
            crc32: buf.get_u32_le(),
        })
    }

    /// Decode and validate a slot copy, returning the header and its payload.
    ///
    /// The checksum is recomputed over the raw slot bytes, so an unknown type
    /// byte still fails the same way a flipped payload bit does.
    pub fn decode_slot(slot: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        let header = Self::from_bytes(slot)?;

        let end = FRAME_HEADER_SIZE
            .checked_add(header.data_size as usize)
            .filter(|end| *end <= slot.len())
            .ok_or(ProtocolError::InvalidLength {
                data_size: header.data_size,
                frame_size: slot.len(),
            })?;

        let payload = &slot[FRAME_HEADER_SIZE..end];
        let actual = frame_checksum(&slot[..FRAME_CRC_OFFSET], payload);
        if actual != header.crc32 {
            return Err(ProtocolError::ChecksumMismatch {
                expected: header.crc32,
                actual,
            });
        }

        if header.frame_type == FrameType::Invalid {
            return Err(ProtocolError::InvalidFrameType(slot[0]));
        }

        Ok((header, payload))
    }

    /// Total bytes the frame occupies in its slot
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.data_size as usize
    }
}

/// CRC32 over the frame header bytes preceding the checksum, then the payload
pub fn frame_checksum(header_prefix: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header_prefix);
    hasher.update(payload);
    hasher.finalize()
}

/// Handshake sent alongside the region descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub message_type: MessageType,
    pub ring_buffer_size: u64,
    pub socket_path: String,
}

impl HandshakeMessage {
    /// Create a handshake describing a region of `ring_buffer_size` bytes
    pub fn new(ring_buffer_size: u64, socket_path: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Handshake,
            ring_buffer_size,
            socket_path: socket_path.into(),
        }
    }

    /// Serialize to the fixed 124-byte layout.
    ///
    /// The path is truncated on a character boundary so a terminating NUL
    /// always fits.
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut bytes = [0u8; HANDSHAKE_SIZE];
        {
            let mut buf = &mut bytes[..16];
            buf.put_u8(self.message_type as u8);
            buf.put_bytes(0, 3);
            buf.put_u32_le(0);
            buf.put_u64_le(self.ring_buffer_size);
        }

        let mut len = self.socket_path.len().min(SOCKET_PATH_FIELD_LEN - 1);
        while !self.socket_path.is_char_boundary(len) {
            len -= 1;
        }
        bytes[16..16 + len].copy_from_slice(&self.socket_path.as_bytes()[..len]);

        bytes
    }

    /// Deserialize from bytes, rejecting short or unknown messages
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HANDSHAKE_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: HANDSHAKE_SIZE,
                available: bytes.len(),
            });
        }

        let mut buf = &bytes[..16];
        let message_type = MessageType::try_from(buf.get_u8())?;
        buf.advance(3);
        let _descriptor_field = buf.get_u32_le();
        let ring_buffer_size = buf.get_u64_le();

        let path_field = &bytes[16..HANDSHAKE_SIZE];
        let path_len = path_field
            .iter()
            .position(|b| *b == 0)
            .ok_or(ProtocolError::UnterminatedPath)?;
        let socket_path = std::str::from_utf8(&path_field[..path_len])
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_string();

        Ok(Self {
            message_type,
            ring_buffer_size,
            socket_path,
        })
    }
}

/// Protocol errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid magic number: 0x{0:x}")]
    InvalidMagic(u32),

    #[error("Unsupported layout version: {0}")]
    UnsupportedVersion(u16),

    #[error("Insufficient data: need {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },

    #[error("Checksum mismatch: stored 0x{expected:08x}, computed 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Frame too large: {required} bytes required, slot holds {frame_size}")]
    PayloadTooLarge { required: usize, frame_size: usize },

    #[error("Payload length {data_size} does not fit a {frame_size}-byte slot")]
    InvalidLength { data_size: u32, frame_size: usize },

    #[error("Invalid frame type: 0x{0:02x}")]
    InvalidFrameType(u8),

    #[error("Unknown control message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("Invalid ring geometry: {0}")]
    InvalidGeometry(String),

    #[error("Socket path field is not NUL-terminated")]
    UnterminatedPath,

    #[error("Invalid UTF-8 encoding")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    #[test]
    fn test_geometry_validation() {
        assert!(RingGeometry::new(4096, 2048).is_ok());
        assert!(RingGeometry::new(32, 16).is_err());
        assert!(RingGeometry::new(100, 16).is_err());
        assert!(RingGeometry::new(4096, 0).is_err());

        let geometry = RingGeometry::new(4096, 2048).unwrap();
        assert_eq!(geometry.region_size(), RING_HEADER_SIZE + 4096 * 2048);
        assert_eq!(geometry.max_payload(), 4096 - FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_slot_offsets_stay_in_bounds() {
        let geometry = RingGeometry::new(4096, 2048).unwrap();
        for index in 0..geometry.frame_count as u64 {
            let offset = geometry.slot_offset(index);
            assert!(offset + geometry.frame_size as usize <= geometry.region_size());
        }

        assert_eq!(geometry.slot_offset(42), RING_HEADER_SIZE + 42 * 4096);
        assert_eq!(geometry.next_index(2047), 0);
        assert_eq!(geometry.previous_index(0), 2047);
        assert_eq!(geometry.previous_index(42), 41);
    }

    #[test]
    fn test_header_snapshot_matches_sample_dump() {
        let geometry = RingGeometry::new(0x1000, 0x800).unwrap();
        let mut snapshot = RingHeaderSnapshot::initial(&geometry);
        snapshot.write_index = 0x2a;

        let bytes = snapshot.to_bytes();
        assert_eq!(&bytes[8..12], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[12..16], &[0x00, 0x08, 0x00, 0x00]);
        assert_eq!(bytes[WRITE_INDEX_OFFSET], 0x2a);

        let decoded = RingHeaderSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        // The checksum covers the init-time header, so a moving cursor stays valid
        let validated = decoded.validate(geometry.region_size()).unwrap();
        assert_eq!(validated, geometry);
    }

    #[test]
    fn test_header_validation_failures() {
        let geometry = RingGeometry::new(4096, 4).unwrap();
        let good = RingHeaderSnapshot::initial(&geometry);

        let mut bad_magic = good;
        bad_magic.magic = 0xDEADBEEF;
        assert_eq!(
            bad_magic.validate(geometry.region_size()),
            Err(ProtocolError::InvalidMagic(0xDEADBEEF))
        );

        let mut bad_crc = good;
        bad_crc.crc32 ^= 1;
        assert!(matches!(
            bad_crc.validate(geometry.region_size()),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));

        assert!(matches!(
            good.validate(geometry.region_size() - 1),
            Err(ProtocolError::InsufficientData { .. })
        ));

        let mut bad_cursor = good;
        bad_cursor.write_index = 4;
        assert!(bad_cursor.validate(geometry.region_size()).is_err());
    }

    #[test]
    fn test_frame_encode_decode() {
        let mut buf = slot(256);
        let payload = br#"{"hr":72,"spo2":98,"rr":16}"#;

        let header = FrameHeader::encode_into(&mut buf, FrameType::Vitals, 1_700_000_000_000, 7, payload)
            .unwrap();
        assert_eq!(header.data_size as usize, payload.len());
        assert_eq!(header.total_size(), FRAME_HEADER_SIZE + payload.len());

        let (decoded, decoded_payload) = FrameHeader::decode_slot(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn test_flipped_payload_bit_fails_checksum() {
        let mut buf = slot(128);
        FrameHeader::encode_into(&mut buf, FrameType::Waveform, 1, 1, b"waveform").unwrap();

        buf[FRAME_HEADER_SIZE + 3] ^= 0x01;
        assert!(matches!(
            FrameHeader::decode_slot(&buf),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_frame_leaves_slot_untouched() {
        let mut buf = slot(64);
        let payload = vec![0xAB; 64 - FRAME_HEADER_SIZE + 1];

        let result = FrameHeader::encode_into(&mut buf, FrameType::Vitals, 1, 1, &payload);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { required: 65, frame_size: 64 })));
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_zeroed_and_invalid_slots_are_rejected() {
        // A zeroed slot: type 0, empty payload, but the stored checksum is zero
        let buf = slot(64);
        assert!(FrameHeader::decode_slot(&buf).is_err());

        let mut marked = slot(64);
        FrameHeader::encode_into(&mut marked, FrameType::Invalid, 0, 0, &[]).unwrap();
        assert_eq!(
            FrameHeader::decode_slot(&marked),
            Err(ProtocolError::InvalidFrameType(0xFF))
        );
    }

    #[test]
    fn test_corrupt_length_is_bounded() {
        let mut buf = slot(64);
        FrameHeader::encode_into(&mut buf, FrameType::Vitals, 1, 1, b"x").unwrap();
        buf[24..28].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(
            FrameHeader::decode_slot(&buf),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_handshake_layout() {
        let message = HandshakeMessage::new(8_388_656, "/tmp/z-monitor-sensor.sock");
        let bytes = message.to_bytes();

        assert_eq!(bytes.len(), HANDSHAKE_SIZE);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..8], &[0u8; 7]);
        assert_eq!(&bytes[8..16], &8_388_656u64.to_le_bytes());
        assert_eq!(&bytes[16..42], b"/tmp/z-monitor-sensor.sock");
        assert_eq!(bytes[42], 0);

        assert_eq!(HandshakeMessage::from_bytes(&bytes).unwrap(), message);
    }

    #[test]
    fn test_handshake_truncates_long_path() {
        let long_path = "p".repeat(200);
        let bytes = HandshakeMessage::new(1, long_path).to_bytes();
        assert_eq!(bytes[HANDSHAKE_SIZE - 1], 0);

        let decoded = HandshakeMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.socket_path.len(), SOCKET_PATH_FIELD_LEN - 1);
    }

    #[test]
    fn test_handshake_rejects_malformed_input() {
        let bytes = HandshakeMessage::new(4096, "/tmp/s").to_bytes();

        assert!(matches!(
            HandshakeMessage::from_bytes(&bytes[..100]),
            Err(ProtocolError::InsufficientData { needed: HANDSHAKE_SIZE, available: 100 })
        ));

        let mut unknown = bytes;
        unknown[0] = 0x03;
        assert_eq!(
            HandshakeMessage::from_bytes(&unknown),
            Err(ProtocolError::UnknownMessageType(0x03))
        );

        let mut unterminated = bytes;
        unterminated[16..].fill(b'a');
        assert_eq!(
            HandshakeMessage::from_bytes(&unterminated),
            Err(ProtocolError::UnterminatedPath)
        );
    }
}
