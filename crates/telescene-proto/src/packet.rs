//! Packet framing.
//!
//! Every wire message travels in one frame:
//!
//! ```text
//! offset 0:  marker (u32)
//! offset 4:  version_major (u16)
//! offset 6:  version_minor (u16)
//! offset 8:  routing_id (u16)
//! offset 10: message_id (u16)
//! offset 12: payload_size (u16)
//! offset 14: flags (u8)
//! offset 15: reserved (u8)
//! offset 16: payload bytes
//! then:      CRC-16 unless the NO_CRC flag is set
//! ```
//!
//! [`PacketWriter`] builds one frame: typed writes into the payload, then
//! [`PacketWriter::finalise`] stamps the payload size and appends the CRC.
//! [`PacketReader`] parses a frame in place from a byte slice without
//! copying or modifying it.

use crate::{
    PACKET_MARKER, VERSION_MAJOR, VERSION_MINOR,
    codec::{ReadCursor, WriteCursor},
    crc::crc16,
    error::{Result, WireError},
    version_compatible,
};

/// Packet header flag bits.
pub struct PacketFlag;

impl PacketFlag {
    /// The packet carries no trailing CRC.
    pub const NO_CRC: u8 = 1 << 0;
}

/// Decoded packet header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol major version stamped on the packet.
    pub version_major: u16,
    /// Protocol minor version stamped on the packet.
    pub version_minor: u16,
    /// Handler selector.
    pub routing_id: u16,
    /// Sub-selector interpreted by the routed handler.
    pub message_id: u16,
    /// Payload byte count.
    pub payload_size: u16,
    /// Flag bits ([`PacketFlag`]).
    pub flags: u8,
}

impl PacketHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 16;
    /// Trailing CRC size in bytes.
    pub const CRC_SIZE: usize = 2;
    /// Largest payload a single packet can carry: the total frame is capped
    /// at 65535 bytes.
    pub const MAX_PAYLOAD: usize = u16::MAX as usize - Self::SIZE - Self::CRC_SIZE;

    /// Parse a header from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// [`WireError::ShortRead`] when fewer than [`Self::SIZE`] bytes are
    /// available, [`WireError::BadMarker`] when the sentinel is absent.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ReadCursor::new(bytes);
        let marker = cursor.read_u32()?;
        if marker != PACKET_MARKER {
            return Err(WireError::BadMarker { found: marker });
        }
        let version_major = cursor.read_u16()?;
        let version_minor = cursor.read_u16()?;
        let routing_id = cursor.read_u16()?;
        let message_id = cursor.read_u16()?;
        let payload_size = cursor.read_u16()?;
        let flags = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        Ok(Self { version_major, version_minor, routing_id, message_id, payload_size, flags })
    }

    /// True when the frame carries a trailing CRC.
    #[must_use]
    pub fn has_crc(&self) -> bool {
        self.flags & PacketFlag::NO_CRC == 0
    }

    /// Total frame size: header, payload and CRC when present.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        let crc = if self.has_crc() { Self::CRC_SIZE } else { 0 };
        Self::SIZE + self.payload_size as usize + crc
    }
}

/// An owned, structurally validated frame.
///
/// Holds the full framed bytes (header through CRC). Construction validates
/// the header and length; CRC checking is the reader's business so corrupt
/// frames can still be inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    bytes: Vec<u8>,
}

impl Packet {
    /// Take ownership of framed bytes; anything past the frame is dropped.
    ///
    /// # Errors
    ///
    /// Fails when the header is invalid or `bytes` is shorter than the
    /// declared frame.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        let header = PacketHeader::read_from(&bytes)?;
        let size = header.packet_size();
        if bytes.len() < size {
            return Err(WireError::Truncated {
                declared: header.payload_size as usize,
                available: bytes.len().saturating_sub(PacketHeader::SIZE),
            });
        }
        bytes.truncate(size);
        Ok(Self { header, bytes })
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Handler selector.
    #[must_use]
    pub fn routing_id(&self) -> u16 {
        self.header.routing_id
    }

    /// Message selector.
    #[must_use]
    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    /// The framed bytes, header through CRC.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the framed bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// A payload reader over this frame.
    ///
    /// # Errors
    ///
    /// Propagates header validation; cannot fail on a well-formed `Packet`.
    pub fn reader(&self) -> Result<PacketReader<'_>> {
        PacketReader::new(&self.bytes)
    }
}

/// Reader over one framed packet borrowed from a byte slice.
///
/// The slice may extend past the frame (for example inside a collated
/// body); only the framed region is touched.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    header: PacketHeader,
    frame: &'a [u8],
    payload: ReadCursor<'a>,
}

impl<'a> PacketReader<'a> {
    /// Parse the frame at the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Header errors propagate; [`WireError::Truncated`] when the slice is
    /// shorter than the declared frame.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let header = PacketHeader::read_from(bytes)?;
        let size = header.packet_size();
        if bytes.len() < size {
            return Err(WireError::Truncated {
                declared: header.payload_size as usize,
                available: bytes.len().saturating_sub(PacketHeader::SIZE),
            });
        }
        let payload =
            ReadCursor::new(&bytes[PacketHeader::SIZE..PacketHeader::SIZE + header.payload_size as usize]);
        Ok(Self { header, frame: &bytes[..size], payload })
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Handler selector.
    #[must_use]
    pub fn routing_id(&self) -> u16 {
        self.header.routing_id
    }

    /// Message selector.
    #[must_use]
    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    /// Declared payload size.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.header.payload_size as usize
    }

    /// Total frame size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.header.packet_size()
    }

    /// The full framed bytes.
    #[must_use]
    pub fn frame_bytes(&self) -> &'a [u8] {
        self.frame
    }

    /// Payload bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.remaining()
    }

    /// Verify the trailing CRC, a no-op when the NO_CRC flag is set.
    ///
    /// # Errors
    ///
    /// [`WireError::BadCrc`] on mismatch.
    pub fn check_crc(&self) -> Result<()> {
        if !self.header.has_crc() {
            return Ok(());
        }
        let covered = PacketHeader::SIZE + self.header.payload_size as usize;
        let computed = crc16(&self.frame[..covered]);
        let stored = u16::from_le_bytes([self.frame[covered], self.frame[covered + 1]]);
        if computed != stored {
            return Err(WireError::BadCrc { computed, stored });
        }
        Ok(())
    }

    /// Verify the packet version is within the readable window.
    ///
    /// # Errors
    ///
    /// [`WireError::IncompatibleVersion`] outside the
    /// [`crate::COMPAT_VERSION_MAJOR`]..=[`VERSION_MAJOR`] window.
    pub fn check_version(&self) -> Result<()> {
        if !version_compatible(self.header.version_major, self.header.version_minor) {
            return Err(WireError::IncompatibleVersion {
                major: self.header.version_major,
                minor: self.header.version_minor,
            });
        }
        Ok(())
    }

    /// Look at the next `count` payload bytes without consuming them.
    ///
    /// Lets a router peek a shape id before dispatching.
    ///
    /// # Errors
    ///
    /// [`WireError::ShortRead`] when the payload holds fewer bytes.
    pub fn peek(&self, count: usize) -> Result<&'a [u8]> {
        self.payload.peek(count)
    }

    /// Consume `count` raw payload bytes.
    ///
    /// # Errors
    ///
    /// [`WireError::ShortRead`] when the payload holds fewer bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.payload.take(count)
    }
}

macro_rules! reader_delegate {
    ($($name:ident -> $ty:ty),* $(,)?) => {
        impl PacketReader<'_> {
            $(
                /// Read one little-endian payload value.
                ///
                /// # Errors
                ///
                /// [`WireError::ShortRead`] at the end of the payload.
                pub fn $name(&mut self) -> Result<$ty> {
                    self.payload.$name()
                }
            )*
        }
    };
}

reader_delegate! {
    read_u8 -> u8, read_i8 -> i8, read_u16 -> u16, read_i16 -> i16,
    read_u32 -> u32, read_i32 -> i32, read_u64 -> u64, read_i64 -> i64,
    read_f32 -> f32, read_f64 -> f64,
}

/// Writer building one framed packet.
pub struct PacketWriter {
    cursor: WriteCursor,
    payload_limit: usize,
    no_crc: bool,
}

impl PacketWriter {
    /// New writer for `(routing_id, message_id)` with the full payload
    /// capacity.
    #[must_use]
    pub fn new(routing_id: u16, message_id: u16) -> Self {
        Self::with_limit(routing_id, message_id, PacketHeader::MAX_PAYLOAD)
    }

    /// New writer with payload capacity capped at `payload_limit` bytes.
    ///
    /// The limit is clamped to [`PacketHeader::MAX_PAYLOAD`].
    #[must_use]
    pub fn with_limit(routing_id: u16, message_id: u16, payload_limit: usize) -> Self {
        let payload_limit = payload_limit.min(PacketHeader::MAX_PAYLOAD);
        let mut writer = Self {
            cursor: WriteCursor::new(PacketHeader::SIZE + payload_limit + PacketHeader::CRC_SIZE),
            payload_limit,
            no_crc: false,
        };
        writer.write_header(routing_id, message_id);
        writer
    }

    /// Discard any payload and start a new frame in place.
    pub fn reset(&mut self, routing_id: u16, message_id: u16) {
        self.cursor =
            WriteCursor::new(PacketHeader::SIZE + self.payload_limit + PacketHeader::CRC_SIZE);
        self.write_header(routing_id, message_id);
    }

    /// Omit the trailing CRC and set the NO_CRC flag.
    #[must_use]
    pub fn no_crc(mut self) -> Self {
        self.no_crc = true;
        self
    }

    fn write_header(&mut self, routing_id: u16, message_id: u16) {
        // Capacity always covers the fixed header; these cannot fail.
        let _ = self.cursor.write_u32(PACKET_MARKER);
        let _ = self.cursor.write_u16(VERSION_MAJOR);
        let _ = self.cursor.write_u16(VERSION_MINOR);
        let _ = self.cursor.write_u16(routing_id);
        let _ = self.cursor.write_u16(message_id);
        let _ = self.cursor.write_u16(0); // payload size, patched in finalise()
        let _ = self.cursor.write_u8(0); // flags, patched in finalise()
        let _ = self.cursor.write_u8(0); // reserved
    }

    /// Payload bytes written so far.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.cursor.len() - PacketHeader::SIZE
    }

    /// Payload capacity remaining.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload_limit - self.payload_size()
    }

    /// Append raw payload bytes.
    ///
    /// # Errors
    ///
    /// [`WireError::BufferFull`] past the payload limit.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(WireError::BufferFull { needed: bytes.len(), remaining: self.remaining() });
        }
        self.cursor.put(bytes)
    }

    /// Stamp the payload size, append the CRC and yield the frame.
    ///
    /// # Errors
    ///
    /// Cannot fail for a writer constructed through this API; the signature
    /// keeps size patching honest.
    pub fn finalise(mut self) -> Result<Packet> {
        let payload_size = self.payload_size() as u16;
        self.cursor.patch(12, &payload_size.to_le_bytes())?;
        if self.no_crc {
            self.cursor.patch(14, &[PacketFlag::NO_CRC])?;
            return Packet::from_bytes(self.cursor.into_bytes());
        }
        let crc = crc16(self.cursor.bytes());
        self.cursor.write_u16(crc)?;
        Packet::from_bytes(self.cursor.into_bytes())
    }
}

macro_rules! writer_delegate {
    ($($name:ident($ty:ty)),* $(,)?) => {
        impl PacketWriter {
            $(
                /// Append one little-endian payload value.
                ///
                /// # Errors
                ///
                /// [`WireError::BufferFull`] past the payload limit.
                pub fn $name(&mut self, value: $ty) -> Result<()> {
                    if size_of::<$ty>() > self.remaining() {
                        return Err(WireError::BufferFull {
                            needed: size_of::<$ty>(),
                            remaining: self.remaining(),
                        });
                    }
                    self.cursor.$name(value)
                }
            )*
        }
    };
}

writer_delegate! {
    write_u8(u8), write_i8(i8), write_u16(u16), write_i16(i16),
    write_u32(u32), write_i32(i32), write_u64(u64), write_i64(i64),
    write_f32(f32), write_f64(f64),
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::messages::RoutingId;

    fn build_packet(routing_id: u16, message_id: u16, payload: &[u8]) -> Packet {
        let mut writer = PacketWriter::new(routing_id, message_id);
        writer.write_bytes(payload).unwrap();
        writer.finalise().unwrap()
    }

    #[test]
    fn header_layout() {
        let packet = build_packet(RoutingId::Control as u16, 7, &[0xAA, 0xBB]);
        let bytes = packet.bytes();
        assert_eq!(&bytes[0..4], &PACKET_MARKER.to_le_bytes());
        assert_eq!(&bytes[4..6], &VERSION_MAJOR.to_le_bytes());
        assert_eq!(&bytes[6..8], &VERSION_MINOR.to_le_bytes());
        assert_eq!(&bytes[8..10], &(RoutingId::Control as u16).to_le_bytes());
        assert_eq!(&bytes[10..12], &7u16.to_le_bytes());
        assert_eq!(&bytes[12..14], &2u16.to_le_bytes());
        assert_eq!(bytes[14], 0); // flags
        assert_eq!(bytes[15], 0); // reserved
        assert_eq!(&bytes[16..18], &[0xAA, 0xBB]);
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn round_trip_with_crc() {
        let packet = build_packet(64, 1, b"payload bytes");
        let mut reader = PacketReader::new(packet.bytes()).unwrap();
        reader.check_crc().unwrap();
        reader.check_version().unwrap();
        assert_eq!(reader.routing_id(), 64);
        assert_eq!(reader.message_id(), 1);
        assert_eq!(reader.read_bytes(13).unwrap(), b"payload bytes");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn corrupt_payload_fails_crc() {
        let packet = build_packet(64, 1, &[1, 2, 3, 4]);
        let mut bytes = packet.into_bytes();
        bytes[17] ^= 0x80;
        let reader = PacketReader::new(&bytes).unwrap();
        assert!(matches!(reader.check_crc(), Err(WireError::BadCrc { .. })));
    }

    #[test]
    fn no_crc_flag_skips_check() {
        let mut writer = PacketWriter::new(2, 1).no_crc();
        writer.write_u32(9).unwrap();
        let packet = writer.finalise().unwrap();
        assert_eq!(packet.bytes().len(), PacketHeader::SIZE + 4);
        let reader = PacketReader::new(packet.bytes()).unwrap();
        assert!(!reader.header().has_crc());
        reader.check_crc().unwrap();
    }

    #[test]
    fn flag_tampering_fails_crc() {
        // The flags byte is covered by the CRC, so toggling any flag bit
        // after finalisation invalidates the frame.
        let packet = build_packet(64, 1, &[1, 2, 3, 4]);
        let mut bytes = packet.into_bytes();
        bytes[14] ^= 0x80;
        let reader = PacketReader::new(&bytes).unwrap();
        assert!(matches!(reader.check_crc(), Err(WireError::BadCrc { .. })));
    }

    #[test]
    fn truncated_payload_is_reported() {
        let packet = build_packet(64, 1, &[0u8; 32]);
        let bytes = packet.bytes();
        let result = PacketReader::new(&bytes[..bytes.len() - 8]);
        assert_eq!(result.unwrap_err(), WireError::Truncated { declared: 32, available: 26 });
    }

    #[test]
    fn bad_marker_is_reported() {
        let mut bytes = build_packet(64, 1, &[]).into_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            PacketReader::new(&bytes),
            Err(WireError::BadMarker { .. })
        ));
    }

    #[test]
    fn peek_does_not_consume() {
        let packet = build_packet(64, 2, &42u32.to_le_bytes());
        let mut reader = PacketReader::new(packet.bytes()).unwrap();
        assert_eq!(reader.peek(4).unwrap(), &42u32.to_le_bytes());
        assert_eq!(reader.read_u32().unwrap(), 42);
    }

    #[test]
    fn payload_limit_is_enforced() {
        let mut writer = PacketWriter::with_limit(64, 1, 8);
        writer.write_u64(1).unwrap();
        assert!(matches!(
            writer.write_u8(1),
            Err(WireError::BufferFull { .. })
        ));
    }

    proptest! {
        #[test]
        fn arbitrary_payload_round_trips(
            routing_id in any::<u16>(),
            message_id in any::<u16>(),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let packet = build_packet(routing_id, message_id, &payload);
            let mut reader = PacketReader::new(packet.bytes()).unwrap();
            reader.check_crc().unwrap();
            prop_assert_eq!(reader.routing_id(), routing_id);
            prop_assert_eq!(reader.message_id(), message_id);
            prop_assert_eq!(reader.read_bytes(payload.len()).unwrap(), payload.as_slice());
        }
    }
}
