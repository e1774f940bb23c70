//! Collated packet envelope.
//!
//! Many small packets can be batched into one envelope packet (routing id
//! [`RoutingId::CollatedPacket`]) whose payload is a
//! [`CollatedPacketMessage`] header followed by the concatenation of the
//! packed frames, optionally deflate-compressed with gzip framing.
//!
//! [`CollatedPacketWriter`] accumulates frames against an uncompressed byte
//! budget and emits the envelope on [`CollatedPacketWriter::finalise`].
//! [`CollatedPacketDecoder`] yields the inner frames back in order; a
//! non-collated packet passes through as a single yield, so callers can
//! treat every incoming packet uniformly.

use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};

use crate::{
    error::{Result, WireError},
    messages::{CollatedFlag, CollatedPacketMessage, RoutingId},
    packet::{Packet, PacketHeader, PacketReader, PacketWriter},
};

/// Compression effort for collated envelopes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Store the body uncompressed.
    None,
    /// Fast, light compression.
    Low,
    /// Balanced default.
    #[default]
    Medium,
    /// Best compression, slowest.
    High,
}

impl CompressionLevel {
    fn to_flate2(self) -> Compression {
        match self {
            Self::None => Compression::none(),
            Self::Low => Compression::new(3),
            Self::Medium => Compression::new(6),
            Self::High => Compression::best(),
        }
    }
}

/// Accumulates whole frames into one collated envelope.
pub struct CollatedPacketWriter {
    raw: Vec<u8>,
    budget: usize,
    level: CompressionLevel,
    count: usize,
}

impl CollatedPacketWriter {
    /// Largest uncompressed body an envelope can carry.
    pub const MAX_BODY: usize = PacketHeader::MAX_PAYLOAD - CollatedPacketMessage::PAYLOAD_SIZE;

    /// New writer with the full body budget.
    #[must_use]
    pub fn new(level: CompressionLevel) -> Self {
        Self { raw: Vec::new(), budget: Self::MAX_BODY, level, count: 0 }
    }

    /// Discard buffered frames and set a new byte budget, clamped to
    /// [`Self::MAX_BODY`].
    pub fn open(&mut self, budget: usize) {
        self.raw.clear();
        self.count = 0;
        self.budget = budget.min(Self::MAX_BODY);
    }

    /// Number of frames buffered.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.count
    }

    /// Uncompressed bytes buffered.
    #[must_use]
    pub fn collated_bytes(&self) -> usize {
        self.raw.len()
    }

    /// True when no frames are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Buffer one frame.
    ///
    /// # Errors
    ///
    /// [`WireError::WouldOverflow`] when the frame does not fit the
    /// remaining budget; the buffered content is unchanged and the caller
    /// should finalise and retry in a fresh envelope.
    pub fn append(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.bytes();
        if self.raw.len() + bytes.len() > self.budget {
            return Err(WireError::WouldOverflow {
                size: self.raw.len() + bytes.len(),
                budget: self.budget,
            });
        }
        self.raw.extend_from_slice(bytes);
        self.count += 1;
        Ok(())
    }

    /// Emit the envelope and reset for the next batch.
    ///
    /// The body is deflated when a level other than
    /// [`CompressionLevel::None`] is set; if the deflate stream turns out
    /// larger than the raw body the envelope falls back to uncompressed,
    /// keeping the size bound.
    ///
    /// # Errors
    ///
    /// [`WireError::Compression`] when the deflate stream fails.
    pub fn finalise(&mut self) -> Result<Packet> {
        let uncompressed_bytes = self.raw.len() as u32;
        let mut flags = 0u16;
        let mut body = std::mem::take(&mut self.raw);
        self.count = 0;

        if self.level != CompressionLevel::None && !body.is_empty() {
            let compressed = deflate(&body, self.level)?;
            if compressed.len() < body.len() {
                flags |= CollatedFlag::COMPRESSED;
                body = compressed;
            }
        }

        let mut writer = PacketWriter::new(RoutingId::CollatedPacket as u16, 0);
        CollatedPacketMessage { flags, uncompressed_bytes }.write(&mut writer)?;
        writer.write_bytes(&body)?;
        writer.finalise()
    }
}

fn deflate(bytes: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), level.to_flate2());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map_err(|e| WireError::Compression(e.to_string()))
}

fn inflate(bytes: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut body = Vec::with_capacity(expected);
    decoder
        .read_to_end(&mut body)
        .map_err(|e| WireError::Compression(e.to_string()))?;
    if body.len() != expected {
        return Err(WireError::Compression(format!(
            "inflated to {} bytes, envelope declared {expected}",
            body.len()
        )));
    }
    Ok(body)
}

enum DecodeState {
    /// A plain packet passed through verbatim.
    Single { bytes: Vec<u8>, consumed: bool },
    /// An unpacked collated body being walked.
    Collated { body: Vec<u8>, pos: usize },
}

/// Unpacks collated envelopes back into whole frames.
///
/// Reusable: [`CollatedPacketDecoder::set_packet`] accepts the next
/// incoming packet once the previous one is exhausted.
#[derive(Default)]
pub struct CollatedPacketDecoder {
    state: Option<DecodeState>,
}

impl CollatedPacketDecoder {
    /// New idle decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the next incoming packet.
    ///
    /// A collated envelope is unpacked (and inflated when compressed); any
    /// other packet will be yielded verbatim by the next
    /// [`CollatedPacketDecoder::next`] call.
    ///
    /// # Errors
    ///
    /// Framing errors on `packet`, [`WireError::Compression`] when the
    /// body fails to inflate or disagrees with the declared size.
    pub fn set_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.state = None;
        let mut reader = PacketReader::new(packet)?;
        if reader.routing_id() != RoutingId::CollatedPacket as u16 {
            self.state = Some(DecodeState::Single {
                bytes: reader.frame_bytes().to_vec(),
                consumed: false,
            });
            return Ok(());
        }

        let message = CollatedPacketMessage::read(&mut reader)?;
        let packed = reader.read_bytes(reader.remaining())?;
        let body = if message.flags & CollatedFlag::COMPRESSED != 0 {
            inflate(packed, message.uncompressed_bytes as usize)?
        } else {
            if packed.len() != message.uncompressed_bytes as usize {
                return Err(WireError::Malformed("collated body size"));
            }
            packed.to_vec()
        };
        self.state = Some(DecodeState::Collated { body, pos: 0 });
        Ok(())
    }

    /// True while inner frames remain.
    #[must_use]
    pub fn decoding(&self) -> bool {
        self.state.is_some()
    }

    /// The next inner frame, or `None` once the packet is exhausted.
    ///
    /// # Errors
    ///
    /// [`WireError`] framing errors when the collated body is corrupt; no
    /// further frames are yielded after an error.
    pub fn next(&mut self) -> Result<Option<&[u8]>> {
        enum Step {
            Finished,
            Yield(usize, usize),
            Fail(WireError),
        }

        let step = match &mut self.state {
            None => return Ok(None),
            Some(DecodeState::Single { bytes, consumed }) => {
                if *consumed {
                    Step::Finished
                } else {
                    *consumed = true;
                    Step::Yield(0, bytes.len())
                }
            }
            Some(DecodeState::Collated { body, pos }) => {
                if *pos >= body.len() {
                    Step::Finished
                } else {
                    match PacketReader::new(&body[*pos..]) {
                        Ok(inner) => {
                            let start = *pos;
                            *pos += inner.packet_size();
                            Step::Yield(start, start + inner.packet_size())
                        }
                        Err(e) => Step::Fail(e),
                    }
                }
            }
        };

        match step {
            Step::Finished => {
                self.state = None;
                Ok(None)
            }
            Step::Fail(e) => {
                self.state = None;
                Err(e)
            }
            Step::Yield(start, end) => match &self.state {
                Some(DecodeState::Single { bytes, .. }) => Ok(Some(&bytes[start..end])),
                Some(DecodeState::Collated { body, .. }) => Ok(Some(&body[start..end])),
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ControlMessage, ControlMessageId};

    fn control_packet(value32: u32) -> Packet {
        let mut writer =
            PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Frame as u16);
        ControlMessage { flags: 0, value32, value64: 0 }.write(&mut writer).unwrap();
        writer.finalise().unwrap()
    }

    fn drain(decoder: &mut CollatedPacketDecoder) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next().unwrap() {
            frames.push(frame.to_vec());
        }
        frames
    }

    fn collation_round_trip(level: CompressionLevel) {
        let packets: Vec<Packet> = (0..100).map(control_packet).collect();
        let mut writer = CollatedPacketWriter::new(level);
        for packet in &packets {
            writer.append(packet).unwrap();
        }
        assert_eq!(writer.packet_count(), 100);
        let envelope = writer.finalise().unwrap();
        assert!(writer.is_empty());

        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(envelope.bytes()).unwrap();
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), packets.len());
        for (frame, packet) in frames.iter().zip(&packets) {
            assert_eq!(frame.as_slice(), packet.bytes());
        }
        assert!(!decoder.decoding());
    }

    #[test]
    fn round_trip_uncompressed() {
        collation_round_trip(CompressionLevel::None);
    }

    #[test]
    fn round_trip_compressed() {
        collation_round_trip(CompressionLevel::Medium);
    }

    #[test]
    fn compressed_envelope_is_smaller() {
        let packets: Vec<Packet> = (0..100).map(|_| control_packet(7)).collect();
        let mut writer = CollatedPacketWriter::new(CompressionLevel::Medium);
        for packet in &packets {
            writer.append(packet).unwrap();
        }
        let raw_bytes = writer.collated_bytes();
        let envelope = writer.finalise().unwrap();
        assert!(envelope.bytes().len() < raw_bytes);
        assert!(envelope.bytes().len() < 16 * 1024);
    }

    #[test]
    fn overflow_leaves_buffer_intact() {
        let packet = control_packet(1);
        let mut writer = CollatedPacketWriter::new(CompressionLevel::None);
        writer.open(packet.bytes().len() + 10);
        writer.append(&packet).unwrap();
        assert!(matches!(
            writer.append(&packet),
            Err(WireError::WouldOverflow { .. })
        ));
        assert_eq!(writer.packet_count(), 1);

        // Flush and continue in a fresh envelope.
        let envelope = writer.finalise().unwrap();
        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(envelope.bytes()).unwrap();
        assert_eq!(drain(&mut decoder).len(), 1);
        writer.append(&packet).unwrap();
    }

    #[test]
    fn plain_packet_passes_through() {
        let packet = control_packet(42);
        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(packet.bytes()).unwrap();
        assert!(decoder.decoding());
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_slice(), packet.bytes());
    }

    #[test]
    fn decoder_is_reusable() {
        let mut decoder = CollatedPacketDecoder::new();

        let plain = control_packet(1);
        decoder.set_packet(plain.bytes()).unwrap();
        assert_eq!(drain(&mut decoder).len(), 1);

        let mut writer = CollatedPacketWriter::new(CompressionLevel::Medium);
        for value in 0..5 {
            writer.append(&control_packet(value)).unwrap();
        }
        let envelope = writer.finalise().unwrap();
        decoder.set_packet(envelope.bytes()).unwrap();
        assert_eq!(drain(&mut decoder).len(), 5);

        decoder.set_packet(plain.bytes()).unwrap();
        assert_eq!(drain(&mut decoder).len(), 1);
    }

    #[test]
    fn corrupt_body_size_is_rejected() {
        let mut writer = CollatedPacketWriter::new(CompressionLevel::None);
        writer.append(&control_packet(1)).unwrap();
        let mut bytes = writer.finalise().unwrap().into_bytes();
        // Inflate the declared uncompressed size without growing the body.
        let offset = PacketHeader::SIZE + 4;
        bytes[offset..offset + 4].copy_from_slice(&0xFFFFu32.to_le_bytes());
        let mut decoder = CollatedPacketDecoder::new();
        assert!(decoder.set_packet(&bytes).is_err());
    }

    #[test]
    fn tiny_envelope_round_trips() {
        // A single tiny packet may deflate larger than it started; the
        // declared uncompressed size and the decoded frame must hold
        // whether or not the writer fell back to the raw encoding.
        let packet = control_packet(3);
        let mut writer = CollatedPacketWriter::new(CompressionLevel::High);
        writer.append(&packet).unwrap();
        let envelope = writer.finalise().unwrap();
        let mut reader = envelope.reader().unwrap();
        let message = CollatedPacketMessage::read(&mut reader).unwrap();
        assert_eq!(message.uncompressed_bytes as usize, packet.bytes().len());
        let mut decoder = CollatedPacketDecoder::new();
        decoder.set_packet(envelope.bytes()).unwrap();
        assert_eq!(drain(&mut decoder)[0].as_slice(), packet.bytes());
    }
}
