//! Byte stream to whole packets.
//!
//! [`PacketStreamReader`] consumes an arbitrary byte stream (socket reads,
//! file chunks) and yields whole CRC-validated frames. Junk between frames
//! is skipped by scanning for the packet marker; a frame whose CRC fails is
//! abandoned one byte past its marker so a marker-like byte pattern inside
//! junk cannot wedge the stream. Running out of buffered bytes is never an
//! error, the caller simply feeds more.

use bytes::{Buf, BytesMut};

use crate::{
    PACKET_MARKER,
    packet::{Packet, PacketHeader, PacketReader},
};

/// Reassembles whole validated frames from a byte stream.
#[derive(Debug, Default)]
pub struct PacketStreamReader {
    buf: BytesMut,
    warnings: u64,
    /// Set once a skip has been counted for the current junk run.
    in_junk_run: bool,
}

impl PacketStreamReader {
    /// New empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append incoming bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Count of junk runs and corrupt frames skipped so far.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    /// Extract the next whole validated frame, or `None` until more bytes
    /// arrive.
    pub fn next(&mut self) -> Option<Packet> {
        loop {
            self.seek_marker();

            if self.buf.len() < PacketHeader::SIZE {
                return None;
            }

            let header = match PacketHeader::read_from(&self.buf) {
                Ok(header) => header,
                // seek_marker leaves the buffer either empty or at a
                // marker, so only a short buffer reaches here.
                Err(_) => return None,
            };

            let size = header.packet_size();
            if self.buf.len() < size {
                return None;
            }

            match Self::validate(&self.buf[..size]) {
                Ok(()) => {
                    self.in_junk_run = false;
                    let frame = self.buf.split_to(size);
                    // Structure and CRC were just validated.
                    return Packet::from_bytes(frame.to_vec()).ok();
                }
                Err(()) => {
                    // Resync: step past the marker byte and rescan. The
                    // rest of the corrupt frame counts as the same junk
                    // run.
                    self.note_junk();
                    self.buf.advance(1);
                }
            }
        }
    }

    fn validate(frame: &[u8]) -> Result<(), ()> {
        let reader = PacketReader::new(frame).map_err(|_| ())?;
        reader.check_crc().map_err(|_| ())
    }

    /// Discard bytes until the buffer starts with the packet marker or too
    /// few bytes remain to decide.
    fn seek_marker(&mut self) {
        let marker = PACKET_MARKER.to_le_bytes();
        while self.buf.len() >= marker.len() {
            if self.buf[..4] == marker {
                self.in_junk_run = false;
                return;
            }
            self.note_junk();
            self.buf.advance(1);
        }
        // A partial marker prefix may still be completed by the next feed;
        // anything else in the tail is junk we can already discard.
        while !self.buf.is_empty() && !marker.starts_with(&self.buf[..]) {
            self.note_junk();
            self.buf.advance(1);
        }
    }

    fn note_junk(&mut self) {
        if !self.in_junk_run {
            self.warnings += 1;
            self.in_junk_run = true;
            tracing::warn!("skipping junk bytes in packet stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::{ControlMessage, ControlMessageId, RoutingId},
        packet::PacketWriter,
    };

    fn frame(routing_id: u16, value32: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new(routing_id, ControlMessageId::Frame as u16);
        ControlMessage { flags: 0, value32, value64: 0 }.write(&mut writer).unwrap();
        writer.finalise().unwrap().into_bytes()
    }

    #[test]
    fn whole_packets_come_back() {
        let mut reader = PacketStreamReader::new();
        let a = frame(RoutingId::Control as u16, 1);
        let b = frame(RoutingId::Control as u16, 2);
        reader.feed(&a);
        reader.feed(&b);
        assert_eq!(reader.next().unwrap().bytes(), a.as_slice());
        assert_eq!(reader.next().unwrap().bytes(), b.as_slice());
        assert!(reader.next().is_none());
        assert_eq!(reader.warnings(), 0);
    }

    #[test]
    fn partial_feeds_accumulate() {
        let mut reader = PacketStreamReader::new();
        let packet = frame(RoutingId::Control as u16, 9);
        for chunk in packet.chunks(5) {
            assert!(reader.next().is_none());
            reader.feed(chunk);
        }
        assert_eq!(reader.next().unwrap().bytes(), packet.as_slice());
    }

    #[test]
    fn junk_is_skipped_with_a_warning() {
        let mut reader = PacketStreamReader::new();
        let packet = frame(RoutingId::Sphere as u16, 3);
        reader.feed(&[0x13, 0x57, 0x9B]);
        reader.feed(&packet);
        assert_eq!(reader.next().unwrap().bytes(), packet.as_slice());
        assert_eq!(reader.warnings(), 1);
    }

    #[test]
    fn resync_after_junk_and_corrupt_marker() {
        // junk || sphere || near-marker junk || box
        let sphere = frame(RoutingId::Sphere as u16, 1);
        let cuboid = frame(RoutingId::Box as u16, 2);
        let mut corrupted_marker = PACKET_MARKER.to_le_bytes();
        corrupted_marker[2] ^= 0x40;

        let mut stream = Vec::new();
        stream.extend(std::iter::repeat_n(0xA5u8, 37));
        stream.extend_from_slice(&sphere);
        stream.extend_from_slice(&corrupted_marker);
        stream.extend_from_slice(&cuboid);

        let mut reader = PacketStreamReader::new();
        reader.feed(&stream);
        assert_eq!(reader.next().unwrap().bytes(), sphere.as_slice());
        assert_eq!(reader.next().unwrap().bytes(), cuboid.as_slice());
        assert!(reader.next().is_none());
        assert_eq!(reader.warnings(), 2);
    }

    #[test]
    fn bad_crc_resyncs_to_next_packet() {
        let mut corrupt = frame(RoutingId::Control as u16, 5);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let good = frame(RoutingId::Control as u16, 6);

        let mut reader = PacketStreamReader::new();
        reader.feed(&corrupt);
        reader.feed(&good);
        let packet = reader.next().unwrap();
        assert_eq!(packet.bytes(), good.as_slice());
        assert!(reader.warnings() >= 1);
    }

    #[test]
    fn marker_prefix_at_tail_is_kept() {
        let packet = frame(RoutingId::Control as u16, 8);
        let mut reader = PacketStreamReader::new();
        // Feed junk, then only the first marker byte; it must survive the
        // junk scan so the rest of the packet can complete it.
        reader.feed(&[0xEE, 0xEE]);
        reader.feed(&packet[..1]);
        assert!(reader.next().is_none());
        reader.feed(&packet[1..]);
        assert_eq!(reader.next().unwrap().bytes(), packet.as_slice());
    }
}
