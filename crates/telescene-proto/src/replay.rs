//! Replay (`.3es`) stream prelude and finalisation.
//!
//! A replay file is byte-identical to the TCP stream, wrapped by a prelude
//! and terminated by an `End` control packet. The prelude is the server
//! info packet followed by a frame-count control packet whose value is zero
//! while recording; [`finalise_stream`] seeks back and rewrites it with the
//! real count, leaving the CRC consistent. Readers must accept streams with
//! or without the frame-count packet.

use std::io::{Seek, SeekFrom, Write};

use thiserror::Error;

use crate::{
    error::WireError,
    messages::{ControlMessage, ControlMessageId, RoutingId, ServerInfoMessage},
    packet::{Packet, PacketHeader, PacketWriter},
};

/// Errors raised while writing replay streams.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Underlying file or stream I/O failed.
    #[error("replay stream i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Packet encoding failed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Byte offset of the frame-count packet within a stream written by
/// [`initialise_stream`]: it directly follows the server info packet.
pub const FRAME_COUNT_OFFSET: u64 =
    (PacketHeader::SIZE + ServerInfoMessage::PAYLOAD_SIZE + PacketHeader::CRC_SIZE) as u64;

fn frame_count_packet(frames: u32) -> Result<Packet, WireError> {
    let mut writer =
        PacketWriter::new(RoutingId::Control as u16, ControlMessageId::FrameCount as u16);
    ControlMessage { flags: 0, value32: frames, value64: 0 }.write(&mut writer)?;
    writer.finalise()
}

/// The `End` control packet terminating a stream.
///
/// # Errors
///
/// Fails only if packet encoding fails, which a fixed-size control message
/// cannot trigger in practice.
pub fn end_packet() -> Result<Packet, WireError> {
    let mut writer = PacketWriter::new(RoutingId::Control as u16, ControlMessageId::End as u16);
    ControlMessage::default().write(&mut writer)?;
    writer.finalise()
}

/// Write the stream prelude: server info, then a zero frame-count packet to
/// be patched by [`finalise_stream`].
///
/// # Errors
///
/// Propagates packet encoding and write failures.
pub fn initialise_stream<W: Write>(
    out: &mut W,
    info: &ServerInfoMessage,
) -> Result<(), ReplayError> {
    let mut writer = PacketWriter::new(RoutingId::ServerInfo as u16, 0);
    info.write(&mut writer)?;
    out.write_all(writer.finalise()?.bytes())?;
    out.write_all(frame_count_packet(0)?.bytes())?;
    Ok(())
}

/// Patch the frame-count packet with the final count and restore the
/// stream position to the end.
///
/// # Errors
///
/// Propagates packet encoding, seek and write failures.
pub fn finalise_stream<S: Write + Seek>(stream: &mut S, frames: u32) -> Result<(), ReplayError> {
    stream.flush()?;
    stream.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
    stream.write_all(frame_count_packet(frames)?.bytes())?;
    stream.seek(SeekFrom::End(0))?;
    Ok(())
}
