//! Wire protocol for the Telescene remote visualisation stream.
//!
//! A Telescene stream is a sequence of framed packets, each carrying a
//! routing id (which handler processes the packet), a message id (what the
//! payload means to that handler), a little-endian payload and a trailing
//! CRC-16. Packets may be batched into a collated envelope, optionally
//! deflate-compressed, to reduce per-packet overhead on the wire.
//!
//! This crate is pure protocol logic with no sockets or threads:
//!
//! - [`codec`]: little-endian primitive read/write cursors
//! - [`crc`]: the packet CRC-16
//! - [`packet`]: packet framing ([`PacketWriter`], [`PacketReader`])
//! - [`collate`]: the collated/compressed envelope codec
//! - [`messages`]: typed protocol messages and id/flag constants
//! - [`stream`]: byte stream to whole packets, with junk resync
//! - [`replay`]: `.3es` replay file prelude and finalisation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod collate;
pub mod crc;
mod error;
pub mod messages;
pub mod packet;
pub mod replay;
pub mod stream;

pub use collate::{CollatedPacketDecoder, CollatedPacketWriter, CompressionLevel};
pub use error::{Result, WireError};
pub use messages::{
    Attributes, CategoryNameMessage, CollatedPacketMessage, ControlMessage, ControlMessageId,
    CoordinateFrame, CreateMessage, DataMessage, DestroyMessage, MeshMessageId, ObjectAttrs,
    RoutingId, ServerInfoMessage, ShapeMessageId, UpdateMessage,
};
pub use packet::{Packet, PacketHeader, PacketReader, PacketWriter};
pub use stream::PacketStreamReader;

/// Packet marker sentinel, little-endian on the wire.
pub const PACKET_MARKER: u32 = 0x03E5_5E30;

/// Current protocol major version.
pub const VERSION_MAJOR: u16 = 0;
/// Current protocol minor version.
pub const VERSION_MINOR: u16 = 4;
/// Oldest readable major version.
pub const COMPAT_VERSION_MAJOR: u16 = 0;
/// Oldest readable minor version under [`COMPAT_VERSION_MAJOR`].
pub const COMPAT_VERSION_MINOR: u16 = 2;

/// Whether a packet stamped `(major, minor)` can be read by this build.
///
/// The accepted window is the closed major interval
/// `[COMPAT_VERSION_MAJOR, VERSION_MAJOR]`. At the current major the minor
/// must not exceed ours; at the compatibility major it must not predate the
/// compatibility minor. Majors strictly inside the interval are accepted
/// regardless of minor.
#[must_use]
pub fn version_compatible(major: u16, minor: u16) -> bool {
    // Degenerate window: both bounds on the same major.
    if VERSION_MAJOR == COMPAT_VERSION_MAJOR {
        return major == VERSION_MAJOR && (COMPAT_VERSION_MINOR..=VERSION_MINOR).contains(&minor);
    }
    if COMPAT_VERSION_MAJOR < major && major < VERSION_MAJOR {
        return true;
    }
    if major == VERSION_MAJOR && minor <= VERSION_MINOR {
        return true;
    }
    if major == COMPAT_VERSION_MAJOR && minor >= COMPAT_VERSION_MINOR {
        return true;
    }
    false
}
