//! Error types for the wire layer.
//!
//! One enum covers framing, codec and collation failures. Stream-level I/O
//! errors stay in `std::io::Error` at the boundary (see [`crate::replay`]);
//! everything that can be judged from bytes alone lands here.

use thiserror::Error;

/// Convenience result alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors raised while encoding or decoding the wire protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A read ran past the end of the available bytes.
    #[error("short read: needed {needed} bytes, {available} available")]
    ShortRead {
        /// Bytes the read required.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// A write ran past the writer's capacity.
    #[error("buffer full: needed {needed} bytes, {remaining} remaining")]
    BufferFull {
        /// Bytes the write required.
        needed: usize,
        /// Bytes of capacity remaining.
        remaining: usize,
    },

    /// The buffer does not start with the packet marker.
    #[error("bad packet marker {found:#010x}")]
    BadMarker {
        /// The 32-bit value found where the marker was expected.
        found: u32,
    },

    /// A packet declared more payload than the buffer holds.
    #[error("packet truncated: {declared} payload bytes declared, {available} available")]
    Truncated {
        /// Payload size the header declared.
        declared: usize,
        /// Bytes actually available after the header.
        available: usize,
    },

    /// The stored CRC does not match the computed one.
    #[error("crc mismatch: computed {computed:#06x}, stored {stored:#06x}")]
    BadCrc {
        /// CRC computed over the received bytes.
        computed: u16,
        /// CRC stored in the packet.
        stored: u16,
    },

    /// The packet version falls outside the readable window.
    #[error("incompatible protocol version {major}.{minor}")]
    IncompatibleVersion {
        /// Major version stamped on the packet.
        major: u16,
        /// Minor version stamped on the packet.
        minor: u16,
    },

    /// A payload (or collated body) would exceed the packet size limit.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Requested payload size.
        size: usize,
        /// Hard payload limit.
        limit: usize,
    },

    /// Appending to a collated envelope would exceed its byte budget.
    #[error("collated envelope overflow: {size} bytes over a budget of {budget}")]
    WouldOverflow {
        /// Bytes the envelope would hold after the append.
        size: usize,
        /// Envelope byte budget.
        budget: usize,
    },

    /// Deflate or inflate failed, or the inflated size disagrees with the
    /// envelope header.
    #[error("compression: {0}")]
    Compression(String),

    /// A field value violates the message contract.
    #[error("malformed {0}")]
    Malformed(&'static str),

    /// The attribute precision flag disagrees with the attribute payload.
    #[error("precision flag does not match attribute encoding")]
    PrecisionMismatch,
}
