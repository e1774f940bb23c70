//! Client-side error types.

use thiserror::Error;

/// Errors raised while decoding and dispatching an incoming stream.
///
/// Only version incompatibility and I/O failures abort a stream; framing
/// and handler errors are absorbed with warnings at the dispatch layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket or file I/O failed; treated as end of stream.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Packet decoding failed.
    #[error(transparent)]
    Wire(#[from] telescene_proto::WireError),

    /// A message arrived for a shape id that is not alive.
    #[error("no shape with id {id} on routing {routing_id}")]
    UnknownShape {
        /// Routing id of the handler.
        routing_id: u16,
        /// Shape id the message named.
        id: u32,
    },

    /// A duplicate persistent create arrived without the replace flag.
    #[error("duplicate shape id {id} on routing {routing_id} without replace")]
    DuplicateShape {
        /// Routing id of the handler.
        routing_id: u16,
        /// Offending shape id.
        id: u32,
    },

    /// A message id the routed handler does not understand.
    #[error("unknown message id {message_id} for routing {routing_id}")]
    UnknownMessage {
        /// Routing id of the handler.
        routing_id: u16,
        /// Unrecognised message id.
        message_id: u16,
    },
}
