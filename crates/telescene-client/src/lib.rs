//! Streaming client for the Telescene protocol.
//!
//! The client side reverses the server's pipeline: bytes from a socket or
//! replay file are reassembled into packets, collated envelopes are
//! unpacked, and each inner packet is dispatched by routing id to a
//! [`MessageHandler`]. Shape handlers cache instances so transient shapes
//! flush on frame boundaries, persistent shapes live until destroyed, and
//! the whole scene can be re-serialised for recording keyframes.
//!
//! [`ClientStream`] is the synchronous core; [`StreamThread`] wraps it in
//! the one-thread-per-source loop, pacing playback from files by the
//! server's announced time unit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod category;
mod error;
mod handler;
mod mesh_cache;
mod shape_cache;
mod stream;

pub use category::{CategoryHandler, CategoryInfo};
pub use error::ClientError;
pub use handler::MessageHandler;
pub use mesh_cache::{MeshCacheHandler, PartialMesh};
pub use shape_cache::ShapeCacheHandler;
pub use stream::{ClientStream, StreamThread};
