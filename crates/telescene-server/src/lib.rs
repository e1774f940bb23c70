//! Multi-client TCP and file-recording server for the Telescene protocol.
//!
//! The [`Server`] broadcasts shape and resource messages to every live
//! connection: TCP clients accepted by the [`ConnectionMonitor`] and file
//! connections recording the same byte stream to `.3es` replay files.
//!
//! # Threading
//!
//! Shape API calls ([`Server::create`], [`Server::update_frame`], ...)
//! share one server-side lock and must come from one logical server
//! thread. The monitor, in asynchronous mode, runs its own accept loop and
//! hands new connections over through a pending list;
//! [`Server::commit_connections`] adopts them and culls the dead on the
//! server thread.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod monitor;
mod server;
mod settings;
mod sink;

pub use connection::Connection;
pub use error::ServerError;
pub use monitor::{ConnectionMode, ConnectionMonitor};
pub use server::Server;
pub use settings::{ServerFlag, ServerSettings};
