//! Server-side error types.

use thiserror::Error;

/// Errors raised by server, monitor and connection operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket or file I/O failed.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Packet encoding failed.
    #[error(transparent)]
    Wire(#[from] telescene_proto::WireError),

    /// Replay stream writing failed.
    #[error(transparent)]
    Replay(#[from] telescene_proto::replay::ReplayError),

    /// The connection is no longer usable.
    #[error("connection disconnected")]
    Disconnected,

    /// No port in the configured range could be bound.
    #[error("listen failed on ports {first}..={last}")]
    ListenFailure {
        /// First port attempted.
        first: u16,
        /// Last port attempted.
        last: u16,
    },

    /// The asynchronous monitor did not report ready in time.
    #[error("connection monitor start timed out after {timeout_ms} ms")]
    StartTimeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The monitor is already running in a different mode.
    #[error("connection monitor already running")]
    AlreadyRunning,
}
