//! The message handler contract.

use std::any::Any;

use telescene_proto::{Packet, PacketReader, ServerInfoMessage};

use crate::error::ClientError;

/// Processes every packet arriving on one routing id.
///
/// Handlers cache enough state to re-emit their content as create
/// messages ([`MessageHandler::snapshot`]), which is how recording
/// keyframes capture a scene mid-stream.
pub trait MessageHandler: Send {
    /// The routing id this handler consumes.
    fn routing_id(&self) -> u16;

    /// Debug name for logging.
    fn name(&self) -> &'static str;

    /// Called when the server info record arrives or changes.
    fn on_server_info(&mut self, _info: &ServerInfoMessage) {}

    /// Called at each frame boundary, after the frame's messages.
    ///
    /// `persist_transient` suppresses the transient flush for this frame.
    fn end_frame(&mut self, _frame: u32, _persist_transient: bool) {}

    /// Drop all cached state.
    fn reset(&mut self);

    /// Process one packet routed to this handler; the reader sits at the
    /// start of the payload.
    ///
    /// # Errors
    ///
    /// Malformed payloads and cache violations; the dispatcher logs and
    /// absorbs these.
    fn handle(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError>;

    /// Re-emit the cached state as wire packets.
    fn snapshot(&self) -> Vec<Packet> {
        Vec::new()
    }

    /// Downcast support for callers inspecting concrete handler state.
    fn as_any(&self) -> &dyn Any;
}
