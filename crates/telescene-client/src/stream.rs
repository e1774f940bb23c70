//! The incoming stream router and its thread.
//!
//! [`ClientStream`] is the synchronous core: packets in, handler state
//! out. It owns the collated decoder, the handler table and the frame
//! counter, and interprets control messages. [`StreamThread`] runs it
//! against a socket or replay file on a dedicated thread, pacing file
//! playback by the announced time unit.

use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    net::TcpStream,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use telescene_proto::{
    CollatedPacketDecoder, ControlMessage, PacketReader, PacketStreamReader, ServerInfoMessage,
    messages::{ControlFlag, ControlMessageId, CoordinateFrame, RoutingId},
};

use crate::{
    category::CategoryHandler, error::ClientError, handler::MessageHandler,
    mesh_cache::MeshCacheHandler, shape_cache::ShapeCacheHandler,
};

/// Reassembles one incoming stream into handler state.
pub struct ClientStream {
    handlers: HashMap<u16, Box<dyn MessageHandler>>,
    decoder: CollatedPacketDecoder,
    server_info: ServerInfoMessage,
    frame: u32,
    total_frames_hint: u32,
    warnings: u64,
    ended: bool,
    /// Pacing request raised by the last frame control, for paced
    /// playback.
    pending_delay: Option<Duration>,
    paced: bool,
}

impl Default for ClientStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientStream {
    /// New stream with the built-in handlers: every shape type, category
    /// definitions and the mesh resource cache.
    #[must_use]
    pub fn new() -> Self {
        let mut stream = Self {
            handlers: HashMap::new(),
            decoder: CollatedPacketDecoder::new(),
            server_info: ServerInfoMessage::default(),
            frame: 0,
            total_frames_hint: 0,
            warnings: 0,
            ended: false,
            pending_delay: None,
            paced: false,
        };
        for handler in ShapeCacheHandler::built_in() {
            stream.add_handler(Box::new(handler));
        }
        stream.add_handler(Box::new(CategoryHandler::new()));
        stream.add_handler(Box::new(MeshCacheHandler::new()));
        stream
    }

    /// Pace frame boundaries by the stream's time unit (file playback).
    #[must_use]
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Register (or replace) a handler for its routing id.
    pub fn add_handler(&mut self, handler: Box<dyn MessageHandler>) {
        self.handlers.insert(handler.routing_id(), handler);
    }

    /// The handler registered for `routing_id`.
    #[must_use]
    pub fn handler(&self, routing_id: u16) -> Option<&dyn MessageHandler> {
        self.handlers.get(&routing_id).map(AsRef::as_ref)
    }

    /// The shape cache for a shape routing id.
    #[must_use]
    pub fn shapes(&self, routing_id: u16) -> Option<&ShapeCacheHandler> {
        self.handler(routing_id)?.as_any().downcast_ref()
    }

    /// The mesh resource cache.
    #[must_use]
    pub fn meshes(&self) -> Option<&MeshCacheHandler> {
        self.handler(RoutingId::Mesh as u16)?.as_any().downcast_ref()
    }

    /// The category table.
    #[must_use]
    pub fn categories(&self) -> Option<&CategoryHandler> {
        self.handler(RoutingId::Category as u16)?.as_any().downcast_ref()
    }

    /// Latest server info seen on the stream.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfoMessage {
        &self.server_info
    }

    /// Current frame counter.
    #[must_use]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Total frame count hint from a finite recording, zero if unknown.
    #[must_use]
    pub fn total_frames_hint(&self) -> u32 {
        self.total_frames_hint
    }

    /// Count of skipped or unroutable packets.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    /// True once an End control has arrived.
    #[must_use]
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Take the pacing delay requested by the last frame boundary.
    pub fn take_delay(&mut self) -> Option<Duration> {
        self.pending_delay.take()
    }

    /// Process one whole incoming packet: unpack collation, dispatch every
    /// inner packet.
    ///
    /// # Errors
    ///
    /// Version incompatibility aborts the stream; corrupt collated bodies
    /// abort only the containing packet (counted, absorbed). Handler
    /// errors never propagate.
    pub fn process_packet(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let reader = PacketReader::new(bytes)?;
        reader.check_version()?;

        if let Err(e) = self.decoder.set_packet(bytes) {
            self.warnings += 1;
            tracing::warn!("dropping undecodable packet: {e}");
            return Ok(());
        }
        loop {
            // The decoder borrows the frame; copy out before dispatching
            // so handlers may borrow self.
            let inner = match self.decoder.next() {
                Ok(Some(frame)) => frame.to_vec(),
                Ok(None) => break,
                Err(e) => {
                    self.warnings += 1;
                    tracing::warn!("abandoning collated packet: {e}");
                    break;
                }
            };
            self.dispatch(&inner)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let mut reader = PacketReader::new(bytes)?;
        reader.check_version()?;

        let routing_id = reader.routing_id();
        match RoutingId::from_u16(routing_id) {
            Some(RoutingId::ServerInfo) => {
                let info = match ServerInfoMessage::read(&mut reader) {
                    Ok(info) => info,
                    Err(e) => {
                        self.warnings += 1;
                        tracing::warn!("bad server info: {e}");
                        return Ok(());
                    }
                };
                self.server_info = info;
                for handler in self.handlers.values_mut() {
                    handler.reset();
                    handler.on_server_info(&info);
                }
                Ok(())
            }
            Some(RoutingId::Control) => self.dispatch_control(&mut reader),
            _ => {
                if let Some(handler) = self.handlers.get_mut(&routing_id) {
                    // Handler-level failures are logged there; a hard error
                    // here means the payload was unreadable.
                    if let Err(e) = handler.handle(&mut reader) {
                        self.warnings += 1;
                        tracing::warn!(routing_id, "handler failed: {e}");
                    }
                } else {
                    self.warnings += 1;
                    tracing::warn!(routing_id, "no handler for routing id, skipping");
                }
                Ok(())
            }
        }
    }

    fn dispatch_control(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        let message = match ControlMessage::read(reader) {
            Ok(message) => message,
            Err(e) => {
                self.warnings += 1;
                tracing::warn!("bad control message: {e}");
                return Ok(());
            }
        };
        match ControlMessageId::from_u16(reader.message_id()) {
            Some(ControlMessageId::Frame) => {
                self.frame = self.frame.wrapping_add(1);
                let persist = message.flags & ControlFlag::PERSIST_TRANSIENT != 0;
                for handler in self.handlers.values_mut() {
                    handler.end_frame(self.frame, persist);
                }
                if self.paced {
                    let micros = u64::from(message.value32) * self.server_info.time_unit;
                    if micros > 0 {
                        self.pending_delay = Some(Duration::from_micros(micros));
                    }
                }
                Ok(())
            }
            Some(ControlMessageId::CoordinateFrame) => {
                match CoordinateFrame::from_u8(message.value32 as u8) {
                    Some(frame) => self.server_info.coordinate_frame = frame,
                    None => {
                        self.warnings += 1;
                        tracing::warn!(value = message.value32, "unknown coordinate frame");
                    }
                }
                Ok(())
            }
            Some(ControlMessageId::FrameCount) => {
                self.total_frames_hint = message.value32;
                Ok(())
            }
            Some(ControlMessageId::ForceFrameFlush) => {
                // Render without advancing time: finish the frame but keep
                // transients and the counter.
                for handler in self.handlers.values_mut() {
                    handler.end_frame(self.frame, true);
                }
                Ok(())
            }
            Some(ControlMessageId::Reset) => {
                self.frame = 0;
                for handler in self.handlers.values_mut() {
                    handler.reset();
                }
                Ok(())
            }
            Some(ControlMessageId::Keyframe) => {
                // Meaningful only to recording playback; nothing to do on
                // a live stream.
                tracing::debug!(frame = message.value32, "keyframe request ignored");
                Ok(())
            }
            Some(ControlMessageId::End) => {
                self.ended = true;
                Ok(())
            }
            Some(ControlMessageId::Null) | None => {
                self.warnings += 1;
                tracing::warn!(message_id = reader.message_id(), "unknown control message");
                Ok(())
            }
        }
    }
}

enum StreamSource {
    Socket(TcpStream),
    File(File),
}

impl StreamSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Socket(stream) => stream.read(buf),
            Self::File(file) => file.read(buf),
        }
    }
}

/// Runs a [`ClientStream`] against a byte source on its own thread.
pub struct StreamThread {
    stream: Arc<Mutex<ClientStream>>,
    quit: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// How long a socket read may block before the quit flag is checked.
    const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Stream from a connected socket; playback runs as fast as data
    /// arrives.
    ///
    /// # Errors
    ///
    /// Socket configuration failures.
    pub fn spawn_tcp(socket: TcpStream, stream: ClientStream) -> std::io::Result<Self> {
        socket.set_read_timeout(Some(Self::READ_POLL_INTERVAL))?;
        Self::spawn(StreamSource::Socket(socket), stream)
    }

    /// Stream from a replay file, pacing frame boundaries by the recorded
    /// time unit.
    ///
    /// # Errors
    ///
    /// File open failures.
    pub fn spawn_file(path: &Path, stream: ClientStream) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Self::spawn(StreamSource::File(file), stream.paced(true))
    }

    fn spawn(mut source: StreamSource, stream: ClientStream) -> std::io::Result<Self> {
        let stream = Arc::new(Mutex::new(stream));
        let quit = Arc::new(AtomicBool::new(false));

        let thread_stream = Arc::clone(&stream);
        let thread_quit = Arc::clone(&quit);
        let thread = thread::Builder::new().name("telescene-stream".to_string()).spawn(move || {
            let mut packets = PacketStreamReader::new();
            let mut buf = vec![0u8; 16 * 1024];

            'outer: while !thread_quit.load(Ordering::Acquire) {
                let read = match source.read(&mut buf) {
                    Ok(0) => break, // end of stream
                    Ok(n) => n,
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Read errors end the stream without drama.
                        tracing::debug!("stream read ended: {e}");
                        break;
                    }
                };
                packets.feed(&buf[..read]);

                while let Some(packet) = packets.next() {
                    let delay = {
                        let mut stream = thread_stream.lock().unwrap_or_else(|e| e.into_inner());
                        if let Err(e) = stream.process_packet(packet.bytes()) {
                            tracing::warn!("stream aborted: {e}");
                            break 'outer;
                        }
                        stream.take_delay()
                    };
                    // Paced playback sleeps outside the lock.
                    if let Some(delay) = delay {
                        let mut remaining = delay;
                        while remaining > Duration::ZERO
                            && !thread_quit.load(Ordering::Acquire)
                        {
                            let step = remaining.min(Self::READ_POLL_INTERVAL);
                            thread::sleep(step);
                            remaining = remaining.saturating_sub(step);
                        }
                    }
                    if thread_quit.load(Ordering::Acquire) {
                        break 'outer;
                    }
                }
            }
        })?;

        Ok(Self { stream, quit, thread: Some(thread) })
    }

    /// Shared access to the stream state.
    #[must_use]
    pub fn stream(&self) -> Arc<Mutex<ClientStream>> {
        Arc::clone(&self.stream)
    }

    /// True while the worker thread runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the worker and wait for it to finish.
    pub fn stop(&mut self) {
        self.quit.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Wait for the worker to finish on its own (end of stream).
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use telescene_proto::{PacketWriter, messages::ShapeMessageId};

    use super::*;

    fn frame_packet(delta: u32, persist: bool) -> Vec<u8> {
        let mut writer =
            PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Frame as u16);
        ControlMessage {
            flags: if persist { ControlFlag::PERSIST_TRANSIENT } else { 0 },
            value32: delta,
            value64: 0,
        }
        .write(&mut writer)
        .unwrap();
        writer.finalise().unwrap().into_bytes()
    }

    fn sphere_packet(id: u32) -> Vec<u8> {
        use telescene_core::{Shape, Sphere, Vector3};
        let sphere = Sphere::new(id, Vector3::ZERO, 1.0);
        let mut writer = PacketWriter::new(sphere.routing_id(), ShapeMessageId::Create as u16);
        sphere.write_create(&mut writer).unwrap();
        writer.finalise().unwrap().into_bytes()
    }

    #[test]
    fn transient_sphere_lives_for_one_frame() {
        let mut stream = ClientStream::new();
        stream.process_packet(&sphere_packet(0)).unwrap();
        let shapes = stream.shapes(RoutingId::Sphere as u16).unwrap();
        assert_eq!(shapes.transient_count(), 1);

        stream.process_packet(&frame_packet(0, false)).unwrap();
        assert_eq!(stream.frame(), 1);
        let shapes = stream.shapes(RoutingId::Sphere as u16).unwrap();
        assert_eq!(shapes.transient_count(), 0);
    }

    #[test]
    fn persist_frame_keeps_transients() {
        let mut stream = ClientStream::new();
        stream.process_packet(&sphere_packet(0)).unwrap();
        stream.process_packet(&frame_packet(0, true)).unwrap();
        assert_eq!(stream.shapes(RoutingId::Sphere as u16).unwrap().transient_count(), 1);
    }

    #[test]
    fn reset_clears_state_and_frame() {
        let mut stream = ClientStream::new();
        stream.process_packet(&sphere_packet(3)).unwrap();
        stream.process_packet(&frame_packet(0, false)).unwrap();

        let mut writer =
            PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Reset as u16);
        ControlMessage::default().write(&mut writer).unwrap();
        stream.process_packet(writer.finalise().unwrap().bytes()).unwrap();

        assert_eq!(stream.frame(), 0);
        assert_eq!(stream.shapes(RoutingId::Sphere as u16).unwrap().persistent_count(), 0);
    }

    #[test]
    fn end_control_marks_stream_ended() {
        let mut stream = ClientStream::new();
        let mut writer =
            PacketWriter::new(RoutingId::Control as u16, ControlMessageId::End as u16);
        ControlMessage::default().write(&mut writer).unwrap();
        stream.process_packet(writer.finalise().unwrap().bytes()).unwrap();
        assert!(stream.ended());
    }

    #[test]
    fn unknown_routing_id_is_counted_and_skipped() {
        let mut stream = ClientStream::new();
        let mut writer = PacketWriter::new(900, 1);
        writer.write_u32(0).unwrap();
        stream.process_packet(writer.finalise().unwrap().bytes()).unwrap();
        assert_eq!(stream.warnings(), 1);
    }

    #[test]
    fn frame_count_hint_is_recorded() {
        let mut stream = ClientStream::new();
        let mut writer =
            PacketWriter::new(RoutingId::Control as u16, ControlMessageId::FrameCount as u16);
        ControlMessage { flags: 0, value32: 17, value64: 0 }.write(&mut writer).unwrap();
        stream.process_packet(writer.finalise().unwrap().bytes()).unwrap();
        assert_eq!(stream.total_frames_hint(), 17);
    }

    #[test]
    fn pacing_delay_scales_with_time_unit() {
        let mut stream = ClientStream::new().paced(true);
        // Default time unit is 1000 us per tick: 33 ticks is 33 ms.
        stream.process_packet(&frame_packet(33, false)).unwrap();
        assert_eq!(stream.take_delay(), Some(Duration::from_millis(33)));
        assert_eq!(stream.take_delay(), None);
    }

    #[test]
    fn unpaced_stream_never_delays() {
        let mut stream = ClientStream::new();
        stream.process_packet(&frame_packet(33, false)).unwrap();
        assert_eq!(stream.take_delay(), None);
    }
}
