//! The broadcast server.
//!
//! Every shape API call fans out to all live connections. The live list is
//! only touched on the server thread; the monitor delivers new clients
//! through its pending list and [`Server::commit_connections`] adopts
//! them, primes them with server info, frame count and the globally
//! referenced resources, and culls the disconnected.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use telescene_core::{Resource, ResourceKey, Shape};
use telescene_proto::{
    ControlMessage, ServerInfoMessage,
    messages::ControlMessageId,
};

use crate::{
    connection::{ClientConnection, Connection},
    error::ServerError,
    monitor::ConnectionMonitor,
    settings::ServerSettings,
    sink::FileSink,
};

/// Callback invoked for each newly committed connection.
pub type ConnectionCallback = Box<dyn FnMut(&mut dyn Connection) + Send>;

struct ServerInner {
    connections: Vec<Box<dyn Connection>>,
    /// Application-level resource references, replayed to new clients.
    resources: HashMap<ResourceKey, Arc<dyn Resource>>,
    callback: Option<ConnectionCallback>,
    frame: u32,
}

/// Broadcast server over TCP clients and replay file sinks.
pub struct Server {
    inner: Mutex<ServerInner>,
    monitor: ConnectionMonitor,
    settings: ServerSettings,
    info: ServerInfoMessage,
}

impl Server {
    /// New server; call
    /// [`connection_monitor().start(...)`](ConnectionMonitor::start) to
    /// begin accepting clients.
    #[must_use]
    pub fn new(settings: ServerSettings, info: ServerInfoMessage) -> Self {
        Self {
            inner: Mutex::new(ServerInner {
                connections: Vec::new(),
                resources: HashMap::new(),
                callback: None,
                frame: 0,
            }),
            monitor: ConnectionMonitor::new(settings.clone()),
            settings,
            info,
        }
    }

    /// The connection monitor owning the listen socket.
    #[must_use]
    pub fn connection_monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// The announced server info record.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfoMessage {
        &self.info
    }

    /// Register a callback run for every newly committed connection.
    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        self.lock().callback = Some(callback);
    }

    /// Number of live, committed connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Frames completed since the server started.
    #[must_use]
    pub fn frame_number(&self) -> u32 {
        self.lock().frame
    }

    /// Broadcast a shape create. Returns the number of connections that
    /// accepted it.
    pub fn create(&self, shape: &dyn Shape) -> usize {
        self.for_each_connection(|connection| connection.create(shape))
    }

    /// Broadcast a shape destroy.
    pub fn destroy(&self, shape: &dyn Shape) -> usize {
        self.for_each_connection(|connection| connection.destroy(shape))
    }

    /// Broadcast a shape update.
    pub fn update(&self, shape: &dyn Shape) -> usize {
        self.for_each_connection(|connection| connection.update(shape))
    }

    /// End the frame on every connection.
    ///
    /// `dt` is the frame delta in seconds; `flush` false keeps transient
    /// shapes alive for this frame.
    pub fn update_frame(&self, dt: f32, flush: bool) -> usize {
        let mut inner = self.lock();
        inner.frame = inner.frame.wrapping_add(1);
        Self::broadcast(&mut inner, |connection| connection.update_frame(dt, flush))
    }

    /// Drive queued resource transfers on every connection.
    pub fn update_transfers(&self, byte_budget: usize) -> usize {
        self.for_each_connection(|connection| connection.update_transfers(byte_budget))
    }

    /// Reference a resource application-wide: every current and future
    /// connection transfers it.
    pub fn reference_resource(&self, resource: &Arc<dyn Resource>) {
        let mut inner = self.lock();
        inner.resources.insert(resource.key(), resource.clone());
        for connection in &mut inner.connections {
            connection.reference_resource(resource);
        }
    }

    /// Release an application-wide resource reference.
    pub fn release_resource(&self, resource: &Arc<dyn Resource>) {
        let mut inner = self.lock();
        inner.resources.remove(&resource.key());
        for connection in &mut inner.connections {
            connection.release_resource(resource.key());
        }
    }

    /// Open a replay file recording the same stream as the TCP clients.
    ///
    /// # Errors
    ///
    /// File creation and prelude write failures.
    pub fn open_file_stream(&self, path: &Path) -> Result<(), ServerError> {
        let sink = FileSink::create(path, &self.info)?;
        let mut connection: Box<dyn Connection> =
            Box::new(ClientConnection::new(sink, self.settings.clone()));
        let mut inner = self.lock();
        Self::prime_connection(&mut inner, connection.as_mut(), None);
        inner.connections.push(connection);
        Ok(())
    }

    /// Adopt pending connections from the monitor and cull the dead.
    ///
    /// New connections receive the server info record, the current frame
    /// count and every globally referenced resource, then the connection
    /// callback. Expired connections are dropped after the callback
    /// returns.
    pub fn commit_connections(&self) {
        let fresh = self.monitor.drain_pending();
        let mut inner = self.lock();

        // Cull first so the callback never sees dead connections.
        let mut expired: Vec<Box<dyn Connection>> = Vec::new();
        let live = std::mem::take(&mut inner.connections);
        for connection in live {
            if connection.is_connected() {
                inner.connections.push(connection);
            } else {
                tracing::debug!(address = %connection.address(), "culling expired connection");
                expired.push(connection);
            }
        }

        for mut connection in fresh {
            Self::prime_connection(&mut inner, connection.as_mut(), Some(&self.info));
            if connection.is_connected() {
                inner.connections.push(connection);
            }
        }

        drop(inner);
        drop(expired);
    }

    /// Block until a connection is available (committed or pending) or
    /// the timeout expires. Returns the available count.
    pub fn wait_for_connection(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let available = self.connection_count() + self.monitor.pending_count();
            if available > 0 || Instant::now() >= deadline {
                return available;
            }
            self.monitor.poll_once();
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Close every connection, ending their streams, and stop the
    /// monitor.
    pub fn close(&self) {
        self.monitor.stop();
        let mut inner = self.lock();
        for connection in &mut inner.connections {
            connection.close();
        }
        inner.connections.clear();
        inner.resources.clear();
    }

    fn prime_connection(
        inner: &mut ServerInner,
        connection: &mut dyn Connection,
        info: Option<&ServerInfoMessage>,
    ) {
        // File sinks already carry the prelude (server info and the
        // frame-count packet patched on close); sockets get both here.
        if let Some(info) = info {
            let _ = connection.send_server_info(info);
            let _ = connection.send_control(
                ControlMessageId::FrameCount,
                &ControlMessage { flags: 0, value32: inner.frame, value64: 0 },
            );
        }
        for resource in inner.resources.values() {
            connection.reference_resource(resource);
        }
        if let Some(callback) = inner.callback.as_mut() {
            callback(connection);
        }
    }

    fn for_each_connection(
        &self,
        mut op: impl FnMut(&mut Box<dyn Connection>) -> Result<usize, ServerError>,
    ) -> usize {
        let mut inner = self.lock();
        Self::broadcast(&mut inner, &mut op)
    }

    fn broadcast(
        inner: &mut ServerInner,
        mut op: impl FnMut(&mut Box<dyn Connection>) -> Result<usize, ServerError>,
    ) -> usize {
        let mut succeeded = 0;
        for connection in &mut inner.connections {
            match op(connection) {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    // The connection is culled at the next commit.
                    tracing::debug!(address = %connection.address(), "broadcast failed: {e}");
                }
            }
        }
        succeeded
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use telescene_core::{Sphere, Vector3};
    use telescene_proto::{
        CollatedPacketDecoder, PacketReader, PacketStreamReader,
        messages::RoutingId,
    };

    use super::*;

    #[test]
    fn file_stream_records_and_finalises() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session000.3es");

        let server = Server::new(ServerSettings::default(), ServerInfoMessage::default());
        server.open_file_stream(&path).unwrap();
        assert_eq!(server.connection_count(), 1);

        for frame in 0..17 {
            let sphere = Sphere::new(0, Vector3::new(frame as f64, 0.0, 0.0), 1.0);
            assert_eq!(server.create(&sphere), 1);
            assert_eq!(server.update_frame(0.05, true), 1);
        }
        server.close();

        let bytes = std::fs::read(&path).unwrap();
        let mut stream = PacketStreamReader::new();
        stream.feed(&bytes);

        // Prelude: server info then the patched frame count.
        let info = stream.next().unwrap();
        assert_eq!(info.routing_id(), RoutingId::ServerInfo as u16);
        let count = stream.next().unwrap();
        assert_eq!(count.message_id(), ControlMessageId::FrameCount as u16);
        let message = ControlMessage::read(&mut count.reader().unwrap()).unwrap();
        assert_eq!(message.value32, 17);

        // Body decodes cleanly: 17 sphere creates, 17 frames, one end.
        let mut decoder = CollatedPacketDecoder::new();
        let (mut creates, mut frames, mut ends) = (0, 0, 0);
        while let Some(packet) = stream.next() {
            decoder.set_packet(packet.bytes()).unwrap();
            while let Some(inner) = decoder.next().unwrap() {
                let reader = PacketReader::new(inner).unwrap();
                match reader.routing_id() {
                    r if r == RoutingId::Sphere as u16 => creates += 1,
                    r if r == RoutingId::Control as u16 => {
                        match reader.message_id() {
                            m if m == ControlMessageId::Frame as u16 => frames += 1,
                            m if m == ControlMessageId::End as u16 => ends += 1,
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
        }
        assert_eq!(stream.warnings(), 0);
        assert_eq!((creates, frames, ends), (17, 17, 1));
    }

    #[test]
    fn frame_number_advances_with_update_frame() {
        let server = Server::new(ServerSettings::default(), ServerInfoMessage::default());
        assert_eq!(server.frame_number(), 0);
        server.update_frame(0.0, true);
        server.update_frame(0.0, true);
        assert_eq!(server.frame_number(), 2);
    }
}
