//! Per-client connection state.
//!
//! Each connection owns a sink (socket or replay file), a pending
//! collation buffer, per-connection resource reference counts, a transfer
//! queue and a [`ResourcePacker`]. Shape API calls append packets to the
//! pending buffer; [`Connection::update_frame`] drains queued resource
//! transfers, flushes the collation envelope, then emits the frame
//! boundary control message.
//!
//! Ordering: within one connection, bytes go out in shape API call order,
//! except that a resource's create and data packets are delivered before
//! the create packet of any shape referencing it: queued transfers drain
//! ahead of the pending shape collation on every flush.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use telescene_core::{DataCursor, DataStatus, Resource, ResourceKey, ResourcePacker, Shape};
use telescene_proto::{
    CollatedPacketWriter, CompressionLevel, ControlMessage, Packet, PacketWriter,
    ServerInfoMessage, WireError,
    messages::{ControlFlag, ControlMessageId, ObjectFlag, RoutingId, ShapeMessageId},
};

use crate::{error::ServerError, settings::ServerSettings, sink::Sink};

/// A live outgoing connection: shape API calls map to queued packets.
pub trait Connection: Send {
    /// Peer address or file path.
    fn address(&self) -> String;

    /// True until the sink fails or the connection is closed.
    fn is_connected(&self) -> bool;

    /// Close the sink; file sinks finalise their frame count.
    fn close(&mut self);

    /// Frames completed on this connection.
    fn frame_count(&self) -> u32;

    /// Send the server info record, adopting its time unit for frame
    /// deltas.
    ///
    /// # Errors
    ///
    /// Write failures disconnect the connection.
    fn send_server_info(&mut self, info: &ServerInfoMessage) -> Result<usize, ServerError>;

    /// Queue a shape's create packet (and data packets for complex
    /// shapes), referencing its resources.
    ///
    /// # Errors
    ///
    /// Encoding failures and disconnection.
    fn create(&mut self, shape: &dyn Shape) -> Result<usize, ServerError>;

    /// Queue a destroy for the shape, dereferencing its resources.
    ///
    /// # Errors
    ///
    /// Encoding failures and disconnection.
    fn destroy(&mut self, shape: &dyn Shape) -> Result<usize, ServerError>;

    /// Queue an attribute update for the shape.
    ///
    /// # Errors
    ///
    /// Encoding failures and disconnection.
    fn update(&mut self, shape: &dyn Shape) -> Result<usize, ServerError>;

    /// End the current frame: drain transfers, flush collation, emit the
    /// frame boundary.
    ///
    /// `dt` is the frame delta in seconds; `flush` false keeps transient
    /// shapes alive on the client for this frame.
    ///
    /// # Errors
    ///
    /// Write failures disconnect the connection.
    fn update_frame(&mut self, dt: f32, flush: bool) -> Result<usize, ServerError>;

    /// Send queued resource packets, up to `byte_budget` bytes (zero for
    /// unlimited).
    ///
    /// # Errors
    ///
    /// Write failures disconnect the connection.
    fn update_transfers(&mut self, byte_budget: usize) -> Result<usize, ServerError>;

    /// Add a reference to `resource`; the first reference queues it for
    /// transfer. Returns the new reference count.
    fn reference_resource(&mut self, resource: &Arc<dyn Resource>) -> u32;

    /// Drop a reference to the keyed resource; the last reference queues a
    /// destroy packet. Returns the remaining count.
    fn release_resource(&mut self, key: ResourceKey) -> u32;

    /// Send a control message immediately, outside collation.
    ///
    /// # Errors
    ///
    /// Write failures disconnect the connection.
    fn send_control(
        &mut self,
        id: ControlMessageId,
        message: &ControlMessage,
    ) -> Result<usize, ServerError>;
}

struct ResourceEntry {
    resource: Arc<dyn Resource>,
    references: u32,
}

enum PendingBuffer {
    Raw(Vec<u8>),
    Collated(CollatedPacketWriter),
}

/// Connection over a byte sink.
pub(crate) struct ClientConnection<S: Sink> {
    sink: S,
    settings: ServerSettings,
    pending: PendingBuffer,
    /// Destroy packets for resources whose last reference dropped; sent
    /// with the next transfer drain.
    pending_resource_destroys: Vec<Packet>,
    resources: HashMap<ResourceKey, ResourceEntry>,
    transfer_queue: VecDeque<ResourceKey>,
    packer: ResourcePacker,
    frame: u32,
    /// Microseconds per frame tick, from the announced server info.
    time_unit: u64,
    connected: bool,
}

impl<S: Sink> ClientConnection<S> {
    pub(crate) fn new(sink: S, settings: ServerSettings) -> Self {
        let pending = if settings.collate() {
            let level =
                if settings.compress() { settings.compression } else { CompressionLevel::None };
            PendingBuffer::Collated(CollatedPacketWriter::new(level))
        } else {
            PendingBuffer::Raw(Vec::new())
        };
        Self {
            sink,
            settings,
            pending,
            pending_resource_destroys: Vec::new(),
            resources: HashMap::new(),
            transfer_queue: VecDeque::new(),
            packer: ResourcePacker::new(),
            frame: 0,
            time_unit: ServerInfoMessage::default().time_unit,
            connected: true,
        }
    }

    /// On sink failure: mark disconnected and release every reference so
    /// resource lifetimes do not leak into a dead connection.
    fn fail(&mut self, error: std::io::Error) -> ServerError {
        tracing::debug!(address = %self.sink.address(), "connection write failed: {error}");
        self.connected = false;
        self.resources.clear();
        self.transfer_queue.clear();
        self.pending_resource_destroys.clear();
        self.packer.cancel();
        ServerError::Io(error)
    }

    fn write_direct(&mut self, bytes: &[u8]) -> Result<usize, ServerError> {
        if !self.connected {
            return Err(ServerError::Disconnected);
        }
        match self.sink.write_bytes(bytes) {
            Ok(()) => Ok(bytes.len()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Append a packet to the pending buffer, flushing first when the
    /// collation envelope would overflow.
    fn queue_packet(&mut self, packet: &Packet) -> Result<usize, ServerError> {
        if !self.connected {
            return Err(ServerError::Disconnected);
        }
        let size = packet.bytes().len();
        let first = match &mut self.pending {
            PendingBuffer::Raw(buf) => {
                buf.extend_from_slice(packet.bytes());
                return Ok(size);
            }
            PendingBuffer::Collated(writer) => writer.append(packet),
        };
        match first {
            Ok(()) => Ok(size),
            Err(WireError::WouldOverflow { .. }) => {
                // Keep resource packets ahead of the shapes already
                // collated, then start a fresh envelope. A packet too
                // large for any envelope goes out stand-alone.
                self.flush_queued(0)?;
                let second = match &mut self.pending {
                    PendingBuffer::Raw(_) => return Err(ServerError::Disconnected),
                    PendingBuffer::Collated(writer) => writer.append(packet),
                };
                match second {
                    Ok(()) => Ok(size),
                    Err(WireError::WouldOverflow { .. }) => self.write_direct(packet.bytes()),
                    Err(e) => Err(ServerError::Wire(e)),
                }
            }
            Err(e) => Err(ServerError::Wire(e)),
        }
    }

    /// Drain transfers then flush the pending buffer to the sink.
    fn flush_queued(&mut self, transfer_budget: usize) -> Result<usize, ServerError> {
        let mut sent = self.drain_transfers(transfer_budget)?;
        sent += self.flush_pending()?;
        Ok(sent)
    }

    fn flush_pending(&mut self) -> Result<usize, ServerError> {
        match &mut self.pending {
            PendingBuffer::Raw(buf) => {
                if buf.is_empty() {
                    return Ok(0);
                }
                let bytes = std::mem::take(buf);
                self.write_direct(&bytes)
            }
            PendingBuffer::Collated(writer) => {
                if writer.is_empty() {
                    return Ok(0);
                }
                let envelope = writer.finalise()?;
                self.write_direct(envelope.bytes())
            }
        }
    }

    /// Send queued resource destroys and transfer packets. A zero budget
    /// drains everything queued.
    fn drain_transfers(&mut self, byte_budget: usize) -> Result<usize, ServerError> {
        let mut sent = 0;

        for packet in std::mem::take(&mut self.pending_resource_destroys) {
            sent += self.write_direct(packet.bytes())?;
        }

        loop {
            if byte_budget != 0 && sent >= byte_budget {
                break;
            }
            if !self.packer.is_active() {
                let Some(key) = self.transfer_queue.pop_front() else {
                    break;
                };
                // Skip resources released while they waited in the queue.
                let Some(entry) = self.resources.get(&key) else {
                    continue;
                };
                self.packer.assign(entry.resource.clone());
            }

            let key = self.packer.resource().map(|r| r.key());
            let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
            match self.packer.next_packet(&mut writer, self.settings.transfer_byte_limit) {
                Ok(true) => {
                    let packet = writer.finalise()?;
                    sent += self.write_direct(packet.bytes())?;
                    self.packer.take_last_completed();
                }
                Ok(false) => break,
                Err(e) => {
                    // Failed transfer: tell the client to discard the
                    // partial state, keep the reference so a later drain
                    // can retry from scratch. Stop draining rather than
                    // retrying the same resource in a tight loop.
                    tracing::warn!("resource transfer failed: {e}");
                    if let Some(key) = key {
                        let resource = self.resources.get(&key).map(|r| r.resource.clone());
                        if let Some(resource) = resource {
                            let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
                            resource.write_destroy(&mut writer)?;
                            let packet = writer.finalise()?;
                            sent += self.write_direct(packet.bytes())?;
                            self.transfer_queue.push_back(key);
                        }
                    }
                    break;
                }
            }
        }
        Ok(sent)
    }

    fn reference_shape_resources(&mut self, shape: &dyn Shape) {
        if shape.core().has_flag(ObjectFlag::SKIP_RESOURCES) {
            return;
        }
        for resource in shape.resources() {
            self.reference_resource(&resource);
        }
    }

    fn release_shape_resources(&mut self, shape: &dyn Shape) {
        if shape.core().has_flag(ObjectFlag::SKIP_RESOURCES) {
            return;
        }
        for resource in shape.resources() {
            self.release_resource(resource.key());
        }
    }

    fn frame_ticks(&self, dt: f32) -> u32 {
        if dt <= 0.0 {
            return 0;
        }
        let micros = f64::from(dt) * 1_000_000.0;
        (micros / self.time_unit.max(1) as f64).round() as u32
    }
}

impl<S: Sink> Connection for ClientConnection<S> {
    fn address(&self) -> String {
        self.sink.address()
    }

    fn is_connected(&self) -> bool {
        self.connected && self.sink.is_open()
    }

    fn close(&mut self) {
        if self.connected {
            // Best effort: push out whatever is queued, then mark the end
            // of the stream before the sink finalises.
            let _ = self.flush_queued(0);
            let _ = self.send_control(ControlMessageId::End, &ControlMessage::default());
            self.sink.close(self.frame);
            self.connected = false;
        }
    }

    fn frame_count(&self) -> u32 {
        self.frame
    }

    fn send_server_info(&mut self, info: &ServerInfoMessage) -> Result<usize, ServerError> {
        self.time_unit = info.time_unit.max(1);
        let mut writer = PacketWriter::new(RoutingId::ServerInfo as u16, 0);
        info.write(&mut writer)?;
        let packet = writer.finalise()?;
        self.write_direct(packet.bytes())
    }

    fn create(&mut self, shape: &dyn Shape) -> Result<usize, ServerError> {
        if !self.connected {
            return Err(ServerError::Disconnected);
        }
        self.reference_shape_resources(shape);

        let mut sent = 0;
        let mut writer = PacketWriter::new(shape.routing_id(), ShapeMessageId::Create as u16);
        shape.write_create(&mut writer)?;
        sent += self.queue_packet(&writer.finalise()?)?;

        if shape.is_complex() {
            let mut cursor = DataCursor::default();
            loop {
                let mut writer =
                    PacketWriter::new(shape.routing_id(), ShapeMessageId::Data as u16);
                let status = shape.write_data(&mut writer, &mut cursor)?;
                if writer.payload_size() > 0 {
                    sent += self.queue_packet(&writer.finalise()?)?;
                }
                if status == DataStatus::Done {
                    break;
                }
            }
        }
        Ok(sent)
    }

    fn destroy(&mut self, shape: &dyn Shape) -> Result<usize, ServerError> {
        if !self.connected {
            return Err(ServerError::Disconnected);
        }
        let mut writer = PacketWriter::new(shape.routing_id(), ShapeMessageId::Destroy as u16);
        shape.write_destroy(&mut writer)?;
        let sent = self.queue_packet(&writer.finalise()?)?;
        self.release_shape_resources(shape);
        Ok(sent)
    }

    fn update(&mut self, shape: &dyn Shape) -> Result<usize, ServerError> {
        if !self.connected {
            return Err(ServerError::Disconnected);
        }
        let mut writer = PacketWriter::new(shape.routing_id(), ShapeMessageId::Update as u16);
        shape.write_update(&mut writer)?;
        self.queue_packet(&writer.finalise()?)
    }

    fn update_frame(&mut self, dt: f32, flush: bool) -> Result<usize, ServerError> {
        let mut sent = self.flush_queued(0)?;

        let message = ControlMessage {
            flags: if flush { 0 } else { ControlFlag::PERSIST_TRANSIENT },
            value32: self.frame_ticks(dt),
            value64: 0,
        };
        let mut writer =
            PacketWriter::new(RoutingId::Control as u16, ControlMessageId::Frame as u16);
        message.write(&mut writer)?;
        let packet = writer.finalise()?;

        if self.settings.naked_frames() {
            sent += self.write_direct(packet.bytes())?;
        } else {
            sent += self.queue_packet(&packet)?;
            sent += self.flush_pending()?;
        }

        if let Err(e) = self.sink.flush() {
            return Err(self.fail(e));
        }
        self.frame = self.frame.wrapping_add(1);
        Ok(sent)
    }

    fn update_transfers(&mut self, byte_budget: usize) -> Result<usize, ServerError> {
        if !self.connected {
            return Err(ServerError::Disconnected);
        }
        self.drain_transfers(byte_budget)
    }

    fn reference_resource(&mut self, resource: &Arc<dyn Resource>) -> u32 {
        let key = resource.key();
        let entry = self.resources.entry(key).or_insert_with(|| ResourceEntry {
            resource: resource.clone(),
            references: 0,
        });
        entry.references += 1;
        if entry.references == 1 {
            self.transfer_queue.push_back(key);
        }
        entry.references
    }

    fn release_resource(&mut self, key: ResourceKey) -> u32 {
        let Some(entry) = self.resources.get_mut(&key) else {
            return 0;
        };
        entry.references -= 1;
        if entry.references > 0 {
            return entry.references;
        }

        // Last reference: retract the resource entirely and queue a
        // destroy so the client drops whatever it has received.
        let entry = match self.resources.remove(&key) {
            Some(entry) => entry,
            None => return 0,
        };
        self.transfer_queue.retain(|&queued| queued != key);
        if self.packer.resource().is_some_and(|r| r.key() == key) {
            self.packer.cancel();
        }

        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
        match entry.resource.write_destroy(&mut writer).and_then(|()| writer.finalise()) {
            Ok(packet) => self.pending_resource_destroys.push(packet),
            Err(e) => tracing::warn!("failed to encode resource destroy: {e}"),
        }
        0
    }

    fn send_control(
        &mut self,
        id: ControlMessageId,
        message: &ControlMessage,
    ) -> Result<usize, ServerError> {
        let mut writer = PacketWriter::new(RoutingId::Control as u16, id as u16);
        message.write(&mut writer)?;
        let packet = writer.finalise()?;
        self.write_direct(packet.bytes())
    }
}

#[cfg(test)]
mod tests {
    use telescene_core::{DrawType, MeshSet, MeshSetPart, SimpleMesh, Sphere, Vector3};
    use telescene_proto::{
        CollatedPacketDecoder, PacketStreamReader,
        messages::{MeshMessageId, ShapeMessageId},
    };

    use super::*;
    use crate::{settings::ServerFlag, sink::testing::MemorySink};

    fn settings_uncollated() -> ServerSettings {
        ServerSettings { flags: ServerFlag::NAKED_FRAME_MESSAGES, ..ServerSettings::default() }
    }

    /// Decode every packet the sink saw, unpacking collation, as
    /// (routing id, message id) pairs.
    fn decode_stream(bytes: &[u8]) -> Vec<(u16, u16)> {
        let mut stream = PacketStreamReader::new();
        stream.feed(bytes);
        let mut out = Vec::new();
        let mut decoder = CollatedPacketDecoder::new();
        while let Some(packet) = stream.next() {
            decoder.set_packet(packet.bytes()).unwrap();
            while let Some(inner) = decoder.next().unwrap() {
                let reader = telescene_proto::PacketReader::new(inner).unwrap();
                out.push((reader.routing_id(), reader.message_id()));
            }
        }
        assert_eq!(stream.warnings(), 0);
        out
    }

    fn test_mesh(id: u32) -> Arc<dyn Resource> {
        Arc::new(
            SimpleMesh::new(id, DrawType::Triangles)
                .with_vertices(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
                .with_indices(vec![0, 1, 2]),
        )
    }

    fn mesh_set(shape_id: u32, resource: &Arc<dyn Resource>) -> MeshSet {
        MeshSet::new(shape_id).with_part(MeshSetPart::new(resource.clone()))
    }

    #[test]
    fn frame_flush_emits_shape_then_frame_control() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), settings_uncollated());

        let sphere = Sphere::new(0, Vector3::ZERO, 1.0);
        connection.create(&sphere).unwrap();
        connection.update_frame(0.0, true).unwrap();

        let messages = decode_stream(&sink.contents());
        assert_eq!(
            messages,
            vec![
                (RoutingId::Sphere as u16, ShapeMessageId::Create as u16),
                (RoutingId::Control as u16, ControlMessageId::Frame as u16),
            ]
        );
        assert_eq!(connection.frame_count(), 1);
    }

    #[test]
    fn collated_stream_decodes_to_same_messages() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), ServerSettings::default());

        for _ in 0..10 {
            connection.create(&Sphere::new(0, Vector3::ZERO, 1.0)).unwrap();
        }
        connection.update_frame(0.0, true).unwrap();

        let messages = decode_stream(&sink.contents());
        assert_eq!(messages.len(), 11);
        assert!(messages[..10]
            .iter()
            .all(|&m| m == (RoutingId::Sphere as u16, ShapeMessageId::Create as u16)));
        assert_eq!(
            messages[10],
            (RoutingId::Control as u16, ControlMessageId::Frame as u16)
        );
    }

    #[test]
    fn resource_packets_precede_referencing_shape() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), ServerSettings::default());

        let resource = test_mesh(500);
        connection.create(&mesh_set(1, &resource)).unwrap();
        connection.update_frame(0.0, true).unwrap();

        let messages = decode_stream(&sink.contents());
        let shape_create = messages
            .iter()
            .position(|&m| m == (RoutingId::MeshSet as u16, ShapeMessageId::Create as u16))
            .unwrap();
        let mesh_create = messages
            .iter()
            .position(|&m| m == (RoutingId::Mesh as u16, MeshMessageId::Create as u16))
            .unwrap();
        let mesh_finalise = messages
            .iter()
            .position(|&m| m == (RoutingId::Mesh as u16, MeshMessageId::Finalise as u16))
            .unwrap();
        assert!(mesh_create < mesh_finalise);
        assert!(mesh_finalise < shape_create);
    }

    #[test]
    fn shared_resource_transfers_once_and_destroys_once() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), ServerSettings::default());

        let resource = test_mesh(600);
        let shapes: Vec<MeshSet> = (1..=3).map(|id| mesh_set(id, &resource)).collect();
        for shape in &shapes {
            connection.create(shape).unwrap();
        }
        connection.update_frame(0.0, true).unwrap();

        let creates = decode_stream(&sink.contents())
            .iter()
            .filter(|&&m| m == (RoutingId::Mesh as u16, MeshMessageId::Create as u16))
            .count();
        assert_eq!(creates, 1);

        // Destroy all but the last referent: no resource destroy yet.
        connection.destroy(&shapes[0]).unwrap();
        connection.destroy(&shapes[1]).unwrap();
        connection.update_frame(0.0, true).unwrap();
        let destroys = decode_stream(&sink.contents())
            .iter()
            .filter(|&&m| m == (RoutingId::Mesh as u16, MeshMessageId::Destroy as u16))
            .count();
        assert_eq!(destroys, 0);

        connection.destroy(&shapes[2]).unwrap();
        connection.update_frame(0.0, true).unwrap();
        let destroys = decode_stream(&sink.contents())
            .iter()
            .filter(|&&m| m == (RoutingId::Mesh as u16, MeshMessageId::Destroy as u16))
            .count();
        assert_eq!(destroys, 1);
    }

    #[test]
    fn skip_resources_shape_transfers_nothing() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), ServerSettings::default());

        let resource = test_mesh(700);
        let shape = mesh_set(1, &resource).skip_resources(true);
        connection.create(&shape).unwrap();
        connection.update_frame(0.0, true).unwrap();

        let mesh_messages = decode_stream(&sink.contents())
            .iter()
            .filter(|&&(routing, _)| routing == RoutingId::Mesh as u16)
            .count();
        assert_eq!(mesh_messages, 0);
    }

    #[test]
    fn frame_ticks_scale_by_time_unit() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), settings_uncollated());
        // Default time unit: 1000 us per tick, so 0.25 s is 250 ticks.
        assert_eq!(connection.frame_ticks(0.25), 250);
        connection
            .send_server_info(&ServerInfoMessage { time_unit: 500, ..ServerInfoMessage::default() })
            .unwrap();
        assert_eq!(connection.frame_ticks(0.25), 500);
    }

    #[test]
    fn failed_write_disconnects_and_releases_references() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), settings_uncollated());

        let resource = test_mesh(800);
        connection.create(&mesh_set(1, &resource)).unwrap();
        *sink.fail_writes.lock().unwrap() = true;
        assert!(connection.update_frame(0.0, true).is_err());
        assert!(!connection.is_connected());
        assert!(matches!(
            connection.create(&Sphere::new(0, Vector3::ZERO, 1.0)),
            Err(ServerError::Disconnected)
        ));
    }

    #[test]
    fn persist_flag_rides_the_frame_control() {
        let sink = MemorySink::new();
        let mut connection = ClientConnection::new(sink.clone(), settings_uncollated());
        connection.update_frame(0.0, false).unwrap();

        let mut stream = PacketStreamReader::new();
        stream.feed(&sink.contents());
        let packet = stream.next().unwrap();
        let mut reader = packet.reader().unwrap();
        let message = ControlMessage::read(&mut reader).unwrap();
        assert_eq!(message.flags & ControlFlag::PERSIST_TRANSIENT, ControlFlag::PERSIST_TRANSIENT);
    }
}
