//! Shape cache handler.
//!
//! One instance serves one shape routing id, holding the live instances:
//! transient shapes (id zero) in arrival order, flushed at frame
//! boundaries, and persistent shapes by id until destroyed. Create with
//! the replace flag swaps an existing instance; a duplicate persistent id
//! without it is rejected.

use std::{any::Any, collections::HashMap};

use telescene_core::{
    DataCursor, DataStatus, Shape,
    shapes::{
        Arrow, Capsule, Cone, Cuboid, Cylinder, MeshSet, MeshShape, Plane, PointCloudShape, Pose,
        Sphere, Star, Text2D, Text3D,
    },
};
use telescene_proto::{
    Packet, PacketReader, PacketWriter, UpdateMessage,
    messages::{ObjectFlag, RoutingId, ShapeMessageId},
};

use crate::{error::ClientError, handler::MessageHandler};

type ShapeFactory = fn() -> Box<dyn Shape>;

/// Caches shape instances for one routing id.
pub struct ShapeCacheHandler {
    routing_id: u16,
    name: &'static str,
    factory: ShapeFactory,
    persistent: HashMap<u32, Box<dyn Shape>>,
    transient: Vec<Box<dyn Shape>>,
    warnings: u64,
}

impl ShapeCacheHandler {
    /// New cache producing instances through `factory`.
    #[must_use]
    pub fn new(routing_id: u16, name: &'static str, factory: ShapeFactory) -> Self {
        Self {
            routing_id,
            name,
            factory,
            persistent: HashMap::new(),
            transient: Vec::new(),
            warnings: 0,
        }
    }

    /// Handlers for every built-in shape routing id.
    #[must_use]
    pub fn built_in() -> Vec<Self> {
        fn factory<S: Shape + Default + 'static>() -> Box<dyn Shape> {
            Box::new(S::default())
        }
        vec![
            Self::new(RoutingId::Sphere as u16, "sphere", factory::<Sphere>),
            Self::new(RoutingId::Box as u16, "box", factory::<Cuboid>),
            Self::new(RoutingId::Cone as u16, "cone", factory::<Cone>),
            Self::new(RoutingId::Cylinder as u16, "cylinder", factory::<Cylinder>),
            Self::new(RoutingId::Capsule as u16, "capsule", factory::<Capsule>),
            Self::new(RoutingId::Plane as u16, "plane", factory::<Plane>),
            Self::new(RoutingId::Star as u16, "star", factory::<Star>),
            Self::new(RoutingId::Arrow as u16, "arrow", factory::<Arrow>),
            Self::new(RoutingId::MeshShape as u16, "mesh-shape", factory::<MeshShape>),
            Self::new(RoutingId::MeshSet as u16, "mesh-set", factory::<MeshSet>),
            Self::new(RoutingId::PointCloud as u16, "point-cloud", factory::<PointCloudShape>),
            Self::new(RoutingId::Text3D as u16, "text-3d", factory::<Text3D>),
            Self::new(RoutingId::Text2D as u16, "text-2d", factory::<Text2D>),
            Self::new(RoutingId::Pose as u16, "pose", factory::<Pose>),
        ]
    }

    /// A persistent shape by id.
    #[must_use]
    pub fn shape(&self, id: u32) -> Option<&dyn Shape> {
        self.persistent.get(&id).map(AsRef::as_ref)
    }

    /// Number of live persistent shapes.
    #[must_use]
    pub fn persistent_count(&self) -> usize {
        self.persistent.len()
    }

    /// Number of transient shapes in the current frame.
    #[must_use]
    pub fn transient_count(&self) -> usize {
        self.transient.len()
    }

    /// Count of discarded or unroutable messages.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    fn warn(&mut self, error: &ClientError) {
        self.warnings += 1;
        tracing::warn!(handler = self.name, "{error}");
    }

    fn handle_create(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        let mut shape = (self.factory)();
        shape.read_create(reader)?;

        let core = shape.core();
        if core.has_flag(ObjectFlag::REPLACE) && !core.has_flag(ObjectFlag::SKIP_RESOURCES) {
            return Err(ClientError::Wire(telescene_proto::WireError::Malformed(
                "replace flag without skip-resources",
            )));
        }

        let id = shape.id();
        if id == 0 {
            self.transient.push(shape);
            return Ok(());
        }
        if self.persistent.contains_key(&id) && !core.has_flag(ObjectFlag::REPLACE) {
            return Err(ClientError::DuplicateShape { routing_id: self.routing_id, id });
        }
        self.persistent.insert(id, shape);
        Ok(())
    }

    fn handle_update(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        let message = UpdateMessage::read(reader)?;
        let Some(shape) = self.persistent.get_mut(&message.id) else {
            return Err(ClientError::UnknownShape { routing_id: self.routing_id, id: message.id });
        };
        shape.core_mut().apply_update(&message);
        Ok(())
    }

    fn handle_data(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        // Peek the id so the data can be routed without consuming it; the
        // shape's own reader re-reads the data message header.
        let id_bytes = reader.peek(4)?;
        let id = u32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);

        let shape = if id == 0 {
            self.transient.last_mut()
        } else {
            self.persistent.get_mut(&id)
        };
        let Some(shape) = shape else {
            return Err(ClientError::UnknownShape { routing_id: self.routing_id, id });
        };
        shape.read_data(reader)?;
        Ok(())
    }

    fn handle_destroy(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        let id = reader.read_u32()?;
        if self.persistent.remove(&id).is_none() {
            return Err(ClientError::UnknownShape { routing_id: self.routing_id, id });
        }
        Ok(())
    }

    fn snapshot_shape(&self, shape: &dyn Shape, out: &mut Vec<Packet>) {
        let mut writer = PacketWriter::new(self.routing_id, ShapeMessageId::Create as u16);
        if shape.write_create(&mut writer).is_err() {
            return;
        }
        let Ok(packet) = writer.finalise() else {
            return;
        };
        out.push(packet);

        if shape.is_complex() {
            let mut cursor = DataCursor::default();
            loop {
                let mut writer = PacketWriter::new(self.routing_id, ShapeMessageId::Data as u16);
                let Ok(status) = shape.write_data(&mut writer, &mut cursor) else {
                    return;
                };
                if writer.payload_size() > 0 {
                    match writer.finalise() {
                        Ok(packet) => out.push(packet),
                        Err(_) => return,
                    }
                }
                if status == DataStatus::Done {
                    return;
                }
            }
        }
    }
}

impl MessageHandler for ShapeCacheHandler {
    fn routing_id(&self) -> u16 {
        self.routing_id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn end_frame(&mut self, _frame: u32, persist_transient: bool) {
        if !persist_transient {
            self.transient.clear();
        }
    }

    fn reset(&mut self) {
        self.persistent.clear();
        self.transient.clear();
    }

    fn handle(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        let result = match ShapeMessageId::from_u16(reader.message_id()) {
            Some(ShapeMessageId::Create) => self.handle_create(reader),
            Some(ShapeMessageId::Update) => self.handle_update(reader),
            Some(ShapeMessageId::Data) => self.handle_data(reader),
            Some(ShapeMessageId::Destroy) => self.handle_destroy(reader),
            Some(ShapeMessageId::Null) | None => Err(ClientError::UnknownMessage {
                routing_id: self.routing_id,
                message_id: reader.message_id(),
            }),
        };
        // Cache violations are logged and absorbed; the offending message
        // is discarded without disturbing existing state.
        if let Err(e) = result {
            self.warn(&e);
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Packet> {
        let mut out = Vec::new();
        for shape in self.persistent.values() {
            self.snapshot_shape(shape.as_ref(), &mut out);
        }
        for shape in &self.transient {
            self.snapshot_shape(shape.as_ref(), &mut out);
        }
        out
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use telescene_core::Vector3;

    use super::*;

    fn sphere_handler() -> ShapeCacheHandler {
        ShapeCacheHandler::new(RoutingId::Sphere as u16, "sphere", || {
            Box::new(Sphere::default())
        })
    }

    fn create_packet(shape: &dyn Shape) -> Packet {
        let mut writer = PacketWriter::new(shape.routing_id(), ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        writer.finalise().unwrap()
    }

    fn feed(handler: &mut ShapeCacheHandler, packet: &Packet) {
        handler.handle(&mut packet.reader().unwrap()).unwrap();
    }

    #[test]
    fn transient_shapes_flush_on_frame_end() {
        let mut handler = sphere_handler();
        feed(&mut handler, &create_packet(&Sphere::new(0, Vector3::ZERO, 1.0)));
        assert_eq!(handler.transient_count(), 1);

        handler.end_frame(1, false);
        assert_eq!(handler.transient_count(), 0);
    }

    #[test]
    fn persist_flag_keeps_transients_for_the_frame() {
        let mut handler = sphere_handler();
        feed(&mut handler, &create_packet(&Sphere::new(0, Vector3::ZERO, 1.0)));
        handler.end_frame(1, true);
        assert_eq!(handler.transient_count(), 1);
        handler.end_frame(2, false);
        assert_eq!(handler.transient_count(), 0);
    }

    #[test]
    fn persistent_shape_lives_until_destroy() {
        let mut handler = sphere_handler();
        feed(&mut handler, &create_packet(&Sphere::new(42, Vector3::ZERO, 1.0)));
        for frame in 1..10 {
            handler.end_frame(frame, false);
        }
        assert!(handler.shape(42).is_some());

        let mut writer = PacketWriter::new(RoutingId::Sphere as u16, ShapeMessageId::Destroy as u16);
        telescene_proto::DestroyMessage { id: 42 }.write(&mut writer).unwrap();
        feed(&mut handler, &writer.finalise().unwrap());
        assert!(handler.shape(42).is_none());
    }

    #[test]
    fn duplicate_persistent_id_is_discarded() {
        let mut handler = sphere_handler();
        feed(&mut handler, &create_packet(&Sphere::new(7, Vector3::ZERO, 1.0)));
        feed(&mut handler, &create_packet(&Sphere::new(7, Vector3::ZERO, 2.0)));
        assert_eq!(handler.warnings(), 1);
        // The original instance survives.
        let kept = handler.shape(7).unwrap();
        assert_eq!(kept.core().attributes.scale()[0], 1.0);
    }

    #[test]
    fn replace_flag_swaps_the_instance() {
        let mut handler = sphere_handler();
        feed(&mut handler, &create_packet(&Sphere::new(7, Vector3::ZERO, 1.0)));
        feed(
            &mut handler,
            &create_packet(&Sphere::new(7, Vector3::ZERO, 2.0).replace(true)),
        );
        assert_eq!(handler.warnings(), 0);
        let kept = handler.shape(7).unwrap();
        assert_eq!(kept.core().attributes.scale()[0], 2.0);
    }

    #[test]
    fn update_with_rotation_bit_leaves_rest_alone() {
        use telescene_proto::messages::UpdateFlag;

        let mut handler = sphere_handler();
        let sphere = Sphere::new(42, Vector3::new(1.0, 2.0, 3.0), 1.0)
            .with_colour(telescene_core::Colour(0xFF00_FFFF));
        feed(&mut handler, &create_packet(&sphere));

        let mut attributes = telescene_proto::Attributes::default();
        attributes.set_rotation([0.0, 0.0, std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2]);
        let update = UpdateMessage {
            id: 42,
            flags: UpdateFlag::UPDATE_MODE | UpdateFlag::ROTATION,
            attributes,
        };
        let mut writer = PacketWriter::new(RoutingId::Sphere as u16, ShapeMessageId::Update as u16);
        update.write(&mut writer).unwrap();
        feed(&mut handler, &writer.finalise().unwrap());

        let shape = handler.shape(42).unwrap();
        assert_eq!(shape.core().attributes.position(), [1.0, 2.0, 3.0]);
        assert_eq!(shape.core().attributes.colour(), 0xFF00_FFFF);
        let rotation = shape.core().attributes.rotation();
        assert!((rotation[2] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn snapshot_reemits_create_packets() {
        let mut handler = sphere_handler();
        feed(&mut handler, &create_packet(&Sphere::new(1, Vector3::ZERO, 1.0)));
        feed(&mut handler, &create_packet(&Sphere::new(2, Vector3::ONE, 2.0)));

        let packets = handler.snapshot();
        assert_eq!(packets.len(), 2);

        let mut replay = sphere_handler();
        for packet in &packets {
            feed(&mut replay, packet);
        }
        assert_eq!(replay.persistent_count(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut handler = sphere_handler();
        feed(&mut handler, &create_packet(&Sphere::new(0, Vector3::ZERO, 1.0)));
        feed(&mut handler, &create_packet(&Sphere::new(5, Vector3::ZERO, 1.0)));
        handler.reset();
        assert_eq!(handler.transient_count(), 0);
        assert_eq!(handler.persistent_count(), 0);
    }
}
