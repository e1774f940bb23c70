//! Mesh set shape: placed instances of shared mesh resources.
//!
//! Each part references a mesh resource by id and carries its own
//! transform and tint. The geometry itself travels through the resource
//! subsystem; the shape's create packet only names the parts.

use std::sync::Arc;

use telescene_proto::{
    Attributes, CreateMessage, PacketReader, PacketWriter, Result, WireError,
    messages::{ObjectFlag, RoutingId},
};

use crate::{
    resource::Resource,
    shape::{Shape, ShapeCore, shape_builders},
};

/// One placed mesh within a [`MeshSet`].
#[derive(Clone)]
pub struct MeshSetPart {
    /// Referenced mesh resource id.
    pub mesh_id: u32,
    /// The resource itself; absent on instances decoded from the wire.
    pub resource: Option<Arc<dyn Resource>>,
    /// Part transform and tint, relative to the set.
    pub transform: Attributes,
}

impl std::fmt::Debug for MeshSetPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshSetPart")
            .field("mesh_id", &self.mesh_id)
            .field("has_resource", &self.resource.is_some())
            .field("transform", &self.transform)
            .finish()
    }
}

impl MeshSetPart {
    /// Part referencing `resource` with an identity transform.
    #[must_use]
    pub fn new(resource: Arc<dyn Resource>) -> Self {
        Self { mesh_id: resource.id(), resource: Some(resource), transform: Attributes::default() }
    }

    /// Set the part transform and tint.
    #[must_use]
    pub fn with_transform(mut self, transform: Attributes) -> Self {
        self.transform = transform;
        self
    }
}

/// A shape placing one or more mesh resources.
#[derive(Debug, Default, Clone)]
pub struct MeshSet {
    core: ShapeCore,
    parts: Vec<MeshSetPart>,
}

impl MeshSet {
    /// New empty set.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self { core: ShapeCore::new(id), parts: Vec::new() }
    }

    /// Append a part.
    #[must_use]
    pub fn with_part(mut self, part: MeshSetPart) -> Self {
        self.parts.push(part);
        self
    }

    /// The placed parts.
    #[must_use]
    pub fn parts(&self) -> &[MeshSetPart] {
        &self.parts
    }
}

impl Shape for MeshSet {
    fn routing_id(&self) -> u16 {
        RoutingId::MeshSet as u16
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        let core = self.core();
        if core.has_flag(ObjectFlag::REPLACE) && !core.has_flag(ObjectFlag::SKIP_RESOURCES) {
            return Err(WireError::Malformed("replace flag without skip-resources"));
        }
        core.create_message().write(writer)?;
        let part_count =
            u16::try_from(self.parts.len()).map_err(|_| WireError::Malformed("part count"))?;
        writer.write_u16(part_count)?;
        let double = core.has_flag(ObjectFlag::DOUBLE_PRECISION);
        for part in &self.parts {
            writer.write_u32(part.mesh_id)?;
            // Part transforms follow the shape's precision.
            let transform =
                if double { part.transform.to_double() } else { part.transform.to_single() };
            transform.write(writer)?;
        }
        Ok(())
    }

    fn read_create(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.core.apply_create(CreateMessage::read(reader)?);
        let double = self.core.has_flag(ObjectFlag::DOUBLE_PRECISION);
        let part_count = reader.read_u16()? as usize;
        self.parts = Vec::with_capacity(part_count);
        for _ in 0..part_count {
            let mesh_id = reader.read_u32()?;
            let transform = Attributes::read(reader, double)?;
            self.parts.push(MeshSetPart { mesh_id, resource: None, transform });
        }
        Ok(())
    }

    fn resources(&self) -> Vec<Arc<dyn Resource>> {
        self.parts.iter().filter_map(|part| part.resource.clone()).collect()
    }
}

shape_builders!(MeshSet);

#[cfg(test)]
mod tests {
    use telescene_proto::messages::ShapeMessageId;

    use super::*;
    use crate::mesh::{DrawType, SimpleMesh};

    fn part_mesh(id: u32) -> Arc<SimpleMesh> {
        Arc::new(SimpleMesh::new(id, DrawType::Triangles).with_vertices(vec![[0.0; 3]; 3]))
    }

    #[test]
    fn parts_round_trip() {
        let mut tint = Attributes::default();
        tint.set_colour(0x00FF_00FF);
        tint.set_position([1.0, 0.0, 0.0]);

        let set = MeshSet::new(20)
            .with_part(MeshSetPart::new(part_mesh(100)))
            .with_part(MeshSetPart::new(part_mesh(101)).with_transform(tint));

        let mut writer = PacketWriter::new(set.routing_id(), ShapeMessageId::Create as u16);
        set.write_create(&mut writer).unwrap();
        let packet = writer.finalise().unwrap();

        let mut back = MeshSet::default();
        back.read_create(&mut packet.reader().unwrap()).unwrap();
        assert_eq!(back.parts().len(), 2);
        assert_eq!(back.parts()[0].mesh_id, 100);
        assert_eq!(back.parts()[1].mesh_id, 101);
        assert_eq!(back.parts()[1].transform.colour(), 0x00FF_00FF);
        assert_eq!(back.parts()[1].transform.position(), [1.0, 0.0, 0.0]);
        assert!(back.parts()[0].resource.is_none());
    }

    #[test]
    fn set_enumerates_its_resources() {
        let set = MeshSet::new(1)
            .with_part(MeshSetPart::new(part_mesh(5)))
            .with_part(MeshSetPart::new(part_mesh(6)));
        let resources = set.resources();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].id(), 5);
        assert_eq!(resources[1].id(), 6);
    }
}
