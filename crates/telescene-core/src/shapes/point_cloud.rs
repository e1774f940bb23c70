//! Point cloud shape: a view over a point cloud resource.
//!
//! The backing points travel through the resource subsystem; the shape
//! names the cloud, an optional index subset (streamed in data packets
//! when present) and a point render size hint.

use std::sync::Arc;

use telescene_proto::{
    CreateMessage, DataMessage, PacketReader, PacketWriter, Result, WireError,
    messages::{ObjectFlag, RoutingId},
};

use crate::{
    mesh::{PointCloud, read_u32_elements},
    resource::Resource,
    shape::{DataCursor, DataStatus, Shape, ShapeCore, shape_builders},
};

const BLOCK_HEADER_SIZE: usize = 4 + 2;

/// A shape rendering all, or an indexed subset of, a point cloud resource.
#[derive(Debug, Default, Clone)]
pub struct PointCloudShape {
    core: ShapeCore,
    mesh_id: u32,
    cloud: Option<Arc<PointCloud>>,
    indices: Vec<u32>,
    point_size: u8,
}

impl PointCloudShape {
    /// New shape over `cloud`, rendering every point.
    #[must_use]
    pub fn new(id: u32, cloud: Arc<PointCloud>) -> Self {
        Self {
            core: ShapeCore::new(id),
            mesh_id: cloud.id(),
            cloud: Some(cloud),
            indices: Vec::new(),
            point_size: 1,
        }
    }

    /// Restrict rendering to the given point indices.
    #[must_use]
    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    /// Set the point render size hint, in pixels.
    #[must_use]
    pub fn with_point_size(mut self, point_size: u8) -> Self {
        self.point_size = point_size;
        self
    }

    /// Backing resource id.
    #[must_use]
    pub fn mesh_id(&self) -> u32 {
        self.mesh_id
    }

    /// Index subset; empty means all points.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Point render size hint.
    #[must_use]
    pub fn point_size(&self) -> u8 {
        self.point_size
    }
}

impl Shape for PointCloudShape {
    fn routing_id(&self) -> u16 {
        RoutingId::PointCloud as u16
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn is_complex(&self) -> bool {
        !self.indices.is_empty()
    }

    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        let core = self.core();
        if core.has_flag(ObjectFlag::REPLACE) && !core.has_flag(ObjectFlag::SKIP_RESOURCES) {
            return Err(WireError::Malformed("replace flag without skip-resources"));
        }
        core.create_message().write(writer)?;
        writer.write_u32(self.mesh_id)?;
        writer.write_u32(self.indices.len() as u32)?;
        writer.write_u8(self.point_size)
    }

    fn write_data(&self, writer: &mut PacketWriter, cursor: &mut DataCursor) -> Result<DataStatus> {
        let offset = cursor.offset as usize;
        if offset >= self.indices.len() {
            return Ok(DataStatus::Done);
        }

        DataMessage { id: self.core.id }.write(writer)?;
        let budget = writer.remaining().saturating_sub(BLOCK_HEADER_SIZE);
        let count = (budget / 4).min(self.indices.len() - offset).min(usize::from(u16::MAX));
        if count == 0 {
            return Err(WireError::BufferFull {
                needed: BLOCK_HEADER_SIZE + 4,
                remaining: budget,
            });
        }
        writer.write_u32(offset as u32)?;
        writer.write_u16(count as u16)?;
        for &index in &self.indices[offset..offset + count] {
            writer.write_u32(index)?;
        }
        cursor.offset += count as u64;

        if cursor.offset as usize >= self.indices.len() {
            Ok(DataStatus::Done)
        } else {
            Ok(DataStatus::More)
        }
    }

    fn read_create(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.core.apply_create(CreateMessage::read(reader)?);
        self.mesh_id = reader.read_u32()?;
        let index_count = reader.read_u32()? as usize;
        self.point_size = reader.read_u8()?;
        self.cloud = None;
        self.indices = vec![0; index_count];
        Ok(())
    }

    fn read_data(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let message = DataMessage::read(reader)?;
        if message.id != self.core.id {
            return Err(WireError::Malformed("data message shape id"));
        }
        let offset = reader.read_u32()? as usize;
        let count = reader.read_u16()? as usize;
        let elements = read_u32_elements(reader, count)?;
        let end = offset + elements.len();
        if self.indices.len() < end {
            self.indices.resize(end, 0);
        }
        self.indices[offset..end].copy_from_slice(&elements);
        Ok(())
    }

    fn resources(&self) -> Vec<Arc<dyn Resource>> {
        match &self.cloud {
            Some(cloud) => {
                let resource: Arc<dyn Resource> = cloud.clone();
                vec![resource]
            }
            None => Vec::new(),
        }
    }
}

shape_builders!(PointCloudShape);

#[cfg(test)]
mod tests {
    use telescene_proto::messages::ShapeMessageId;

    use super::*;

    fn cloud() -> Arc<PointCloud> {
        Arc::new(PointCloud::new(55).with_points(vec![[0.0; 3]; 16]))
    }

    #[test]
    fn unindexed_shape_is_simple() {
        let shape = PointCloudShape::new(1, cloud());
        assert!(!shape.is_complex());
        assert_eq!(shape.resources().len(), 1);
    }

    #[test]
    fn indexed_subset_round_trips() {
        let indices: Vec<u32> = (0..1000).map(|i| i % 16).collect();
        let shape = PointCloudShape::new(2, cloud()).with_indices(indices.clone()).with_point_size(3);
        assert!(shape.is_complex());

        let mut writer = PacketWriter::new(shape.routing_id(), ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        let create = writer.finalise().unwrap();

        let mut back = PointCloudShape::default();
        back.read_create(&mut create.reader().unwrap()).unwrap();
        assert_eq!(back.mesh_id(), 55);
        assert_eq!(back.point_size(), 3);

        let mut cursor = DataCursor::default();
        let mut packets = 0;
        loop {
            let mut writer = PacketWriter::with_limit(
                shape.routing_id(),
                ShapeMessageId::Data as u16,
                256,
            );
            let status = shape.write_data(&mut writer, &mut cursor).unwrap();
            if writer.payload_size() > 0 {
                let packet = writer.finalise().unwrap();
                back.read_data(&mut packet.reader().unwrap()).unwrap();
                packets += 1;
            }
            if status == DataStatus::Done {
                break;
            }
            assert!(packets < 100, "index streaming did not converge");
        }

        assert!(packets > 1, "expected the subset to span packets");
        assert_eq!(back.indices(), indices.as_slice());
    }
}
