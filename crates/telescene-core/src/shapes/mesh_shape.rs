//! Inline mesh shape.
//!
//! Carries its vertex data with the shape rather than through a shared
//! resource: the create packet declares counts and which optional
//! components follow, then data packets stream the components in a fixed
//! order (vertices, indices, normals, colours, UVs), each block bounded by
//! the writer's byte budget.

use telescene_proto::{
    CreateMessage, DataMessage, PacketReader, PacketWriter, Result, WireError,
    messages::RoutingId,
};

use crate::{
    mesh::{DrawType, read_u32_elements, read_uv_elements, read_vector3_elements},
    shape::{DataCursor, DataStatus, Shape, ShapeCore, shape_builders},
};

/// Component selector in a mesh shape data packet.
mod component {
    pub const VERTICES: u16 = 0;
    pub const INDICES: u16 = 1;
    pub const NORMALS: u16 = 2;
    pub const COLOURS: u16 = 3;
    pub const UVS: u16 = 4;
    pub const COUNT: u16 = 5;
}

/// Bits in the create tail naming the optional components that follow.
mod component_bit {
    pub const NORMALS: u16 = 1 << 0;
    pub const COLOURS: u16 = 1 << 1;
    pub const UVS: u16 = 1 << 2;
}

const BLOCK_HEADER_SIZE: usize = 2 + 4 + 2;

/// A mesh whose geometry travels inline with the shape.
#[derive(Debug, Default, Clone)]
pub struct MeshShape {
    core: ShapeCore,
    draw_type: DrawType,
    vertices: Vec<[f32; 3]>,
    indices: Vec<u32>,
    normals: Vec<[f32; 3]>,
    colours: Vec<u32>,
    uvs: Vec<[f32; 2]>,
}

impl MeshShape {
    /// New mesh shape over `vertices`.
    #[must_use]
    pub fn new(id: u32, draw_type: DrawType, vertices: Vec<[f32; 3]>) -> Self {
        Self { core: ShapeCore::new(id), draw_type, vertices, ..Self::default() }
    }

    /// Set the index array.
    #[must_use]
    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    /// Set per-vertex normals.
    #[must_use]
    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = normals;
        self
    }

    /// Set per-vertex colours.
    #[must_use]
    pub fn with_vertex_colours(mut self, colours: Vec<u32>) -> Self {
        self.colours = colours;
        self
    }

    /// Set per-vertex UVs.
    #[must_use]
    pub fn with_uvs(mut self, uvs: Vec<[f32; 2]>) -> Self {
        self.uvs = uvs;
        self
    }

    /// Vertex interpretation.
    #[must_use]
    pub fn draw_type(&self) -> DrawType {
        self.draw_type
    }

    /// Vertex array.
    #[must_use]
    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    /// Index array.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Normal array.
    #[must_use]
    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    /// Colour array.
    #[must_use]
    pub fn colours(&self) -> &[u32] {
        &self.colours
    }

    /// UV array.
    #[must_use]
    pub fn uvs(&self) -> &[[f32; 2]] {
        &self.uvs
    }

    fn component_len(&self, component: u16) -> usize {
        match component {
            component::INDICES => self.indices.len(),
            component::NORMALS => self.normals.len(),
            component::COLOURS => self.colours.len(),
            component::UVS => self.uvs.len(),
            _ => self.vertices.len(),
        }
    }

    fn element_size(component: u16) -> usize {
        match component {
            component::INDICES | component::COLOURS => 4,
            component::UVS => 8,
            _ => 12,
        }
    }

    fn write_block(
        &self,
        writer: &mut PacketWriter,
        component: u16,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        writer.write_u16(component)?;
        writer.write_u32(offset as u32)?;
        writer.write_u16(count as u16)?;
        match component {
            component::INDICES => {
                for &v in &self.indices[offset..offset + count] {
                    writer.write_u32(v)?;
                }
            }
            component::COLOURS => {
                for &v in &self.colours[offset..offset + count] {
                    writer.write_u32(v)?;
                }
            }
            component::UVS => {
                for uv in &self.uvs[offset..offset + count] {
                    writer.write_f32(uv[0])?;
                    writer.write_f32(uv[1])?;
                }
            }
            component::NORMALS => {
                for n in &self.normals[offset..offset + count] {
                    writer.write_f32(n[0])?;
                    writer.write_f32(n[1])?;
                    writer.write_f32(n[2])?;
                }
            }
            _ => {
                for v in &self.vertices[offset..offset + count] {
                    writer.write_f32(v[0])?;
                    writer.write_f32(v[1])?;
                    writer.write_f32(v[2])?;
                }
            }
        }
        Ok(())
    }
}

impl Shape for MeshShape {
    fn routing_id(&self) -> u16 {
        RoutingId::MeshShape as u16
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn is_complex(&self) -> bool {
        !self.vertices.is_empty()
    }

    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.core.create_message().write(writer)?;
        let mut components = 0u16;
        if !self.normals.is_empty() {
            components |= component_bit::NORMALS;
        }
        if !self.colours.is_empty() {
            components |= component_bit::COLOURS;
        }
        if !self.uvs.is_empty() {
            components |= component_bit::UVS;
        }
        writer.write_u8(self.draw_type as u8)?;
        writer.write_u8(0)?;
        writer.write_u32(self.vertices.len() as u32)?;
        writer.write_u32(self.indices.len() as u32)?;
        writer.write_u16(components)?;
        Ok(())
    }

    fn write_data(&self, writer: &mut PacketWriter, cursor: &mut DataCursor) -> Result<DataStatus> {
        // Skip exhausted or absent components.
        while cursor.phase < component::COUNT
            && cursor.offset as usize >= self.component_len(cursor.phase)
        {
            cursor.phase += 1;
            cursor.offset = 0;
        }
        if cursor.phase >= component::COUNT {
            return Ok(DataStatus::Done);
        }

        DataMessage { id: self.core.id }.write(writer)?;

        let current = cursor.phase;
        let offset = cursor.offset as usize;
        let total = self.component_len(current);
        let element_size = Self::element_size(current);
        let budget = writer.remaining().saturating_sub(BLOCK_HEADER_SIZE);
        let count = (budget / element_size).min(total - offset).min(usize::from(u16::MAX));
        if count == 0 {
            return Err(WireError::BufferFull {
                needed: BLOCK_HEADER_SIZE + element_size,
                remaining: budget,
            });
        }

        self.write_block(writer, current, offset, count)?;
        cursor.offset += count as u64;

        // Peek whether anything remains after this block.
        let mut probe = *cursor;
        while probe.phase < component::COUNT
            && probe.offset as usize >= self.component_len(probe.phase)
        {
            probe.phase += 1;
            probe.offset = 0;
        }
        if probe.phase >= component::COUNT {
            Ok(DataStatus::Done)
        } else {
            Ok(DataStatus::More)
        }
    }

    fn read_create(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.core.apply_create(CreateMessage::read(reader)?);
        let draw_raw = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        self.draw_type = DrawType::from_u8(draw_raw).ok_or(WireError::Malformed("draw type"))?;
        let vertex_count = reader.read_u32()? as usize;
        let index_count = reader.read_u32()? as usize;
        let _components = reader.read_u16()?;
        self.vertices = vec![[0.0; 3]; vertex_count];
        self.indices = vec![0; index_count];
        self.normals.clear();
        self.colours.clear();
        self.uvs.clear();
        Ok(())
    }

    fn read_data(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let message = DataMessage::read(reader)?;
        if message.id != self.core.id {
            return Err(WireError::Malformed("data message shape id"));
        }
        let component = reader.read_u16()?;
        let offset = reader.read_u32()? as usize;
        let count = reader.read_u16()? as usize;

        fn store<T: Copy + Default>(
            target: &mut Vec<T>,
            offset: usize,
            elements: Vec<T>,
        ) -> Result<()> {
            let end = offset + elements.len();
            if end > u32::MAX as usize {
                return Err(WireError::Malformed("component block range"));
            }
            if target.len() < end {
                target.resize(end, T::default());
            }
            target[offset..end].copy_from_slice(&elements);
            Ok(())
        }

        match component {
            component::VERTICES => {
                store(&mut self.vertices, offset, read_vector3_elements(reader, count)?)
            }
            component::INDICES => {
                store(&mut self.indices, offset, read_u32_elements(reader, count)?)
            }
            component::NORMALS => {
                store(&mut self.normals, offset, read_vector3_elements(reader, count)?)
            }
            component::COLOURS => {
                store(&mut self.colours, offset, read_u32_elements(reader, count)?)
            }
            component::UVS => store(&mut self.uvs, offset, read_uv_elements(reader, count)?),
            _ => Err(WireError::Malformed("mesh shape component")),
        }
    }
}

shape_builders!(MeshShape);

#[cfg(test)]
mod tests {
    use telescene_proto::messages::ShapeMessageId;

    use super::*;

    fn stream_shape(shape: &MeshShape, byte_limit: usize) -> (MeshShape, usize) {
        let mut writer = PacketWriter::new(shape.routing_id(), ShapeMessageId::Create as u16);
        shape.write_create(&mut writer).unwrap();
        let create = writer.finalise().unwrap();

        let mut back = MeshShape::default();
        back.read_create(&mut create.reader().unwrap()).unwrap();

        let mut cursor = DataCursor::default();
        let mut data_packets = 0;
        if shape.is_complex() {
            loop {
                let mut writer = PacketWriter::with_limit(
                    shape.routing_id(),
                    ShapeMessageId::Data as u16,
                    byte_limit,
                );
                let status = shape.write_data(&mut writer, &mut cursor).unwrap();
                if writer.payload_size() > 0 {
                    let packet = writer.finalise().unwrap();
                    back.read_data(&mut packet.reader().unwrap()).unwrap();
                    data_packets += 1;
                }
                if status == DataStatus::Done {
                    break;
                }
                assert!(data_packets < 1000, "data streaming did not converge");
            }
        }
        (back, data_packets)
    }

    #[test]
    fn large_mesh_streams_in_bounded_packets() {
        let vertices: Vec<[f32; 3]> =
            (0..20_000).map(|i| [i as f32, (i * 2) as f32, (i * 3) as f32]).collect();
        let indices: Vec<u32> = (0..60_000).map(|i| (i % 20_000) as u32).collect();
        let shape = MeshShape::new(77, DrawType::Triangles, vertices.clone())
            .with_indices(indices.clone());

        let (back, data_packets) = stream_shape(&shape, 1024);

        // 240 KiB of vertices plus 240 KiB of indices at ~1 KiB per packet.
        assert!(data_packets >= 80, "expected >= 80 data packets, got {data_packets}");
        assert_eq!(back.vertices(), vertices.as_slice());
        assert_eq!(back.indices(), indices.as_slice());
    }

    #[test]
    fn optional_components_round_trip() {
        let shape = MeshShape::new(5, DrawType::Triangles, vec![[0.0, 0.0, 0.0]; 7])
            .with_indices(vec![0, 1, 2, 3, 4, 5, 6])
            .with_normals(vec![[0.0, 0.0, 1.0]; 7])
            .with_vertex_colours(vec![0xAABBCCDD; 7])
            .with_uvs(vec![[0.5, 0.5]; 7]);

        let (back, _) = stream_shape(&shape, 4096);
        assert_eq!(back.vertices(), shape.vertices());
        assert_eq!(back.indices(), shape.indices());
        assert_eq!(back.normals(), shape.normals());
        assert_eq!(back.colours(), shape.colours());
        assert_eq!(back.uvs(), shape.uvs());
        assert_eq!(back.draw_type(), shape.draw_type());
    }

    #[test]
    fn empty_mesh_is_simple() {
        let shape = MeshShape::new(1, DrawType::Points, Vec::new());
        assert!(!shape.is_complex());
    }

    #[test]
    fn data_for_wrong_id_is_rejected() {
        let shape = MeshShape::new(2, DrawType::Points, vec![[0.0; 3]]);
        let mut cursor = DataCursor::default();
        let mut writer =
            PacketWriter::new(shape.routing_id(), ShapeMessageId::Data as u16);
        shape.write_data(&mut writer, &mut cursor).unwrap();
        let packet = writer.finalise().unwrap();

        let mut other = MeshShape::new(3, DrawType::Points, Vec::new());
        assert!(other.read_data(&mut packet.reader().unwrap()).is_err());
    }
}
