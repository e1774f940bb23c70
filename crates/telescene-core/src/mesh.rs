//! Mesh and point-cloud resources and their wire messages.
//!
//! Mesh resources travel on [`RoutingId::Mesh`]: a create message with
//! counts and a transform, component blocks (vertices, indices, normals,
//! colours, UVs) each carrying an offset and element count, and a finalise
//! message once every component has been sent. A point cloud is a mesh
//! with the points draw type and no indices.

use telescene_proto::{
    Attributes, PacketReader, PacketWriter, Result, WireError,
    messages::{MeshMessageId, RoutingId},
};

use crate::resource::{Resource, TransferProgress};

/// How mesh vertices are interpreted for drawing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrawType {
    /// Unconnected points.
    Points = 0,
    /// Line pairs.
    Lines = 1,
    /// Triangle triples.
    #[default]
    Triangles = 2,
    /// Cubic voxels centred on each vertex.
    Voxels = 3,
}

impl DrawType {
    /// Map a wire value onto a draw type.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Points,
            1 => Self::Lines,
            2 => Self::Triangles,
            3 => Self::Voxels,
            _ => return None,
        })
    }
}

/// Flags carried on a mesh create message.
pub struct MeshCreateFlag;

impl MeshCreateFlag {
    /// The transform attributes are double precision.
    pub const DOUBLE_PRECISION: u16 = 1 << 0;
}

/// Defines a mesh resource: identity, counts, draw type and placement.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeshCreateMessage {
    /// Mesh resource id.
    pub mesh_id: u32,
    /// Total vertex count.
    pub vertex_count: u32,
    /// Total index count; zero for unindexed meshes.
    pub index_count: u32,
    /// [`MeshCreateFlag`] bits.
    pub flags: u16,
    /// Vertex interpretation.
    pub draw_type: DrawType,
    /// Mesh transform and tint.
    pub attributes: Attributes,
}

impl MeshCreateMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Short payloads and unknown draw types fail.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        let mesh_id = reader.read_u32()?;
        let vertex_count = reader.read_u32()?;
        let index_count = reader.read_u32()?;
        let flags = reader.read_u16()?;
        let draw_raw = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let draw_type = DrawType::from_u8(draw_raw).ok_or(WireError::Malformed("draw type"))?;
        let attributes =
            Attributes::read(reader, flags & MeshCreateFlag::DOUBLE_PRECISION != 0)?;
        Ok(Self { mesh_id, vertex_count, index_count, flags, draw_type, attributes })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// [`WireError::PrecisionMismatch`] when the precision flag disagrees
    /// with the attribute variant; otherwise capacity errors only.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        if (self.flags & MeshCreateFlag::DOUBLE_PRECISION != 0) != self.attributes.is_double() {
            return Err(WireError::PrecisionMismatch);
        }
        writer.write_u32(self.mesh_id)?;
        writer.write_u32(self.vertex_count)?;
        writer.write_u32(self.index_count)?;
        writer.write_u16(self.flags)?;
        writer.write_u8(self.draw_type as u8)?;
        writer.write_u8(0)?;
        self.attributes.write(writer)
    }
}

/// Header of one mesh component block; elements follow in the payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MeshComponentMessage {
    /// Mesh resource id.
    pub mesh_id: u32,
    /// Element offset of this block within the component.
    pub offset: u32,
    /// Element count in this block.
    pub count: u16,
}

impl MeshComponentMessage {
    /// Encoded header size, before the elements.
    pub const HEADER_SIZE: usize = 4 + 4 + 2;

    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            mesh_id: reader.read_u32()?,
            offset: reader.read_u32()?,
            count: reader.read_u16()?,
        })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.mesh_id)?;
        writer.write_u32(self.offset)?;
        writer.write_u16(self.count)
    }
}

/// All components sent; the mesh may be realised by the client.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MeshFinaliseMessage {
    /// Mesh resource id.
    pub mesh_id: u32,
    /// Reserved flag bits.
    pub flags: u16,
}

impl MeshFinaliseMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { mesh_id: reader.read_u32()?, flags: reader.read_u16()? })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.mesh_id)?;
        writer.write_u16(self.flags)
    }
}

/// Release a mesh resource by id.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MeshDestroyMessage {
    /// Mesh resource id.
    pub mesh_id: u32,
}

impl MeshDestroyMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { mesh_id: reader.read_u32()? })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.mesh_id)
    }
}

/// Read `count` vertex-like elements (three f32 each).
///
/// # Errors
///
/// Fails on a short payload.
pub fn read_vector3_elements(
    reader: &mut PacketReader<'_>,
    count: usize,
) -> Result<Vec<[f32; 3]>> {
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        elements.push([reader.read_f32()?, reader.read_f32()?, reader.read_f32()?]);
    }
    Ok(elements)
}

/// Read `count` u32 elements (indices or packed colours).
///
/// # Errors
///
/// Fails on a short payload.
pub fn read_u32_elements(reader: &mut PacketReader<'_>, count: usize) -> Result<Vec<u32>> {
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        elements.push(reader.read_u32()?);
    }
    Ok(elements)
}

/// Read `count` UV elements (two f32 each).
///
/// # Errors
///
/// Fails on a short payload.
pub fn read_uv_elements(reader: &mut PacketReader<'_>, count: usize) -> Result<Vec<[f32; 2]>> {
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        elements.push([reader.read_f32()?, reader.read_f32()?]);
    }
    Ok(elements)
}

/// Transfer phases, in wire order.
mod phase {
    pub const VERTICES: i32 = 0;
    pub const INDICES: i32 = 1;
    pub const NORMALS: i32 = 2;
    pub const COLOURS: i32 = 3;
    pub const UVS: i32 = 4;
    pub const FINALISE: i32 = 5;
}

/// A mesh resource held in memory and streamed on demand.
#[derive(Debug, Default, Clone)]
pub struct SimpleMesh {
    id: u32,
    draw_type: DrawType,
    transform: Attributes,
    vertices: Vec<[f32; 3]>,
    indices: Vec<u32>,
    normals: Vec<[f32; 3]>,
    colours: Vec<u32>,
    uvs: Vec<[f32; 2]>,
}

impl SimpleMesh {
    /// New empty mesh with the given resource id.
    #[must_use]
    pub fn new(id: u32, draw_type: DrawType) -> Self {
        Self { id, draw_type, ..Self::default() }
    }

    /// Set the vertex array.
    #[must_use]
    pub fn with_vertices(mut self, vertices: Vec<[f32; 3]>) -> Self {
        self.vertices = vertices;
        self
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
    pub fn with_colours(mut self, colours: Vec<u32>) -> Self {
        self.colours = colours;
        self
    }

    /// Set per-vertex UVs.
    #[must_use]
    pub fn with_uvs(mut self, uvs: Vec<[f32; 2]>) -> Self {
        self.uvs = uvs;
        self
    }

    /// Set the mesh transform and tint.
    #[must_use]
    pub fn with_transform(mut self, transform: Attributes) -> Self {
        self.transform = transform;
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

    fn phase_len(&self, phase: i32) -> usize {
        match phase {
            phase::VERTICES => self.vertices.len(),
            phase::INDICES => self.indices.len(),
            phase::NORMALS => self.normals.len(),
            phase::COLOURS => self.colours.len(),
            phase::UVS => self.uvs.len(),
            _ => 0,
        }
    }

    fn phase_message(phase: i32) -> MeshMessageId {
        match phase {
            phase::INDICES => MeshMessageId::Index,
            phase::NORMALS => MeshMessageId::Normal,
            phase::COLOURS => MeshMessageId::VertexColour,
            phase::UVS => MeshMessageId::Uv,
            _ => MeshMessageId::Vertex,
        }
    }

    fn element_size(phase: i32) -> usize {
        match phase {
            phase::INDICES | phase::COLOURS => 4,
            phase::UVS => 8,
            _ => 12,
        }
    }

    fn write_elements(
        &self,
        writer: &mut PacketWriter,
        phase: i32,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        match phase {
            phase::INDICES => {
                for &v in &self.indices[offset..offset + count] {
                    writer.write_u32(v)?;
                }
            }
            phase::COLOURS => {
                for &v in &self.colours[offset..offset + count] {
                    writer.write_u32(v)?;
                }
            }
            phase::UVS => {
                for uv in &self.uvs[offset..offset + count] {
                    writer.write_f32(uv[0])?;
                    writer.write_f32(uv[1])?;
                }
            }
            phase::NORMALS => {
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

impl Resource for SimpleMesh {
    fn type_id(&self) -> u16 {
        RoutingId::Mesh as u16
    }

    fn id(&self) -> u32 {
        self.id
    }

    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.reset(RoutingId::Mesh as u16, MeshMessageId::Create as u16);
        let flags = if self.transform.is_double() { MeshCreateFlag::DOUBLE_PRECISION } else { 0 };
        MeshCreateMessage {
            mesh_id: self.id,
            vertex_count: self.vertices.len() as u32,
            index_count: self.indices.len() as u32,
            flags,
            draw_type: self.draw_type,
            attributes: self.transform,
        }
        .write(writer)
    }

    fn transfer(
        &self,
        writer: &mut PacketWriter,
        byte_limit: usize,
        progress: &mut TransferProgress,
    ) -> Result<()> {
        // Skip exhausted or absent components.
        let mut current = progress.phase;
        while current < phase::FINALISE && progress.progress as usize >= self.phase_len(current) {
            current += 1;
            progress.progress = 0;
        }
        progress.phase = current;

        if current == phase::FINALISE {
            writer.reset(RoutingId::Mesh as u16, MeshMessageId::Finalise as u16);
            MeshFinaliseMessage { mesh_id: self.id, flags: 0 }.write(writer)?;
            progress.complete = true;
            return Ok(());
        }

        writer.reset(RoutingId::Mesh as u16, Self::phase_message(current) as u16);

        let offset = progress.progress as usize;
        let total = self.phase_len(current);
        let element_size = Self::element_size(current);
        let budget = byte_limit
            .min(writer.remaining())
            .saturating_sub(MeshComponentMessage::HEADER_SIZE);
        let count = (budget / element_size).min(total - offset).min(usize::from(u16::MAX));
        if count == 0 {
            return Err(WireError::BufferFull {
                needed: MeshComponentMessage::HEADER_SIZE + element_size,
                remaining: budget,
            });
        }

        MeshComponentMessage { mesh_id: self.id, offset: offset as u32, count: count as u16 }
            .write(writer)?;
        self.write_elements(writer, current, offset, count)?;
        progress.progress += count as i64;
        Ok(())
    }

    fn write_destroy(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.reset(RoutingId::Mesh as u16, MeshMessageId::Destroy as u16);
        MeshDestroyMessage { mesh_id: self.id }.write(writer)
    }
}

/// A point-cloud resource: points with optional normals and colours.
///
/// Encodes through the mesh message set with the points draw type, so the
/// receiving side needs no extra machinery.
#[derive(Debug, Default, Clone)]
pub struct PointCloud {
    mesh: SimpleMesh,
}

impl PointCloud {
    /// New empty cloud with the given resource id.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self { mesh: SimpleMesh::new(id, DrawType::Points) }
    }

    /// Set the point array.
    #[must_use]
    pub fn with_points(mut self, points: Vec<[f32; 3]>) -> Self {
        self.mesh.vertices = points;
        self
    }

    /// Set per-point normals.
    #[must_use]
    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.mesh.normals = normals;
        self
    }

    /// Set per-point colours.
    #[must_use]
    pub fn with_colours(mut self, colours: Vec<u32>) -> Self {
        self.mesh.colours = colours;
        self
    }

    /// Point array.
    #[must_use]
    pub fn points(&self) -> &[[f32; 3]] {
        self.mesh.vertices()
    }

    /// Normal array.
    #[must_use]
    pub fn normals(&self) -> &[[f32; 3]] {
        self.mesh.normals()
    }

    /// Colour array.
    #[must_use]
    pub fn colours(&self) -> &[u32] {
        self.mesh.colours()
    }
}

impl Resource for PointCloud {
    fn type_id(&self) -> u16 {
        self.mesh.type_id()
    }

    fn id(&self) -> u32 {
        self.mesh.id()
    }

    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.mesh.write_create(writer)
    }

    fn transfer(
        &self,
        writer: &mut PacketWriter,
        byte_limit: usize,
        progress: &mut TransferProgress,
    ) -> Result<()> {
        self.mesh.transfer(writer, byte_limit, progress)
    }

    fn write_destroy(&self, writer: &mut PacketWriter) -> Result<()> {
        self.mesh.write_destroy(writer)
    }
}
