//! Mesh resource assembler.
//!
//! Rebuilds mesh and point-cloud resources from the chunked transfer
//! stream on the mesh routing id: create declares counts, component
//! blocks land at their offsets, finalise marks the resource usable.
//! Snapshots re-serialise the cached meshes through the same resource
//! packer the server uses, so a recorded keyframe replays identically.

use std::{any::Any, collections::HashMap};

use telescene_core::{
    ResourcePacker, SimpleMesh,
    mesh::{
        MeshComponentMessage, MeshCreateMessage, MeshDestroyMessage, MeshFinaliseMessage,
        read_u32_elements, read_uv_elements, read_vector3_elements,
    },
};
use telescene_proto::{
    Packet, PacketReader, PacketWriter,
    messages::{MeshMessageId, RoutingId},
};

use crate::{error::ClientError, handler::MessageHandler};

/// A mesh being assembled from the stream.
#[derive(Debug, Default, Clone)]
pub struct PartialMesh {
    /// The creation record: counts, draw type, transform.
    pub create: MeshCreateMessage,
    /// Assembled vertices.
    pub vertices: Vec<[f32; 3]>,
    /// Assembled indices.
    pub indices: Vec<u32>,
    /// Assembled normals.
    pub normals: Vec<[f32; 3]>,
    /// Assembled per-vertex colours.
    pub colours: Vec<u32>,
    /// Assembled UVs.
    pub uvs: Vec<[f32; 2]>,
    /// All components received.
    pub finalised: bool,
}

impl PartialMesh {
    /// Rebuild the equivalent sendable resource.
    #[must_use]
    pub fn to_mesh(&self) -> SimpleMesh {
        SimpleMesh::new(self.create.mesh_id, self.create.draw_type)
            .with_transform(self.create.attributes)
            .with_vertices(self.vertices.clone())
            .with_indices(self.indices.clone())
            .with_normals(self.normals.clone())
            .with_colours(self.colours.clone())
            .with_uvs(self.uvs.clone())
    }
}

fn store<T: Copy + Default>(target: &mut Vec<T>, offset: usize, elements: Vec<T>) {
    let end = offset + elements.len();
    if target.len() < end {
        target.resize(end, T::default());
    }
    target[offset..end].copy_from_slice(&elements);
}

/// Assembles mesh resources arriving on [`RoutingId::Mesh`].
#[derive(Default)]
pub struct MeshCacheHandler {
    meshes: HashMap<u32, PartialMesh>,
    warnings: u64,
}

impl MeshCacheHandler {
    /// New empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached mesh by resource id.
    #[must_use]
    pub fn mesh(&self, id: u32) -> Option<&PartialMesh> {
        self.meshes.get(&id)
    }

    /// Number of cached meshes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Count of messages discarded.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    fn mesh_mut(&mut self, id: u32) -> Result<&mut PartialMesh, ClientError> {
        self.meshes.get_mut(&id).ok_or(ClientError::UnknownShape {
            routing_id: RoutingId::Mesh as u16,
            id,
        })
    }

    fn handle_component(
        &mut self,
        message_id: MeshMessageId,
        reader: &mut PacketReader<'_>,
    ) -> Result<(), ClientError> {
        let header = MeshComponentMessage::read(reader)?;
        let offset = header.offset as usize;
        let count = header.count as usize;
        let mesh = self.mesh_mut(header.mesh_id)?;
        match message_id {
            MeshMessageId::Vertex => {
                store(&mut mesh.vertices, offset, read_vector3_elements(reader, count)?);
            }
            MeshMessageId::Index => {
                store(&mut mesh.indices, offset, read_u32_elements(reader, count)?);
            }
            MeshMessageId::Normal => {
                store(&mut mesh.normals, offset, read_vector3_elements(reader, count)?);
            }
            MeshMessageId::VertexColour => {
                store(&mut mesh.colours, offset, read_u32_elements(reader, count)?);
            }
            MeshMessageId::Uv => {
                store(&mut mesh.uvs, offset, read_uv_elements(reader, count)?);
            }
            _ => {
                return Err(ClientError::UnknownMessage {
                    routing_id: RoutingId::Mesh as u16,
                    message_id: message_id as u16,
                });
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        let Some(message_id) = MeshMessageId::from_u16(reader.message_id()) else {
            return Err(ClientError::UnknownMessage {
                routing_id: RoutingId::Mesh as u16,
                message_id: reader.message_id(),
            });
        };
        match message_id {
            MeshMessageId::Create | MeshMessageId::Redefine => {
                let create = MeshCreateMessage::read(reader)?;
                let mesh = PartialMesh {
                    vertices: vec![[0.0; 3]; create.vertex_count as usize],
                    indices: vec![0; create.index_count as usize],
                    create,
                    ..PartialMesh::default()
                };
                self.meshes.insert(mesh.create.mesh_id, mesh);
                Ok(())
            }
            MeshMessageId::Finalise => {
                let message = MeshFinaliseMessage::read(reader)?;
                self.mesh_mut(message.mesh_id)?.finalised = true;
                Ok(())
            }
            MeshMessageId::Destroy => {
                let message = MeshDestroyMessage::read(reader)?;
                if self.meshes.remove(&message.mesh_id).is_none() {
                    return Err(ClientError::UnknownShape {
                        routing_id: RoutingId::Mesh as u16,
                        id: message.mesh_id,
                    });
                }
                Ok(())
            }
            MeshMessageId::Vertex
            | MeshMessageId::Index
            | MeshMessageId::Normal
            | MeshMessageId::VertexColour
            | MeshMessageId::Uv => self.handle_component(message_id, reader),
            MeshMessageId::Invalid | MeshMessageId::SetMaterial => {
                Err(ClientError::UnknownMessage {
                    routing_id: RoutingId::Mesh as u16,
                    message_id: message_id as u16,
                })
            }
        }
    }
}

impl MessageHandler for MeshCacheHandler {
    fn routing_id(&self) -> u16 {
        RoutingId::Mesh as u16
    }

    fn name(&self) -> &'static str {
        "mesh"
    }

    fn reset(&mut self) {
        self.meshes.clear();
    }

    fn handle(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        if let Err(e) = self.dispatch(reader) {
            self.warnings += 1;
            tracing::warn!(handler = "mesh", "{e}");
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Packet> {
        let mut out = Vec::new();
        let mut packer = ResourcePacker::new();
        for mesh in self.meshes.values() {
            if !mesh.finalised {
                continue;
            }
            packer.assign(std::sync::Arc::new(mesh.to_mesh()));
            while packer.is_active() {
                let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
                match packer.next_packet(&mut writer, 0xE000) {
                    Ok(true) => match writer.finalise() {
                        Ok(packet) => out.push(packet),
                        Err(_) => break,
                    },
                    _ => break,
                }
            }
            packer.take_last_completed();
        }
        out
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use telescene_core::{DrawType, Resource, TransferProgress};

    use super::*;

    fn stream_resource(handler: &mut MeshCacheHandler, mesh: &SimpleMesh) {
        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
        mesh.write_create(&mut writer).unwrap();
        handler.handle(&mut writer.finalise().unwrap().reader().unwrap()).unwrap();

        let mut progress = TransferProgress::default();
        while !progress.complete {
            let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
            mesh.transfer(&mut writer, 1024, &mut progress).unwrap();
            handler.handle(&mut writer.finalise().unwrap().reader().unwrap()).unwrap();
        }
    }

    fn sample_mesh() -> SimpleMesh {
        SimpleMesh::new(9, DrawType::Triangles)
            .with_vertices((0..500).map(|i| [i as f32, 1.0, 2.0]).collect())
            .with_indices((0..1500).map(|i| i % 500).collect())
            .with_normals(vec![[0.0, 0.0, 1.0]; 500])
    }

    #[test]
    fn chunked_transfer_reassembles() {
        let mesh = sample_mesh();
        let mut handler = MeshCacheHandler::new();
        stream_resource(&mut handler, &mesh);

        let cached = handler.mesh(9).unwrap();
        assert!(cached.finalised);
        assert_eq!(cached.vertices, mesh.vertices());
        assert_eq!(cached.indices, mesh.indices());
        assert_eq!(cached.normals, mesh.normals());
        assert_eq!(cached.create.draw_type, DrawType::Triangles);
    }

    #[test]
    fn destroy_removes_the_mesh() {
        let mut handler = MeshCacheHandler::new();
        stream_resource(&mut handler, &sample_mesh());

        let mut writer =
            PacketWriter::new(RoutingId::Mesh as u16, MeshMessageId::Destroy as u16);
        MeshDestroyMessage { mesh_id: 9 }.write(&mut writer).unwrap();
        handler.handle(&mut writer.finalise().unwrap().reader().unwrap()).unwrap();
        assert!(handler.mesh(9).is_none());
    }

    #[test]
    fn component_for_unknown_mesh_is_discarded() {
        let mut handler = MeshCacheHandler::new();
        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, MeshMessageId::Vertex as u16);
        MeshComponentMessage { mesh_id: 404, offset: 0, count: 1 }.write(&mut writer).unwrap();
        writer.write_f32(0.0).unwrap();
        writer.write_f32(0.0).unwrap();
        writer.write_f32(0.0).unwrap();
        handler.handle(&mut writer.finalise().unwrap().reader().unwrap()).unwrap();
        assert_eq!(handler.warnings(), 1);
        assert!(handler.is_empty());
    }

    #[test]
    fn snapshot_replays_into_an_equal_cache() {
        let mesh = sample_mesh();
        let mut handler = MeshCacheHandler::new();
        stream_resource(&mut handler, &mesh);

        let packets = handler.snapshot();
        let mut replay = MeshCacheHandler::new();
        for packet in &packets {
            replay.handle(&mut packet.reader().unwrap()).unwrap();
        }
        let a = handler.mesh(9).unwrap();
        let b = replay.mesh(9).unwrap();
        assert_eq!(a.vertices, b.vertices);
        assert_eq!(a.indices, b.indices);
        assert_eq!(a.normals, b.normals);
        assert!(b.finalised);
    }

    #[test]
    fn to_mesh_round_trips_through_resource() {
        let mesh = sample_mesh();
        let mut handler = MeshCacheHandler::new();
        stream_resource(&mut handler, &mesh);
        let rebuilt = handler.mesh(9).unwrap().to_mesh();
        assert_eq!(rebuilt.vertices(), mesh.vertices());
        assert_eq!(Arc::new(rebuilt).key(), mesh.key());
    }
}
