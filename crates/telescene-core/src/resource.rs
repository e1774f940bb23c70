//! Shared resources and the chunked transfer driver.
//!
//! A resource is shared data (a mesh, a point cloud) referenced by one or
//! more shapes. Resources travel as a create packet, a stream of
//! byte-budgeted data packets, and a destroy packet; connections reference
//! count them so each client receives every resource exactly once per
//! generation.

use std::sync::Arc;

use telescene_proto::{PacketWriter, Result};

/// Unique identity of a resource: type id in the high word, instance id in
/// the low.
pub type ResourceKey = u64;

/// Build a [`ResourceKey`] from a resource type id and instance id.
#[must_use]
pub fn resource_key(type_id: u16, id: u32) -> ResourceKey {
    (u64::from(type_id) << 32) | u64::from(id)
}

/// Progress of one in-flight resource transfer.
///
/// `progress` and `phase` are owned by the resource being transferred:
/// kinds advance by bytes, elements or subcomponents as suits them. The
/// packer only inspects `complete` and `failed`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Monotonic progress within the current phase.
    pub progress: i64,
    /// Phase value; meaning owned by the resource.
    pub phase: i32,
    /// All data transferred.
    pub complete: bool,
    /// Transfer failed; no further packets.
    pub failed: bool,
}

impl TransferProgress {
    /// Back to zero, incomplete, not failed.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Shared data referenced by shapes and streamed in chunks.
///
/// Implementations must not mutate transferred data while any connection
/// may still be streaming it; changes require destroy and re-create.
pub trait Resource: Send + Sync {
    /// Resource type id, usually a routing id.
    fn type_id(&self) -> u16;

    /// Instance id, unique within the type.
    fn id(&self) -> u32;

    /// Unique key combining type and instance.
    fn key(&self) -> ResourceKey {
        resource_key(self.type_id(), self.id())
    }

    /// Write the create packet: kind, essential attributes and counts.
    ///
    /// # Errors
    ///
    /// Capacity and encoding failures.
    fn write_create(&self, writer: &mut PacketWriter) -> Result<()>;

    /// Write the next data packet, bounded by `byte_limit`, advancing
    /// `progress`. Sets `progress.complete` with the final packet.
    ///
    /// # Errors
    ///
    /// Capacity and encoding failures; the packer treats an error as a
    /// failed transfer.
    fn transfer(
        &self,
        writer: &mut PacketWriter,
        byte_limit: usize,
        progress: &mut TransferProgress,
    ) -> Result<()>;

    /// Write the destroy packet releasing this resource.
    ///
    /// # Errors
    ///
    /// Capacity failures only.
    fn write_destroy(&self, writer: &mut PacketWriter) -> Result<()>;
}

/// Drives one resource at a time into wire packets.
///
/// Owned by a connection. [`ResourcePacker::assign`] starts a resource;
/// each [`ResourcePacker::next_packet`] call fills one packet (the create
/// packet first, then data packets) until the resource reports complete,
/// at which point the key is published through
/// [`ResourcePacker::take_last_completed`].
#[derive(Default)]
pub struct ResourcePacker {
    resource: Option<Arc<dyn Resource>>,
    progress: TransferProgress,
    started: bool,
    last_completed: Option<ResourceKey>,
    failed: bool,
}

impl ResourcePacker {
    /// New idle packer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a resource is mid-transfer.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.resource.is_some()
    }

    /// The resource currently assigned, if any.
    #[must_use]
    pub fn resource(&self) -> Option<&Arc<dyn Resource>> {
        self.resource.as_ref()
    }

    /// True when the previous transfer ended in failure.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Begin transferring `resource`, cancelling any transfer in flight.
    ///
    /// Cancellation emits nothing; the client may hold a partial resource
    /// until a later destroy or re-send makes its state consistent.
    pub fn assign(&mut self, resource: Arc<dyn Resource>) {
        self.cancel();
        self.resource = Some(resource);
    }

    /// Drop the current resource and reset progress.
    ///
    /// The last completed key is left untouched.
    pub fn cancel(&mut self) {
        self.resource = None;
        self.progress.reset();
        self.started = false;
    }

    /// Key of the most recently completed resource, consumed on read.
    pub fn take_last_completed(&mut self) -> Option<ResourceKey> {
        self.last_completed.take()
    }

    /// Fill `writer` with the next packet for the current resource.
    ///
    /// Returns `false` when no resource is assigned. The first call after
    /// [`ResourcePacker::assign`] writes the create packet; later calls
    /// write data packets bounded by `byte_limit`.
    ///
    /// # Errors
    ///
    /// A failing resource clears the packer, marks it
    /// [`ResourcePacker::failed`] and propagates the error.
    pub fn next_packet(&mut self, writer: &mut PacketWriter, byte_limit: usize) -> Result<bool> {
        let Some(resource) = self.resource.clone() else {
            return Ok(false);
        };

        self.failed = false;
        if !self.started {
            if let Err(e) = resource.write_create(writer) {
                self.fail();
                return Err(e);
            }
            self.started = true;
            return Ok(true);
        }

        if let Err(e) = resource.transfer(writer, byte_limit, &mut self.progress) {
            self.fail();
            return Err(e);
        }

        if self.progress.complete {
            self.last_completed = Some(resource.key());
            self.cancel();
        }
        Ok(true)
    }

    fn fail(&mut self) {
        if let Some(resource) = &self.resource {
            tracing::debug!(key = resource.key(), "resource transfer failed");
        }
        self.cancel();
        self.failed = true;
    }
}

#[cfg(test)]
mod tests {
    use telescene_proto::messages::RoutingId;

    use super::*;
    use crate::mesh::{DrawType, SimpleMesh};

    fn test_mesh(id: u32, vertex_count: usize) -> Arc<SimpleMesh> {
        let vertices: Vec<[f32; 3]> =
            (0..vertex_count).map(|i| [i as f32, 0.0, 0.0]).collect();
        Arc::new(SimpleMesh::new(id, DrawType::Points).with_vertices(vertices))
    }

    #[test]
    fn key_packs_type_and_id() {
        let key = resource_key(RoutingId::Mesh as u16, 0xABCD);
        assert_eq!(key >> 32, u64::from(RoutingId::Mesh as u16));
        assert_eq!(key & 0xFFFF_FFFF, 0xABCD);
    }

    #[test]
    fn packer_emits_create_then_data_then_completes() {
        let mesh = test_mesh(9, 4);
        let mut packer = ResourcePacker::new();
        packer.assign(mesh.clone());

        // Create packet first.
        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
        assert!(packer.next_packet(&mut writer, 1024).unwrap());
        assert!(packer.is_active());

        // Data packets until the resource reports complete.
        let mut guard = 0;
        while packer.is_active() {
            let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
            assert!(packer.next_packet(&mut writer, 1024).unwrap());
            guard += 1;
            assert!(guard < 100, "transfer did not converge");
        }

        assert_eq!(packer.take_last_completed(), Some(mesh.key()));
        assert_eq!(packer.take_last_completed(), None);

        // Idle packer declines.
        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
        assert!(!packer.next_packet(&mut writer, 1024).unwrap());
    }

    #[test]
    fn assign_cancels_in_flight_transfer() {
        let first = test_mesh(1, 100);
        let second = test_mesh(2, 1);
        let mut packer = ResourcePacker::new();

        packer.assign(first);
        let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
        packer.next_packet(&mut writer, 64).unwrap();

        // Mid-transfer reassignment: no completion recorded for the first.
        packer.assign(second.clone());
        assert_eq!(packer.take_last_completed(), None);

        let mut guard = 0;
        while packer.is_active() {
            let mut writer = PacketWriter::new(RoutingId::Mesh as u16, 0);
            packer.next_packet(&mut writer, 1024).unwrap();
            guard += 1;
            assert!(guard < 100);
        }
        assert_eq!(packer.take_last_completed(), Some(second.key()));
    }
}
