//! Shape model and resource subsystem for the Telescene protocol.
//!
//! A [`Shape`](shape::Shape) is an in-memory instance of a primitive the
//! server wants visualised: identified by its routing id and shape id,
//! carrying a transform, colour, category and flags. Simple shapes are
//! fully described by one create packet; complex shapes stream additional
//! data packets.
//!
//! A [`Resource`](resource::Resource) is shared data (a mesh or point
//! cloud) referenced by shapes and transferred in byte-budgeted chunks
//! through a create/data/destroy protocol, driven per connection by a
//! [`ResourcePacker`](resource::ResourcePacker).
//!
//! This crate is pure logic: no sockets, no threads, no clocks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod maths;
pub mod mesh;
pub mod resource;
pub mod shape;
pub mod shapes;

pub use maths::{Colour, Quaternion, Vector3};
pub use mesh::{DrawType, PointCloud, SimpleMesh};
pub use resource::{Resource, ResourceKey, ResourcePacker, TransferProgress, resource_key};
pub use shape::{DataCursor, DataStatus, Shape, ShapeCore};
pub use shapes::{
    Arrow, Capsule, Cone, Cuboid, Cylinder, MeshSet, MeshSetPart, MeshShape, Plane,
    PointCloudShape, Pose, Sphere, Star, Text2D, Text3D,
};
