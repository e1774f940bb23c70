//! Concrete shape types.
//!
//! Simple primitives encode everything in their create packet; the scale
//! triple carries per-kind semantics (a sphere's radius, a cylinder's
//! radius and length, a plane's patch extent). The complex kinds (inline
//! meshes, mesh sets, point clouds) live in their own modules.

mod mesh_set;
mod mesh_shape;
mod point_cloud;
mod text;

pub use mesh_set::{MeshSet, MeshSetPart};
pub use mesh_shape::MeshShape;
pub use point_cloud::PointCloudShape;
pub use text::{Text2D, Text3D};

use telescene_proto::messages::RoutingId;

use crate::{
    maths::{Quaternion, Vector3},
    shape::{Shape, ShapeCore, shape_builders},
};

/// Default shape axis used when orienting by direction.
const DEFAULT_AXIS: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 1.0 };

macro_rules! simple_shape {
    ($(#[$doc:meta])* $ty:ident, $routing:expr) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone)]
        pub struct $ty {
            core: ShapeCore,
        }

        impl Shape for $ty {
            fn routing_id(&self) -> u16 {
                $routing as u16
            }

            fn core(&self) -> &ShapeCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut ShapeCore {
                &mut self.core
            }
        }

        shape_builders!($ty);
    };
}

simple_shape! {
    /// A sphere; the scale triple carries the radius on every axis.
    Sphere, RoutingId::Sphere
}

impl Sphere {
    /// Sphere of `radius` centred at `centre`.
    #[must_use]
    pub fn new(id: u32, centre: Vector3, radius: f64) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(centre.into());
        core.attributes.set_scale([radius; 3]);
        Self { core }
    }

    /// Sphere radius.
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.core.attributes.scale()[0]
    }
}

simple_shape! {
    /// An axis-aligned box before rotation; scale is width, depth, height.
    Cuboid, RoutingId::Box
}

impl Cuboid {
    /// Box of `extents` (width, depth, height) centred at `centre`.
    #[must_use]
    pub fn new(id: u32, centre: Vector3, extents: Vector3) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(centre.into());
        core.attributes.set_scale(extents.into());
        Self { core }
    }
}

simple_shape! {
    /// A cone; scale.xy is the base radius, scale.z the length, with the
    /// apex at the position and direction via rotation.
    Cone, RoutingId::Cone
}

impl Cone {
    /// Cone with its apex at `apex`, opening along `direction`.
    #[must_use]
    pub fn new(id: u32, apex: Vector3, direction: Vector3, length: f64, radius: f64) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(apex.into());
        core.attributes.set_scale([radius, radius, length]);
        core.attributes
            .set_rotation(Quaternion::rotation_between(DEFAULT_AXIS, direction).into());
        Self { core }
    }
}

simple_shape! {
    /// A cylinder; scale.xy is the radius, scale.z the length.
    Cylinder, RoutingId::Cylinder
}

impl Cylinder {
    /// Cylinder centred at `centre`, aligned along `direction`.
    #[must_use]
    pub fn new(id: u32, centre: Vector3, direction: Vector3, length: f64, radius: f64) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(centre.into());
        core.attributes.set_scale([radius, radius, length]);
        core.attributes
            .set_rotation(Quaternion::rotation_between(DEFAULT_AXIS, direction).into());
        Self { core }
    }
}

simple_shape! {
    /// A capsule (cylinder with hemispherical caps); scale.xy is the
    /// radius, scale.z the cylinder length.
    Capsule, RoutingId::Capsule
}

impl Capsule {
    /// Capsule centred at `centre`, aligned along `direction`.
    #[must_use]
    pub fn new(id: u32, centre: Vector3, direction: Vector3, length: f64, radius: f64) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(centre.into());
        core.attributes.set_scale([radius, radius, length]);
        core.attributes
            .set_rotation(Quaternion::rotation_between(DEFAULT_AXIS, direction).into());
        Self { core }
    }
}

simple_shape! {
    /// A square patch visualising a plane; scale.x and scale.z carry the
    /// normal display length, scale.y the patch extent.
    Plane, RoutingId::Plane
}

impl Plane {
    /// Plane through `position` with the given `normal`.
    #[must_use]
    pub fn new(id: u32, position: Vector3, normal: Vector3, extent: f64, normal_length: f64) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(position.into());
        core.attributes.set_scale([normal_length, extent, normal_length]);
        core.attributes
            .set_rotation(Quaternion::rotation_between(DEFAULT_AXIS, normal).into());
        Self { core }
    }
}

simple_shape! {
    /// A star marker; the scale triple carries the radius.
    Star, RoutingId::Star
}

impl Star {
    /// Star of `radius` centred at `centre`.
    #[must_use]
    pub fn new(id: u32, centre: Vector3, radius: f64) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(centre.into());
        core.attributes.set_scale([radius; 3]);
        Self { core }
    }
}

simple_shape! {
    /// An arrow; scale.xy is the shaft radius, scale.z the length.
    Arrow, RoutingId::Arrow
}

impl Arrow {
    /// Arrow from `origin` along `direction`.
    #[must_use]
    pub fn new(id: u32, origin: Vector3, direction: Vector3, length: f64, radius: f64) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(origin.into());
        core.attributes.set_scale([radius, radius, length]);
        core.attributes
            .set_rotation(Quaternion::rotation_between(DEFAULT_AXIS, direction).into());
        Self { core }
    }
}

simple_shape! {
    /// A set of axes representing a pose, XYZ coloured RGB; the scale
    /// triple carries the axis display length.
    Pose, RoutingId::Pose
}

impl Pose {
    /// Pose marker at `position` with unit axis length.
    #[must_use]
    pub fn new(id: u32, position: Vector3) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(position.into());
        Self { core }
    }
}
