//! Typed protocol messages, routing ids and flag constants.
//!
//! Every message defines symmetric `read`/`write` against a packet. Shape
//! lifecycle messages (create/update/data/destroy) all begin with the 32-bit
//! shape id so a router can peek it before dispatching.

use crate::{
    error::{Result, WireError},
    packet::{PacketReader, PacketWriter},
};

/// Routing ids of the built-in message handlers.
///
/// Shape handlers start at [`RoutingId::SHAPE_ID_START`]; ids from
/// [`RoutingId::USER_ID_START`] are application-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RoutingId {
    /// Reserved null route.
    Null = 0,
    /// Global server settings, sent once on connect.
    ServerInfo = 1,
    /// Control messages ([`ControlMessageId`]).
    Control = 2,
    /// Collated (optionally compressed) packet envelope.
    CollatedPacket = 3,
    /// Mesh resource transfer ([`MeshMessageId`]).
    Mesh = 4,
    /// Camera updates. Reserved.
    Camera = 5,
    /// Category definitions.
    Category = 6,
    /// Material definitions. Reserved, never emitted.
    Material = 7,
    /// Sphere shapes; scale is the radius on all axes.
    Sphere = 64,
    /// Box shapes; scale is width/depth/height.
    Box = 65,
    /// Cone shapes; scale.xy is the base radius, scale.z the length.
    Cone = 66,
    /// Cylinder shapes.
    Cylinder = 67,
    /// Capsule shapes.
    Capsule = 68,
    /// Plane patches.
    Plane = 69,
    /// Star markers.
    Star = 70,
    /// Arrow shapes.
    Arrow = 71,
    /// Inline mesh shapes (vertex data travels with the shape).
    MeshShape = 72,
    /// Mesh set shapes (parts referencing mesh resources).
    MeshSet = 73,
    /// Point cloud shapes (referencing a point cloud resource).
    PointCloud = 74,
    /// 3D text labels.
    Text3D = 75,
    /// 2D text overlays.
    Text2D = 76,
    /// Pose markers (a set of axes, XYZ coloured RGB).
    Pose = 77,
}

impl RoutingId {
    /// First shape handler id.
    pub const SHAPE_ID_START: u16 = 64;
    /// First application-defined id.
    pub const USER_ID_START: u16 = 2048;

    /// Map a wire value onto a known routing id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        use RoutingId::{
            Arrow, Box, Camera, Capsule, Category, CollatedPacket, Cone, Control, Cylinder,
            Material, Mesh, MeshSet, MeshShape, Null, Plane, PointCloud, Pose, ServerInfo, Sphere,
            Star, Text2D, Text3D,
        };
        Some(match value {
            0 => Null,
            1 => ServerInfo,
            2 => Control,
            3 => CollatedPacket,
            4 => Mesh,
            5 => Camera,
            6 => Category,
            7 => Material,
            64 => Sphere,
            65 => Box,
            66 => Cone,
            67 => Cylinder,
            68 => Capsule,
            69 => Plane,
            70 => Star,
            71 => Arrow,
            72 => MeshShape,
            73 => MeshSet,
            74 => PointCloud,
            75 => Text3D,
            76 => Text2D,
            77 => Pose,
            _ => return None,
        })
    }

    /// True for any shape handler id, known or user-defined.
    #[must_use]
    pub fn is_shape(value: u16) -> bool {
        (Self::SHAPE_ID_START..Self::USER_ID_START).contains(&value)
    }
}

/// Message ids under any shape routing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ShapeMessageId {
    /// Reserved.
    Null = 0,
    /// Create a shape instance.
    Create = 1,
    /// Update attributes of an existing instance.
    Update = 2,
    /// Destroy a persistent instance.
    Destroy = 3,
    /// Additional data for a complex shape.
    Data = 4,
}

impl ShapeMessageId {
    /// Map a wire value onto a shape message id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => Self::Null,
            1 => Self::Create,
            2 => Self::Update,
            3 => Self::Destroy,
            4 => Self::Data,
            _ => return None,
        })
    }
}

/// Message ids under [`RoutingId::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ControlMessageId {
    /// Reserved.
    Null = 0,
    /// Frame boundary; `value32` is the delta time in time units.
    Frame = 1,
    /// Coordinate frame change; `value32` is the new [`CoordinateFrame`].
    CoordinateFrame = 2,
    /// Total frame count hint for finite recordings; `value32`.
    FrameCount = 3,
    /// Force a visual flush without advancing time.
    ForceFrameFlush = 4,
    /// Drop all client state.
    Reset = 5,
    /// Keyframe request; `value32` is the frame number.
    Keyframe = 6,
    /// The server stream is finished.
    End = 7,
}

impl ControlMessageId {
    /// Map a wire value onto a control message id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => Self::Null,
            1 => Self::Frame,
            2 => Self::CoordinateFrame,
            3 => Self::FrameCount,
            4 => Self::ForceFrameFlush,
            5 => Self::Reset,
            6 => Self::Keyframe,
            7 => Self::End,
            _ => return None,
        })
    }
}

/// Message ids under [`RoutingId::Mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MeshMessageId {
    /// Reserved.
    Invalid = 0,
    /// Release a mesh resource.
    Destroy = 1,
    /// Define a mesh resource (counts, draw type, transform).
    Create = 2,
    /// Vertex block.
    Vertex = 3,
    /// Index block.
    Index = 4,
    /// Per-vertex colour block.
    VertexColour = 5,
    /// Normal block.
    Normal = 6,
    /// UV block.
    Uv = 7,
    /// Material binding. Reserved.
    SetMaterial = 8,
    /// Redefine an existing mesh in place.
    Redefine = 9,
    /// All components sent; the mesh may be realised.
    Finalise = 10,
}

impl MeshMessageId {
    /// Map a wire value onto a mesh message id.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => Self::Invalid,
            1 => Self::Destroy,
            2 => Self::Create,
            3 => Self::Vertex,
            4 => Self::Index,
            5 => Self::VertexColour,
            6 => Self::Normal,
            7 => Self::Uv,
            8 => Self::SetMaterial,
            9 => Self::Redefine,
            10 => Self::Finalise,
            _ => return None,
        })
    }
}

/// Category message ids under [`RoutingId::Category`].
pub struct CategoryMessageId;

impl CategoryMessageId {
    /// Category name definition.
    pub const NAME: u16 = 0;
}

/// Object flag bits carried on create messages.
pub struct ObjectFlag;

impl ObjectFlag {
    /// Render as a wireframe mesh.
    pub const WIREFRAME: u16 = 1 << 0;
    /// The colour alpha channel is meaningful.
    pub const TRANSPARENT: u16 = 1 << 1;
    /// Render two sided.
    pub const TWO_SIDED: u16 = 1 << 2;
    /// Replace any existing shape with the same id.
    pub const REPLACE: u16 = 1 << 3;
    /// Multiple shapes packed in one message.
    pub const MULTI_SHAPE: u16 = 1 << 4;
    /// Do not reference count or transfer resources for this shape.
    pub const SKIP_RESOURCES: u16 = 1 << 5;
    /// Object attributes are double precision on the wire.
    pub const DOUBLE_PRECISION: u16 = 1 << 6;
    /// First bit available for per-shape-type semantics.
    pub const USER: u16 = 1 << 8;
}

/// Update flag bits, occupying the user bit block above [`ObjectFlag`].
pub struct UpdateFlag;

impl UpdateFlag {
    /// Update only the attribute groups whose bits are set; without this
    /// flag the whole attribute block is replaced.
    pub const UPDATE_MODE: u16 = ObjectFlag::USER << 1;
    /// Update position.
    pub const POSITION: u16 = ObjectFlag::USER << 2;
    /// Update rotation.
    pub const ROTATION: u16 = ObjectFlag::USER << 3;
    /// Update scale.
    pub const SCALE: u16 = ObjectFlag::USER << 4;
    /// Update colour.
    pub const COLOUR: u16 = ObjectFlag::USER << 5;
}

/// Text2D flag bits.
pub struct Text2DFlag;

impl Text2DFlag {
    /// Position is world space, projected to screen space.
    pub const WORLD_SPACE: u16 = ObjectFlag::USER;
}

/// Text3D flag bits.
pub struct Text3DFlag;

impl Text3DFlag {
    /// Orient the text towards the screen.
    pub const SCREEN_FACING: u16 = ObjectFlag::USER;
}

/// Mesh shape flag bits.
pub struct MeshShapeFlag;

impl MeshShapeFlag {
    /// Viewer should derive normals and light the mesh.
    pub const CALCULATE_NORMALS: u16 = ObjectFlag::USER;
}

/// Control message flag bits.
pub struct ControlFlag;

impl ControlFlag {
    /// On a Frame message: keep transient shapes for this frame.
    pub const PERSIST_TRANSIENT: u32 = 1 << 0;
}

/// Collated packet flag bits.
pub struct CollatedFlag;

impl CollatedFlag {
    /// The collated body is deflate-compressed.
    pub const COMPRESSED: u16 = 1 << 0;
}

/// Coordinate frames, listed right/forward/up; `Neg` marks a negated up
/// axis. Right-handed frames precede left-handed ones.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordinateFrame {
    /// X right, Y forward, Z up (default).
    #[default]
    Xyz = 0,
    /// X right, Z forward, -Y up.
    XzyNeg = 1,
    /// Y right, X forward, -Z up.
    YxzNeg = 2,
    /// Y right, Z forward, X up.
    Yzx = 3,
    /// Z right, X forward, Y up.
    Zxy = 4,
    /// Z right, Y forward, -X up.
    ZyxNeg = 5,
    /// X right, Y forward, -Z up. First left-handed frame.
    XyzNeg = 6,
    /// X right, Z forward, Y up.
    Xzy = 7,
    /// Y right, X forward, Z up.
    Yxz = 8,
    /// Y right, Z forward, -X up.
    YzxNeg = 9,
    /// Z right, X forward, -Y up.
    ZxyNeg = 10,
    /// Z right, Y forward, X up.
    Zyx = 11,
}

impl CoordinateFrame {
    /// First left-handed frame value.
    pub const LEFT: u8 = CoordinateFrame::XyzNeg as u8;

    /// Map a wire value onto a coordinate frame.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Xyz,
            1 => Self::XzyNeg,
            2 => Self::YxzNeg,
            3 => Self::Yzx,
            4 => Self::Zxy,
            5 => Self::ZyxNeg,
            6 => Self::XyzNeg,
            7 => Self::Xzy,
            8 => Self::Yxz,
            9 => Self::YzxNeg,
            10 => Self::ZxyNeg,
            11 => Self::Zyx,
            _ => return None,
        })
    }

    /// True for left-handed frames.
    #[must_use]
    pub fn is_left_handed(self) -> bool {
        self as u8 >= Self::LEFT
    }
}

/// Global server settings, sent to every client on connection.
///
/// The framed record is 64 bytes: a 48-byte payload padded with reserved
/// zero bytes, plus the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfoMessage {
    /// Microseconds per time-unit tick in Frame messages.
    pub time_unit: u64,
    /// Default inter-frame delta, in time units, for replay.
    pub default_frame_time: u32,
    /// Coordinate frame the server works in.
    pub coordinate_frame: CoordinateFrame,
}

impl ServerInfoMessage {
    /// Reserved padding bytes after the populated fields.
    pub const RESERVED_BYTES: usize = 35;
    /// Payload size on the wire.
    pub const PAYLOAD_SIZE: usize = 8 + 4 + 1 + Self::RESERVED_BYTES;

    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Short payloads and unknown coordinate frames fail.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        let time_unit = reader.read_u64()?;
        let default_frame_time = reader.read_u32()?;
        let frame_raw = reader.read_u8()?;
        let coordinate_frame =
            CoordinateFrame::from_u8(frame_raw).ok_or(WireError::Malformed("coordinate frame"))?;
        reader.read_bytes(Self::RESERVED_BYTES)?;
        Ok(Self { time_unit, default_frame_time, coordinate_frame })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u64(self.time_unit)?;
        writer.write_u32(self.default_frame_time)?;
        writer.write_u8(self.coordinate_frame as u8)?;
        writer.write_bytes(&[0u8; Self::RESERVED_BYTES])?;
        Ok(())
    }
}

impl Default for ServerInfoMessage {
    fn default() -> Self {
        Self {
            // 1 millisecond per tick.
            time_unit: 1000,
            // 33 ticks, about 1/30 s.
            default_frame_time: 33,
            coordinate_frame: CoordinateFrame::Xyz,
        }
    }
}

/// A system control message; field meaning depends on [`ControlMessageId`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    /// Flags particular to the control id ([`ControlFlag`]).
    pub flags: u32,
    /// 32-bit value particular to the control id.
    pub value32: u32,
    /// 64-bit value particular to the control id.
    pub value64: u64,
}

impl ControlMessage {
    /// Payload size on the wire.
    pub const PAYLOAD_SIZE: usize = 4 + 4 + 8;

    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            flags: reader.read_u32()?,
            value32: reader.read_u32()?,
            value64: reader.read_u64()?,
        })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.flags)?;
        writer.write_u32(self.value32)?;
        writer.write_u64(self.value64)?;
        Ok(())
    }
}

/// Category definition: id, parent, default visibility and display name.
///
/// Categories form a forest rooted at the implicit id 0. The name is
/// length-prefixed, not NUL terminated, on the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CategoryNameMessage {
    /// Category being defined.
    pub category_id: u16,
    /// Parent category, zero for the root.
    pub parent_id: u16,
    /// Whether the category starts visible.
    pub default_active: bool,
    /// Display name.
    pub name: String,
}

impl CategoryNameMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Short payloads and non-UTF-8 names fail.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        let category_id = reader.read_u16()?;
        let parent_id = reader.read_u16()?;
        let default_active = reader.read_u16()? != 0;
        let name_length = reader.read_u16()? as usize;
        let raw = reader.read_bytes(name_length)?;
        let name =
            String::from_utf8(raw.to_vec()).map_err(|_| WireError::Malformed("category name"))?;
        Ok(Self { category_id, parent_id, default_active, name })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails when the name exceeds 65535 bytes or capacity runs out.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        let name_length =
            u16::try_from(self.name.len()).map_err(|_| WireError::Malformed("category name"))?;
        writer.write_u16(self.category_id)?;
        writer.write_u16(self.parent_id)?;
        writer.write_u16(u16::from(self.default_active))?;
        writer.write_u16(name_length)?;
        writer.write_bytes(self.name.as_bytes())?;
        Ok(())
    }
}

/// Header of a collated packet payload, preceding the packed body.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollatedPacketMessage {
    /// Flag bits ([`CollatedFlag`]).
    pub flags: u16,
    /// Byte count of the body once decompressed.
    pub uncompressed_bytes: u32,
}

impl CollatedPacketMessage {
    /// Encoded size, including the reserved field.
    pub const PAYLOAD_SIZE: usize = 2 + 2 + 4;

    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        let flags = reader.read_u16()?;
        let _reserved = reader.read_u16()?;
        let uncompressed_bytes = reader.read_u32()?;
        Ok(Self { flags, uncompressed_bytes })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u16(self.flags)?;
        writer.write_u16(0)?;
        writer.write_u32(self.uncompressed_bytes)?;
        Ok(())
    }
}

/// Model transform and colour of an object, at one precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectAttrs<T> {
    /// RGBA colour, one byte per channel.
    pub colour: u32,
    /// Position.
    pub position: [T; 3],
    /// Rotation quaternion, xyzw order.
    pub rotation: [T; 4],
    /// Scale; per-shape semantics.
    pub scale: [T; 3],
}

macro_rules! attrs_impl {
    ($ty:ty, $read:ident, $write:ident) => {
        impl ObjectAttrs<$ty> {
            /// Identity transform, coloured white.
            #[must_use]
            pub fn identity() -> Self {
                Self {
                    colour: 0xFFFF_FFFF,
                    position: [0.0; 3],
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    scale: [1.0; 3],
                }
            }

            fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
                let colour = reader.read_u32()?;
                let mut position = [0.0; 3];
                for v in &mut position {
                    *v = reader.$read()?;
                }
                let mut rotation = [0.0; 4];
                for v in &mut rotation {
                    *v = reader.$read()?;
                }
                let mut scale = [0.0; 3];
                for v in &mut scale {
                    *v = reader.$read()?;
                }
                Ok(Self { colour, position, rotation, scale })
            }

            fn write(&self, writer: &mut PacketWriter) -> Result<()> {
                writer.write_u32(self.colour)?;
                for v in self.position {
                    writer.$write(v)?;
                }
                for v in self.rotation {
                    writer.$write(v)?;
                }
                for v in self.scale {
                    writer.$write(v)?;
                }
                Ok(())
            }
        }
    };
}

attrs_impl!(f32, read_f32, write_f32);
attrs_impl!(f64, read_f64, write_f64);

/// Object attributes tagged with their wire precision.
///
/// The precision is chosen once per message: the
/// [`ObjectFlag::DOUBLE_PRECISION`] bit and the encoding must agree, which
/// the message writers enforce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attributes {
    /// 32-bit float encoding.
    Single(ObjectAttrs<f32>),
    /// 64-bit float encoding.
    Double(ObjectAttrs<f64>),
}

impl Default for Attributes {
    fn default() -> Self {
        Self::Single(ObjectAttrs::<f32>::identity())
    }
}

impl Attributes {
    /// Encoded payload size for this precision.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        match self {
            Self::Single(_) => 4 + 10 * 4,
            Self::Double(_) => 4 + 10 * 8,
        }
    }

    /// True for the double precision variant.
    #[must_use]
    pub fn is_double(&self) -> bool {
        matches!(self, Self::Double(_))
    }

    /// Read at the precision selected by `double_precision`.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>, double_precision: bool) -> Result<Self> {
        if double_precision {
            Ok(Self::Double(ObjectAttrs::<f64>::read(reader)?))
        } else {
            Ok(Self::Single(ObjectAttrs::<f32>::read(reader)?))
        }
    }

    /// Write at this variant's precision.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        match self {
            Self::Single(attrs) => attrs.write(writer),
            Self::Double(attrs) => attrs.write(writer),
        }
    }

    /// RGBA colour.
    #[must_use]
    pub fn colour(&self) -> u32 {
        match self {
            Self::Single(a) => a.colour,
            Self::Double(a) => a.colour,
        }
    }

    /// Set the RGBA colour.
    pub fn set_colour(&mut self, colour: u32) {
        match self {
            Self::Single(a) => a.colour = colour,
            Self::Double(a) => a.colour = colour,
        }
    }

    /// Position, widened to f64.
    #[must_use]
    pub fn position(&self) -> [f64; 3] {
        match self {
            Self::Single(a) => a.position.map(f64::from),
            Self::Double(a) => a.position,
        }
    }

    /// Set the position, narrowing as the variant requires.
    pub fn set_position(&mut self, position: [f64; 3]) {
        match self {
            Self::Single(a) => a.position = position.map(|v| v as f32),
            Self::Double(a) => a.position = position,
        }
    }

    /// Rotation quaternion (xyzw), widened to f64.
    #[must_use]
    pub fn rotation(&self) -> [f64; 4] {
        match self {
            Self::Single(a) => a.rotation.map(f64::from),
            Self::Double(a) => a.rotation,
        }
    }

    /// Set the rotation quaternion (xyzw).
    pub fn set_rotation(&mut self, rotation: [f64; 4]) {
        match self {
            Self::Single(a) => a.rotation = rotation.map(|v| v as f32),
            Self::Double(a) => a.rotation = rotation,
        }
    }

    /// Scale, widened to f64.
    #[must_use]
    pub fn scale(&self) -> [f64; 3] {
        match self {
            Self::Single(a) => a.scale.map(f64::from),
            Self::Double(a) => a.scale,
        }
    }

    /// Set the scale.
    pub fn set_scale(&mut self, scale: [f64; 3]) {
        match self {
            Self::Single(a) => a.scale = scale.map(|v| v as f32),
            Self::Double(a) => a.scale = scale,
        }
    }

    /// Convert to double precision.
    #[must_use]
    pub fn to_double(&self) -> Self {
        match self {
            Self::Single(a) => Self::Double(ObjectAttrs {
                colour: a.colour,
                position: a.position.map(f64::from),
                rotation: a.rotation.map(f64::from),
                scale: a.scale.map(f64::from),
            }),
            Self::Double(_) => *self,
        }
    }

    /// Convert to single precision, narrowing stored values.
    #[must_use]
    pub fn to_single(&self) -> Self {
        match self {
            Self::Single(_) => *self,
            Self::Double(a) => Self::Single(ObjectAttrs {
                colour: a.colour,
                position: a.position.map(|v| v as f32),
                rotation: a.rotation.map(|v| v as f32),
                scale: a.scale.map(|v| v as f32),
            }),
        }
    }
}

fn check_precision(flags: u16, attributes: &Attributes) -> Result<()> {
    if (flags & ObjectFlag::DOUBLE_PRECISION != 0) != attributes.is_double() {
        return Err(WireError::PrecisionMismatch);
    }
    Ok(())
}

/// Shape creation: identity, grouping, flags and the initial transform.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CreateMessage {
    /// Shape id; zero creates a transient shape.
    pub id: u32,
    /// Category for viewer filtering.
    pub category: u16,
    /// [`ObjectFlag`] bits.
    pub flags: u16,
    /// Initial object attributes.
    pub attributes: Attributes,
}

impl CreateMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        let id = reader.read_u32()?;
        let category = reader.read_u16()?;
        let flags = reader.read_u16()?;
        let _reserved = reader.read_u16()?;
        let attributes = Attributes::read(reader, flags & ObjectFlag::DOUBLE_PRECISION != 0)?;
        Ok(Self { id, category, flags, attributes })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// [`WireError::PrecisionMismatch`] when the precision flag disagrees
    /// with the attribute variant; otherwise capacity errors only.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        check_precision(self.flags, &self.attributes)?;
        writer.write_u32(self.id)?;
        writer.write_u16(self.category)?;
        writer.write_u16(self.flags)?;
        writer.write_u16(0)?;
        self.attributes.write(writer)
    }
}

/// Shape update: replace attributes, or selected groups in update mode.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateMessage {
    /// Shape id being updated.
    pub id: u32,
    /// [`UpdateFlag`] bits plus [`ObjectFlag::DOUBLE_PRECISION`].
    pub flags: u16,
    /// New attribute values; in update mode only flagged groups apply.
    pub attributes: Attributes,
}

impl UpdateMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        let id = reader.read_u32()?;
        let flags = reader.read_u16()?;
        let attributes = Attributes::read(reader, flags & ObjectFlag::DOUBLE_PRECISION != 0)?;
        Ok(Self { id, flags, attributes })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// [`WireError::PrecisionMismatch`] when the precision flag disagrees
    /// with the attribute variant; otherwise capacity errors only.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        check_precision(self.flags, &self.attributes)?;
        writer.write_u32(self.id)?;
        writer.write_u16(self.flags)?;
        self.attributes.write(writer)
    }
}

/// Header of additional data for a complex shape.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataMessage {
    /// Shape id the data belongs to.
    pub id: u32,
}

impl DataMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { id: reader.read_u32()? })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.id)
    }
}

/// Destroy a persistent shape by id.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DestroyMessage {
    /// Shape id to destroy.
    pub id: u32,
}

impl DestroyMessage {
    /// Read from a packet payload.
    ///
    /// # Errors
    ///
    /// Fails on a short payload.
    pub fn read(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self { id: reader.read_u32()? })
    }

    /// Write to a packet payload.
    ///
    /// # Errors
    ///
    /// Fails only when the writer runs out of capacity.
    pub fn write(&self, writer: &mut PacketWriter) -> Result<()> {
        writer.write_u32(self.id)
    }
}
