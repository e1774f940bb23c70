//! The shape contract.
//!
//! A shape instance is uniquely identified by its routing id (the shape
//! type) and shape id. Id zero marks a transient shape, auto-destroyed by
//! the client at the next frame boundary; any other id persists until an
//! explicit destroy.
//!
//! Simple shapes are fully described by one create packet. Complex shapes
//! ([`Shape::is_complex`]) additionally stream data packets through
//! [`Shape::write_data`], driven by an opaque [`DataCursor`] so each kind
//! can advance by whatever unit suits it.

use std::sync::Arc;

use telescene_proto::{
    Attributes, CreateMessage, DestroyMessage, PacketReader, PacketWriter, Result, UpdateMessage,
    WireError,
    messages::{ObjectFlag, UpdateFlag},
};

use crate::resource::Resource;

/// Progress marker for complex shape data streaming.
///
/// Semantics are owned by the shape kind: `phase` typically selects a
/// component, `offset` an element position within it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataCursor {
    /// Current streaming phase.
    pub phase: u16,
    /// Element offset within the current phase.
    pub offset: u64,
}

/// Outcome of one [`Shape::write_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStatus {
    /// The written packet completed the shape's data.
    Done,
    /// More data packets remain; call again.
    More,
}

/// The create-message state common to every shape.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ShapeCore {
    /// Shape id; zero for transient shapes.
    pub id: u32,
    /// Category for viewer filtering.
    pub category: u16,
    /// [`ObjectFlag`] bits.
    pub flags: u16,
    /// Transform and colour.
    pub attributes: Attributes,
}

impl ShapeCore {
    /// New core with identity attributes.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self { id, ..Self::default() }
    }

    /// True for shapes auto-destroyed at the next frame boundary.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.id == 0
    }

    /// Whether `bit` is set in the object flags.
    #[must_use]
    pub fn has_flag(&self, bit: u16) -> bool {
        self.flags & bit != 0
    }

    /// Set or clear flag bits.
    pub fn set_flag(&mut self, bit: u16, on: bool) {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Switch attribute precision, converting stored values.
    pub fn set_double_precision(&mut self, on: bool) {
        self.set_flag(ObjectFlag::DOUBLE_PRECISION, on);
        self.attributes = if on { self.attributes.to_double() } else { self.attributes.to_single() };
    }

    /// The create message for the current state.
    #[must_use]
    pub fn create_message(&self) -> CreateMessage {
        CreateMessage {
            id: self.id,
            category: self.category,
            flags: self.flags,
            attributes: self.attributes,
        }
    }

    /// Adopt state from a decoded create message.
    pub fn apply_create(&mut self, message: CreateMessage) {
        self.id = message.id;
        self.category = message.category;
        self.flags = message.flags;
        self.attributes = message.attributes;
    }

    /// Apply an update message, honouring update-mode bits.
    ///
    /// Without [`UpdateFlag::UPDATE_MODE`] the whole attribute block is
    /// replaced (including its precision); with it only the flagged groups
    /// change.
    pub fn apply_update(&mut self, message: &UpdateMessage) {
        if message.flags & UpdateFlag::UPDATE_MODE == 0 {
            self.attributes = message.attributes;
            self.set_flag(
                ObjectFlag::DOUBLE_PRECISION,
                message.flags & ObjectFlag::DOUBLE_PRECISION != 0,
            );
            return;
        }
        if message.flags & UpdateFlag::POSITION != 0 {
            self.attributes.set_position(message.attributes.position());
        }
        if message.flags & UpdateFlag::ROTATION != 0 {
            self.attributes.set_rotation(message.attributes.rotation());
        }
        if message.flags & UpdateFlag::SCALE != 0 {
            self.attributes.set_scale(message.attributes.scale());
        }
        if message.flags & UpdateFlag::COLOUR != 0 {
            self.attributes.set_colour(message.attributes.colour());
        }
    }
}

/// A shape that can be emitted to, and reconstructed from, the wire.
pub trait Shape: Send {
    /// The routing id selecting this shape type.
    fn routing_id(&self) -> u16;

    /// Shared create-message state.
    fn core(&self) -> &ShapeCore;

    /// Mutable shared state.
    fn core_mut(&mut self) -> &mut ShapeCore;

    /// True when the shape streams data packets after its create packet.
    fn is_complex(&self) -> bool {
        false
    }

    /// Shape id.
    fn id(&self) -> u32 {
        self.core().id
    }

    /// Serialise identity, attributes and any fixed-size tail.
    ///
    /// # Errors
    ///
    /// Rejects a replace flag without skip-resources (reference counts
    /// cannot survive an implicit destroy), precision mismatches and
    /// capacity overruns.
    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        let core = self.core();
        if core.has_flag(ObjectFlag::REPLACE) && !core.has_flag(ObjectFlag::SKIP_RESOURCES) {
            return Err(WireError::Malformed("replace flag without skip-resources"));
        }
        core.create_message().write(writer)
    }

    /// Write one data packet for a complex shape, advancing `cursor`.
    ///
    /// Called repeatedly until [`DataStatus::Done`]; the packet written by
    /// the final call must still be sent.
    ///
    /// # Errors
    ///
    /// Capacity and encoding failures.
    fn write_data(&self, _writer: &mut PacketWriter, _cursor: &mut DataCursor) -> Result<DataStatus> {
        Ok(DataStatus::Done)
    }

    /// Serialise an update replacing all object attributes.
    ///
    /// # Errors
    ///
    /// Capacity and encoding failures.
    fn write_update(&self, writer: &mut PacketWriter) -> Result<()> {
        let core = self.core();
        UpdateMessage {
            id: core.id,
            flags: core.flags & ObjectFlag::DOUBLE_PRECISION,
            attributes: core.attributes,
        }
        .write(writer)
    }

    /// Serialise a destroy for this shape's id.
    ///
    /// # Errors
    ///
    /// Capacity failures only.
    fn write_destroy(&self, writer: &mut PacketWriter) -> Result<()> {
        DestroyMessage { id: self.core().id }.write(writer)
    }

    /// Decode a create message into this instance.
    ///
    /// # Errors
    ///
    /// Short or malformed payloads.
    fn read_create(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        let message = CreateMessage::read(reader)?;
        self.core_mut().apply_create(message);
        Ok(())
    }

    /// Decode one data packet written by [`Shape::write_data`].
    ///
    /// # Errors
    ///
    /// Simple shapes reject data packets.
    fn read_data(&mut self, _reader: &mut PacketReader<'_>) -> Result<()> {
        Err(WireError::Malformed("data message for a simple shape"))
    }

    /// Resources this shape references.
    ///
    /// Connections reference count these and stream them ahead of the
    /// shape's create packet unless the skip-resources flag is set.
    fn resources(&self) -> Vec<Arc<dyn Resource>> {
        Vec::new()
    }
}

/// Generates the fluent builder and accessor surface shared by all shape
/// types.
macro_rules! shape_builders {
    ($ty:ty) => {
        impl $ty {
            /// Set the shape id; zero makes the shape transient.
            #[must_use]
            pub fn with_id(mut self, id: u32) -> Self {
                self.core.id = id;
                self
            }

            /// Set the category used for viewer filtering.
            #[must_use]
            pub fn with_category(mut self, category: u16) -> Self {
                self.core.category = category;
                self
            }

            /// Set the position.
            #[must_use]
            pub fn with_position(mut self, position: $crate::maths::Vector3) -> Self {
                self.core.attributes.set_position(position.into());
                self
            }

            /// Set the rotation.
            #[must_use]
            pub fn with_rotation(mut self, rotation: $crate::maths::Quaternion) -> Self {
                self.core.attributes.set_rotation(rotation.into());
                self
            }

            /// Set the raw scale triple; semantics are per shape type.
            #[must_use]
            pub fn with_scale(mut self, scale: $crate::maths::Vector3) -> Self {
                self.core.attributes.set_scale(scale.into());
                self
            }

            /// Set the colour.
            #[must_use]
            pub fn with_colour(mut self, colour: $crate::maths::Colour) -> Self {
                self.core.attributes.set_colour(colour.into());
                self
            }

            /// Set or clear the wireframe flag.
            #[must_use]
            pub fn wireframe(mut self, on: bool) -> Self {
                self.core.set_flag(telescene_proto::messages::ObjectFlag::WIREFRAME, on);
                self
            }

            /// Set or clear the transparent flag.
            #[must_use]
            pub fn transparent(mut self, on: bool) -> Self {
                self.core.set_flag(telescene_proto::messages::ObjectFlag::TRANSPARENT, on);
                self
            }

            /// Set or clear the two-sided flag.
            #[must_use]
            pub fn two_sided(mut self, on: bool) -> Self {
                self.core.set_flag(telescene_proto::messages::ObjectFlag::TWO_SIDED, on);
                self
            }

            /// Replace any existing shape with this id on creation.
            ///
            /// Implies skip-resources: reference counts cannot be
            /// maintained across an implicit destroy.
            #[must_use]
            pub fn replace(mut self, on: bool) -> Self {
                self.core.set_flag(telescene_proto::messages::ObjectFlag::REPLACE, on);
                if on {
                    self.core.set_flag(telescene_proto::messages::ObjectFlag::SKIP_RESOURCES, true);
                }
                self
            }

            /// Do not reference count or transfer this shape's resources.
            #[must_use]
            pub fn skip_resources(mut self, on: bool) -> Self {
                self.core.set_flag(telescene_proto::messages::ObjectFlag::SKIP_RESOURCES, on);
                self
            }

            /// Encode object attributes in double precision.
            #[must_use]
            pub fn double_precision(mut self, on: bool) -> Self {
                self.core.set_double_precision(on);
                self
            }

            /// Current position.
            #[must_use]
            pub fn position(&self) -> $crate::maths::Vector3 {
                self.core.attributes.position().into()
            }

            /// Current rotation.
            #[must_use]
            pub fn rotation(&self) -> $crate::maths::Quaternion {
                self.core.attributes.rotation().into()
            }

            /// Current raw scale triple.
            #[must_use]
            pub fn scale(&self) -> $crate::maths::Vector3 {
                self.core.attributes.scale().into()
            }

            /// Current colour.
            #[must_use]
            pub fn colour(&self) -> $crate::maths::Colour {
                self.core.attributes.colour().into()
            }

            /// Current category.
            #[must_use]
            pub fn category(&self) -> u16 {
                self.core.category
            }
        }
    };
}

pub(crate) use shape_builders;
