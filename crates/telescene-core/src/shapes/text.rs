//! Text label shapes.
//!
//! Both kinds append their UTF-8 bytes, length-prefixed, after the create
//! message. Text2D positions are screen space by default, with (0, 0) top
//! left and (1, 1) bottom right; the world-space flag projects a world
//! position instead. Text3D sits in world space and may face the screen.

use telescene_proto::{
    PacketReader, PacketWriter, Result, WireError,
    messages::{RoutingId, Text2DFlag, Text3DFlag},
};

use crate::{
    maths::Vector3,
    shape::{Shape, ShapeCore, shape_builders},
};

fn write_text(text: &str, writer: &mut PacketWriter) -> Result<()> {
    let length = u16::try_from(text.len()).map_err(|_| WireError::Malformed("text length"))?;
    writer.write_u16(length)?;
    writer.write_bytes(text.as_bytes())
}

fn read_text(reader: &mut PacketReader<'_>) -> Result<String> {
    let length = reader.read_u16()? as usize;
    let raw = reader.read_bytes(length)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::Malformed("text encoding"))
}

/// A 2D text overlay.
#[derive(Debug, Default, Clone)]
pub struct Text2D {
    core: ShapeCore,
    text: String,
}

impl Text2D {
    /// Screen-space label at `position`; x and y in [0, 1].
    #[must_use]
    pub fn new(text: impl Into<String>, id: u32, position: Vector3) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(position.into());
        Self { core, text: text.into() }
    }

    /// Treat the position as world space, projected to the screen.
    #[must_use]
    pub fn world_space(mut self, on: bool) -> Self {
        self.core.set_flag(Text2DFlag::WORLD_SPACE, on);
        self
    }

    /// The label text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Shape for Text2D {
    fn routing_id(&self) -> u16 {
        RoutingId::Text2D as u16
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.core.create_message().write(writer)?;
        write_text(&self.text, writer)
    }

    fn read_create(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.core.apply_create(telescene_proto::CreateMessage::read(reader)?);
        self.text = read_text(reader)?;
        Ok(())
    }
}

shape_builders!(Text2D);

/// A 3D text label; scale.x hints the font size.
#[derive(Debug, Default, Clone)]
pub struct Text3D {
    core: ShapeCore,
    text: String,
}

impl Text3D {
    /// World-space label at `position`.
    #[must_use]
    pub fn new(text: impl Into<String>, id: u32, position: Vector3) -> Self {
        let mut core = ShapeCore::new(id);
        core.attributes.set_position(position.into());
        Self { core, text: text.into() }
    }

    /// Set the font size hint.
    #[must_use]
    pub fn with_size(mut self, size: f64) -> Self {
        let mut scale = self.core.attributes.scale();
        scale[0] = size;
        self.core.attributes.set_scale(scale);
        self
    }

    /// Orient the text towards the screen.
    #[must_use]
    pub fn screen_facing(mut self, on: bool) -> Self {
        self.core.set_flag(Text3DFlag::SCREEN_FACING, on);
        self
    }

    /// The label text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Shape for Text3D {
    fn routing_id(&self) -> u16 {
        RoutingId::Text3D as u16
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn write_create(&self, writer: &mut PacketWriter) -> Result<()> {
        self.core.create_message().write(writer)?;
        write_text(&self.text, writer)
    }

    fn read_create(&mut self, reader: &mut PacketReader<'_>) -> Result<()> {
        self.core.apply_create(telescene_proto::CreateMessage::read(reader)?);
        self.text = read_text(reader)?;
        Ok(())
    }
}

shape_builders!(Text3D);

#[cfg(test)]
mod tests {
    use telescene_proto::messages::ShapeMessageId;

    use super::*;

    #[test]
    fn text2d_round_trip() {
        let label = Text2D::new("frame stats", 5, Vector3::new(0.1, 0.1, 0.0)).world_space(true);
        let mut writer = PacketWriter::new(label.routing_id(), ShapeMessageId::Create as u16);
        label.write_create(&mut writer).unwrap();
        let packet = writer.finalise().unwrap();

        let mut back = Text2D::default();
        back.read_create(&mut packet.reader().unwrap()).unwrap();
        assert_eq!(back.text(), "frame stats");
        assert!(back.core().has_flag(Text2DFlag::WORLD_SPACE));
        assert_eq!(back.core(), label.core());
    }

    #[test]
    fn text3d_keeps_size_hint() {
        let label = Text3D::new("marker", 6, Vector3::ZERO).with_size(14.0).screen_facing(true);
        let mut writer = PacketWriter::new(label.routing_id(), ShapeMessageId::Create as u16);
        label.write_create(&mut writer).unwrap();
        let packet = writer.finalise().unwrap();

        let mut back = Text3D::default();
        back.read_create(&mut packet.reader().unwrap()).unwrap();
        assert_eq!(back.text(), "marker");
        assert_eq!(back.core().attributes.scale()[0], 14.0);
        assert!(back.core().has_flag(Text3DFlag::SCREEN_FACING));
    }

    #[test]
    fn utf8_text_survives() {
        let label = Text2D::new("δ = 0.5 µm", 1, Vector3::ZERO);
        let mut writer = PacketWriter::new(label.routing_id(), ShapeMessageId::Create as u16);
        label.write_create(&mut writer).unwrap();
        let packet = writer.finalise().unwrap();
        let mut back = Text2D::default();
        back.read_create(&mut packet.reader().unwrap()).unwrap();
        assert_eq!(back.text(), "δ = 0.5 µm");
    }
}
