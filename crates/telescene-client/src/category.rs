//! Category handler.
//!
//! Categories group shapes for viewer filtering and form a forest rooted
//! at the implicit id 0. Definitions may arrive before their parent; the
//! forest is resolved lazily, so late binding is tolerated.

use std::{any::Any, collections::HashMap};

use telescene_proto::{
    CategoryNameMessage, Packet, PacketReader, PacketWriter,
    messages::{CategoryMessageId, RoutingId},
};

use crate::{error::ClientError, handler::MessageHandler};

/// One category definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInfo {
    /// Display name.
    pub name: String,
    /// Parent category id, zero for the root.
    pub parent_id: u16,
    /// Whether the category starts visible.
    pub default_active: bool,
}

/// Collects category definitions from the stream.
#[derive(Default)]
pub struct CategoryHandler {
    categories: HashMap<u16, CategoryInfo>,
}

impl CategoryHandler {
    /// New empty handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a category by id.
    #[must_use]
    pub fn category(&self, id: u16) -> Option<&CategoryInfo> {
        self.categories.get(&id)
    }

    /// Number of defined categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// True when no categories are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl MessageHandler for CategoryHandler {
    fn routing_id(&self) -> u16 {
        RoutingId::Category as u16
    }

    fn name(&self) -> &'static str {
        "category"
    }

    fn reset(&mut self) {
        self.categories.clear();
    }

    fn handle(&mut self, reader: &mut PacketReader<'_>) -> Result<(), ClientError> {
        if reader.message_id() != CategoryMessageId::NAME {
            return Err(ClientError::UnknownMessage {
                routing_id: self.routing_id(),
                message_id: reader.message_id(),
            });
        }
        let message = CategoryNameMessage::read(reader)?;
        self.categories.insert(
            message.category_id,
            CategoryInfo {
                name: message.name,
                parent_id: message.parent_id,
                default_active: message.default_active,
            },
        );
        Ok(())
    }

    fn snapshot(&self) -> Vec<Packet> {
        let mut out = Vec::new();
        for (&id, info) in &self.categories {
            let message = CategoryNameMessage {
                category_id: id,
                parent_id: info.parent_id,
                default_active: info.default_active,
                name: info.name.clone(),
            };
            let mut writer =
                PacketWriter::new(RoutingId::Category as u16, CategoryMessageId::NAME);
            if message.write(&mut writer).is_ok() {
                if let Ok(packet) = writer.finalise() {
                    out.push(packet);
                }
            }
        }
        out
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
