use crate::core::identifiers::{AdapterId, DestinationId, EntityKind, SourceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the source→destination id association lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStyle {
    /// Reverse lookup on an external-id field stored on the destination
    /// record itself. Used for the top-level migrated entity.
    ExternalField,
    /// Side table in the adapter's checkpoint scope. Used for auxiliary
    /// entities such as taxonomy terms.
    SideTable,
}

/// Scoping key for id mappings: adapter + entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    adapter: AdapterId,
    entity: EntityKind,
    style: MappingStyle,
}

impl Namespace {
    pub fn side_table(adapter: AdapterId, entity: impl Into<EntityKind>) -> Self {
        Self {
            adapter,
            entity: entity.into(),
            style: MappingStyle::SideTable,
        }
    }

    pub fn external_field(adapter: AdapterId, entity: impl Into<EntityKind>) -> Self {
        Self {
            adapter,
            entity: entity.into(),
            style: MappingStyle::ExternalField,
        }
    }

    pub fn adapter(&self) -> &AdapterId {
        &self.adapter
    }

    pub fn entity(&self) -> &EntityKind {
        &self.entity
    }

    pub fn style(&self) -> MappingStyle {
        self.style
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.adapter, self.entity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub namespace: Namespace,
    pub source_id: SourceId,
    pub destination_id: DestinationId,
}
