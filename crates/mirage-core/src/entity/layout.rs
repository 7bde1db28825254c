//! Shape of the foreign entity structure, loaded from the layout descriptor

use serde::{Deserialize, Serialize};

use crate::config::memory::MAX_RECORD_SIZE;
use crate::error::{Error, Result};
use crate::memory::{BucketMapLayout, PrimitiveKind, RecordLayout, TextEncoding};
use crate::offset::PointerChain;

/// Field names every graph node layout must provide
pub mod node_fields {
    pub const LEFT: &str = "left";
    pub const PARENT: &str = "parent";
    pub const RIGHT: &str = "right";
    pub const ID: &str = "id";
    pub const ENTITY: &str = "entity";

    /// Outgoing links, in push order
    pub const LINKS: [&str; 3] = [LEFT, PARENT, RIGHT];
}

fn default_path_max_len() -> usize {
    256
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGraphLayout {
    /// Steps from the anchor root to the first node of the graph
    #[serde(default)]
    pub root_chain: PointerChain,
    /// Graph node: up to three links, the entity id and the entity pointer
    pub node: RecordLayout,
    pub entity: EntityLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLayout {
    pub record: RecordLayout,
    /// Steps from the entity address that must lead back to the entity address
    pub back_reference: PointerChain,
    /// Steps from the entity address to the first byte of its path text
    pub path: PointerChain,
    #[serde(default)]
    pub path_encoding: TextEncoding,
    #[serde(default = "default_path_max_len")]
    pub path_max_len: usize,
    /// Every valid entity path starts with this
    pub path_prefix: String,
    /// `array_handle` field of `record` listing component pointers
    #[serde(default)]
    pub component_list: Option<String>,
    #[serde(default)]
    pub component_lookup: Option<ComponentLookupLayout>,
}

/// Where the name -> component slot table lives, and how its buckets are packed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentLookupLayout {
    /// Steps from the entity address to the table's array handle
    pub chain: PointerChain,
    #[serde(default)]
    pub buckets: BucketMapLayout,
}

impl EntityGraphLayout {
    /// Check field presence and kinds up front so walk failures mean bad memory, not a bad layout
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.entity.record.validate()?;
        self.node.require(&[
            (node_fields::LEFT, PrimitiveKind::Pointer),
            (node_fields::PARENT, PrimitiveKind::Pointer),
            (node_fields::RIGHT, PrimitiveKind::Pointer),
            (node_fields::ENTITY, PrimitiveKind::Pointer),
        ])?;
        let id = self.node.rule(node_fields::ID)?;
        if matches!(
            id.kind,
            PrimitiveKind::F32 | PrimitiveKind::F64 | PrimitiveKind::ArrayHandle
        ) {
            return Err(Error::InvalidLayout(format!(
                "{}.{} must be an integer, found {}",
                self.node.name,
                node_fields::ID,
                id.kind
            )));
        }

        if let Some(field) = &self.entity.component_list {
            self.entity
                .record
                .require(&[(field.as_str(), PrimitiveKind::ArrayHandle)])?;
        }
        if self.entity.path_prefix.is_empty() {
            return Err(Error::InvalidLayout(
                "entity path_prefix must not be empty".to_string(),
            ));
        }
        if self.entity.path_max_len == 0 || self.entity.path_max_len > MAX_RECORD_SIZE {
            return Err(Error::InvalidLayout(format!(
                "entity path_max_len must be in 1..={}",
                MAX_RECORD_SIZE
            )));
        }
        if let Some(lookup) = &self.entity.component_lookup {
            lookup.buckets.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::fixtures;

    #[test]
    fn test_fixture_layout_is_valid() {
        assert!(fixtures::graph_layout().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_link() {
        let mut layout = fixtures::graph_layout();
        layout.node.fields.remove(node_fields::PARENT);
        assert!(matches!(layout.validate(), Err(Error::MissingField { .. })));
    }

    #[test]
    fn test_validate_rejects_float_id() {
        let mut layout = fixtures::graph_layout();
        layout.node = layout.node.field(node_fields::ID, 0x20, PrimitiveKind::F32);
        assert!(matches!(layout.validate(), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_validate_rejects_wrong_component_kind() {
        let mut layout = fixtures::graph_layout();
        layout.entity.component_list = Some("owner".to_string());
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_offsets() {
        let mut layout = fixtures::graph_layout();
        layout.node = layout.node.field(node_fields::LEFT, usize::MAX, PrimitiveKind::Pointer);
        assert!(matches!(layout.validate(), Err(Error::InvalidLayout(_))));

        let mut layout = fixtures::graph_layout();
        layout.entity.record = layout.entity.record.with_size(1 << 40);
        assert!(layout.validate().is_err());

        let mut layout = fixtures::graph_layout();
        layout.entity.path_max_len = usize::MAX;
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_entity_layout_defaults() {
        let json = r#"{
            "record": { "name": "Entity", "fields": {} },
            "back_reference": [{ "op": "deref", "at": 8 }],
            "path": [{ "op": "deref", "at": 16 }],
            "path_prefix": "Metadata/"
        }"#;
        let layout: EntityLayout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.path_encoding, TextEncoding::Utf8);
        assert_eq!(layout.path_max_len, 256);
        assert!(layout.component_list.is_none());
        assert!(layout.component_lookup.is_none());
    }
}
