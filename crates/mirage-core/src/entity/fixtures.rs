//! Synthetic entity graphs for tests

use super::layout::{ComponentLookupLayout, EntityGraphLayout, EntityLayout, node_fields};
use crate::memory::{BucketMapLayout, MockMemoryReader, PrimitiveKind, RecordLayout, TextEncoding};
use crate::offset::{PointerChain, ResolveStep};

/// Anchor root; holds the pointer to the first node
pub const ROOT: u64 = 0x1000_0000;
const NODES: u64 = 0x2000_0000;
const ENTITIES: u64 = 0x3000_0000;

/// Node: left 0x00, parent 0x08, right 0x10, id 0x20, entity 0x28.
/// Entity: self pointer at 0x08, path pointer at 0x10, components at 0x18,
/// lookup table pointer at 0x30.
pub fn graph_layout() -> EntityGraphLayout {
    EntityGraphLayout {
        root_chain: PointerChain::new(vec![ResolveStep::Deref { at: 0 }]),
        node: RecordLayout::new("Node")
            .field(node_fields::LEFT, 0x00, PrimitiveKind::Pointer)
            .field(node_fields::PARENT, 0x08, PrimitiveKind::Pointer)
            .field(node_fields::RIGHT, 0x10, PrimitiveKind::Pointer)
            .field(node_fields::ID, 0x20, PrimitiveKind::U32)
            .field(node_fields::ENTITY, 0x28, PrimitiveKind::Pointer),
        entity: EntityLayout {
            record: RecordLayout::new("Entity")
                .field("owner", 0x08, PrimitiveKind::Pointer)
                .field("path", 0x10, PrimitiveKind::Pointer)
                .field("components", 0x18, PrimitiveKind::ArrayHandle)
                .with_size(0x40),
            back_reference: PointerChain::new(vec![ResolveStep::Deref { at: 0x08 }]),
            path: PointerChain::new(vec![ResolveStep::Deref { at: 0x10 }]),
            path_encoding: TextEncoding::Utf8,
            path_max_len: 64,
            path_prefix: "Metadata/".to_string(),
            component_list: Some("components".to_string()),
            component_lookup: Some(ComponentLookupLayout {
                chain: PointerChain::new(vec![ResolveStep::Deref { at: 0x30 }]),
                buckets: BucketMapLayout::default(),
            }),
        },
    }
}

pub fn node_at(index: u64) -> u64 {
    NODES + index * 0x100
}

pub fn entity_at(index: u64) -> u64 {
    ENTITIES + index * 0x100
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    pub left: u64,
    pub parent: u64,
    pub right: u64,
    pub id: u32,
    pub entity: u64,
}

pub fn write_node(reader: &MockMemoryReader, at: u64, node: Node) {
    reader.write_bytes(at, &[0u8; 0x30]);
    reader.write_u64(at, node.left);
    reader.write_u64(at + 0x08, node.parent);
    reader.write_u64(at + 0x10, node.right);
    reader.write_u32(at + 0x20, node.id);
    reader.write_u64(at + 0x28, node.entity);
}

/// Entity whose path text sits right after its record
pub fn write_entity(reader: &MockMemoryReader, at: u64, path: &str) {
    reader.write_bytes(at, &[0u8; 0x40]);
    reader.write_u64(at + 0x08, at);
    reader.write_u64(at + 0x10, at + 0x40);
    let mut text = path.as_bytes().to_vec();
    text.resize(64, 0);
    reader.write_bytes(at + 0x40, &text);
}

pub fn set_first_node(reader: &MockMemoryReader, node: u64) {
    reader.write_u64(ROOT, node);
}

/// Nodes `0..ids.len()` linked left-to-right, each with a valid entity.
/// The last node's right link points back to the first.
pub fn write_ring(reader: &MockMemoryReader, ids: &[u32]) {
    let n = ids.len() as u64;
    for (i, &id) in ids.iter().enumerate() {
        let i = i as u64;
        write_node(
            reader,
            node_at(i),
            Node {
                left: if i + 1 < n { node_at(i + 1) } else { 0 },
                parent: if i > 0 { node_at(i - 1) } else { 0 },
                right: if i + 1 == n { node_at(0) } else { 0 },
                id,
                entity: entity_at(i),
            },
        );
        write_entity(reader, entity_at(i), &format!("Metadata/Monsters/M{}", id));
    }
    set_first_node(reader, node_at(0));
}
