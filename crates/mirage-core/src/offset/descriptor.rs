//! Layout descriptor: the per-build offsets and struct shapes of the foreign process

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::signature::AnchorSignature;
use crate::entity::EntityGraphLayout;
use crate::error::{Error, Result};
use crate::memory::RecordLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    /// Build of the foreign process this descriptor matches
    pub version: String,
    pub anchor: AnchorSignature,
    /// Additional named record layouts for consumer views
    #[serde(default)]
    pub records: BTreeMap<String, RecordLayout>,
    pub entity_graph: EntityGraphLayout,
}

impl LayoutDescriptor {
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(Error::InvalidLayout("descriptor version is empty".to_string()));
        }
        self.anchor.pattern_bytes()?;
        for layout in self.records.values() {
            layout.validate()?;
        }
        self.entity_graph.validate()
    }

    /// Look up a record layout by name, ignoring ASCII case
    pub fn record(&self, name: &str) -> Option<&RecordLayout> {
        self.records.get(name).or_else(|| {
            self.records
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, layout)| layout)
        })
    }
}

/// Load and validate a descriptor from a JSON file
pub fn load_layout<P: AsRef<Path>>(path: P) -> Result<LayoutDescriptor> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let descriptor: LayoutDescriptor = serde_json::from_str(&content)?;
    descriptor.validate()?;
    debug!(
        "Loaded layout descriptor {} ({} records) from {}",
        descriptor.version,
        descriptor.records.len(),
        path.display()
    );
    Ok(descriptor)
}

pub fn save_layout<P: AsRef<Path>>(descriptor: &LayoutDescriptor, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(descriptor)?;
    fs::write(&path, content)?;
    info!("Saved layout descriptor to {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::fixtures;
    use crate::memory::PrimitiveKind;
    use crate::offset::{PointerChain, ResolveStep};

    fn descriptor() -> LayoutDescriptor {
        let mut records = BTreeMap::new();
        records.insert(
            "Life".to_string(),
            RecordLayout::new("Life")
                .field("current", 0x30, PrimitiveKind::I32)
                .field("max", 0x2C, PrimitiveKind::I32),
        );
        LayoutDescriptor {
            version: "3.25.1".to_string(),
            anchor: AnchorSignature::new(
                "48 8B 05 ?? ?? ?? ?? 48 85 C0",
                PointerChain::new(vec![
                    ResolveStep::Rel32 {
                        disp_offset: 3,
                        instr_len: Some(7),
                    },
                    ResolveStep::Deref { at: 0 },
                ]),
            ),
            records,
            entity_graph: fixtures::graph_layout(),
        }
    }

    #[test]
    fn test_save_and_load_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        let original = descriptor();

        save_layout(&original, &path).unwrap();
        let loaded = load_layout(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_record_lookup_ignores_case() {
        let descriptor = descriptor();
        assert!(descriptor.record("Life").is_some());
        assert!(descriptor.record("life").is_some());
        assert!(descriptor.record("Mana").is_none());
    }

    #[test]
    fn test_load_rejects_invalid_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");

        let mut bad_pattern = descriptor();
        bad_pattern.anchor.pattern = "48 GG".to_string();
        save_layout(&bad_pattern, &path).unwrap();
        assert!(matches!(load_layout(&path), Err(Error::InvalidPattern(_))));

        let mut no_version = descriptor();
        no_version.version.clear();
        assert!(!no_version.is_valid());
    }

    #[test]
    fn test_load_rejects_oversized_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");

        let mut oversized = descriptor();
        oversized.records.insert(
            "Huge".to_string(),
            RecordLayout::new("Huge").field("tail", usize::MAX - 1, PrimitiveKind::U32),
        );
        save_layout(&oversized, &path).unwrap();
        assert!(matches!(load_layout(&path), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_layout(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}
