use std::fs;
use std::path::Path;

use serde::Serialize;

use super::anchor::Anchor;
use super::scanner::MatchQuality;
use crate::error::Result;
use crate::memory::{Address, ReadMemory};

const SAMPLE_LEN: usize = 32;

/// Anchor dump for diagnostic purposes
#[derive(Debug, Clone, Serialize)]
pub struct AnchorDump {
    pub layout_version: String,
    pub base_address: String,
    pub image_size: String,
    pub anchor: AnchorValues,
    pub relations: AnchorRelations,
    pub quality: MatchQuality,
    pub memory_samples: MemorySamples,
}

/// Anchor addresses in hex string format
#[derive(Debug, Clone, Serialize)]
pub struct AnchorValues {
    pub match_address: String,
    pub root: String,
}

/// Signed distances between the anchor addresses, in bytes
#[derive(Debug, Clone, Serialize)]
pub struct AnchorRelations {
    pub match_from_base: i64,
    pub root_from_base: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySamples {
    pub match_32bytes: String,
    pub root_32bytes: String,
}

impl AnchorDump {
    pub fn from_anchor<R: ReadMemory + ?Sized>(layout_version: &str, anchor: &Anchor, reader: &R) -> Self {
        let base = reader.base_address();
        Self {
            layout_version: layout_version.to_string(),
            base_address: format!("0x{:X}", base.value()),
            image_size: format!("0x{:X}", reader.image_size()),
            anchor: AnchorValues {
                match_address: format!("0x{:X}", anchor.match_address.value()),
                root: format!("0x{:X}", anchor.root.value()),
            },
            relations: AnchorRelations {
                match_from_base: anchor.match_address.value() as i64 - base.value() as i64,
                root_from_base: anchor.root.value() as i64 - base.value() as i64,
            },
            quality: anchor.quality,
            memory_samples: MemorySamples {
                match_32bytes: Self::read_memory_hex(reader, anchor.match_address, SAMPLE_LEN),
                root_32bytes: Self::read_memory_hex(reader, anchor.root, SAMPLE_LEN),
            },
        }
    }

    fn read_memory_hex<R: ReadMemory + ?Sized>(reader: &R, address: Address, size: usize) -> String {
        if address.is_null() {
            return "(address is 0)".to_string();
        }

        match reader.read_bytes(address, size) {
            Ok(bytes) => bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" "),
            Err(_) => "(read failed)".to_string(),
        }
    }

    /// Save dump to JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
