//! Runtime configuration
//!
//! Every value has a default, so a missing or partial TOML file still yields a
//! usable [`Config`]. The per-version struct layouts are not configuration;
//! they live in the layout descriptor (see [`crate::offset::LayoutDescriptor`]).

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::AddressWindow;

/// Defaults for the foreign-memory accessor
pub mod memory {
    /// Lowest plausible user-space address (exclusive). Small integers misread
    /// as pointers fall below this.
    pub const MIN_ADDRESS: u64 = 0x0000_0000_0001_0000;
    /// Highest plausible user-space address (exclusive). Kernel-space values fall above this.
    pub const MAX_ADDRESS: u64 = 0x0000_7FFF_FFFF_FFFF;
    /// Arrays claiming more records than this are treated as corrupt
    pub const MAX_ARRAY_ENTRIES: usize = 100_000;
    /// Upper bound for a single text read (bytes)
    pub const MAX_TEXT_LEN: usize = 512;
    /// Upper bound for one decoded record (1MB). Larger layouts are rejected.
    pub const MAX_RECORD_SIZE: usize = 1024 * 1024;
}

/// Defaults for the entity graph walker
pub mod walker {
    use std::time::Duration;

    /// Hard cap on nodes visited per walk cycle
    pub const MAX_VISITED_NODES: usize = 10_000;
    /// Bounded wait for the next frame before walking anyway
    pub const FRAME_WAIT: Duration = Duration::from_millis(100);
    /// Sleep between attachment checks while idle
    pub const IDLE_POLL: Duration = Duration::from_millis(500);
    /// Entity ids at or above this value are invalid
    pub const MAX_ENTITY_ID: u32 = u32::MAX;
}

/// Defaults for attaching to a process
pub mod attach {
    use std::time::Duration;

    /// Delay between failed attach attempts
    pub const RETRY_DELAY: Duration = Duration::from_secs(2);
    /// Chunk size for reading the executable image (1MB)
    pub const SCAN_CHUNK_SIZE: usize = 1024 * 1024;
    /// Upper bound on the image bytes read for scanning (256MB)
    pub const MAX_IMAGE_SIZE: usize = 256 * 1024 * 1024;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub memory: MemoryConfig,
    pub walker: WalkerConfig,
    pub attach: AttachConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub min_address: u64,
    pub max_address: u64,
    pub max_array_entries: usize,
    pub max_text_len: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            min_address: memory::MIN_ADDRESS,
            max_address: memory::MAX_ADDRESS,
            max_array_entries: memory::MAX_ARRAY_ENTRIES,
            max_text_len: memory::MAX_TEXT_LEN,
        }
    }
}

impl MemoryConfig {
    pub fn window(&self) -> AddressWindow {
        AddressWindow::new(self.min_address, self.max_address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    pub max_visited_nodes: usize,
    pub frame_wait_ms: u64,
    pub idle_poll_ms: u64,
    pub max_entity_id: u32,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_visited_nodes: walker::MAX_VISITED_NODES,
            frame_wait_ms: walker::FRAME_WAIT.as_millis() as u64,
            idle_poll_ms: walker::IDLE_POLL.as_millis() as u64,
            max_entity_id: walker::MAX_ENTITY_ID,
        }
    }
}

impl WalkerConfig {
    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    pub retry_delay_ms: u64,
    pub scan_chunk_size: usize,
    pub max_image_size: usize,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: attach::RETRY_DELAY.as_millis() as u64,
            scan_chunk_size: attach::SCAN_CHUNK_SIZE,
            max_image_size: attach::MAX_IMAGE_SIZE,
        }
    }
}

impl AttachConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
