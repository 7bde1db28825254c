use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to an entity by the foreign process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl EntityId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Zero and everything at or above `max` are reserved
    pub fn is_valid(self, max: u32) -> bool {
        self.0 != 0 && self.0 < max
    }

    /// Narrow a raw decoded id, rejecting reserved values
    pub fn from_raw(raw: u64, max: u32) -> Option<Self> {
        let id = u32::try_from(raw).ok().map(Self)?;
        id.is_valid(max).then_some(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
