use std::fmt;

use serde::{Deserialize, Serialize};

/// An address in the foreign process.
///
/// Never dereferenced locally; every access goes through [`super::ReadMemory`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(u64);

impl Address {
    pub const NULL: Address = Address(0);
    /// Reserved "out of plausible range" sentinel
    pub const INVALID: Address = Address(u64::MAX);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Neither of the reserved "no address" values
    pub const fn is_set(self) -> bool {
        self.0 != 0 && self.0 != u64::MAX
    }

    pub fn offset(self, delta: i64) -> Self {
        Self(self.0.wrapping_add_signed(delta))
    }

    pub fn add(self, delta: u64) -> Self {
        Self(self.0.wrapping_add(delta))
    }

    /// Byte distance from `base` to `self`, `None` if `self` is below `base`
    pub fn distance_from(self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Address> for u64 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

/// Range of addresses that could plausibly point at user-space data.
///
/// Both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressWindow {
    pub min: u64,
    pub max: u64,
}

impl AddressWindow {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, address: u64) -> bool {
        address > self.min && address < self.max
    }

    pub fn is_plausible(&self, address: Address) -> bool {
        address.is_set() && self.contains(address.value())
    }

    /// Whether `[address, address + len)` lies entirely inside the window
    pub fn contains_range(&self, address: Address, len: usize) -> bool {
        if !self.is_plausible(address) {
            return false;
        }
        if len == 0 {
            return true;
        }
        match address.value().checked_add(len as u64 - 1) {
            Some(last) => self.contains(last),
            None => false,
        }
    }
}

impl Default for AddressWindow {
    fn default() -> Self {
        Self::new(
            crate::config::memory::MIN_ADDRESS,
            crate::config::memory::MAX_ADDRESS,
        )
    }
}
