//! Sparse in-memory address space for tests

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use super::address::{Address, AddressWindow};
use super::reader::ReadMemory;
use crate::error::{Error, Result};

/// Byte-granular fake process memory. Regions can be rewritten or unmapped
/// between reads to simulate a mutating foreign process.
pub struct MockMemoryReader {
    bytes: RwLock<BTreeMap<u64, u8>>,
    /// Transfers attempted, keyed by start address
    reads: Mutex<HashMap<u64, usize>>,
    base_address: Address,
    image_size: usize,
    window: AddressWindow,
}

impl MockMemoryReader {
    pub fn write_bytes(&self, address: u64, data: &[u8]) {
        let mut bytes = self.bytes.write().unwrap();
        for (i, byte) in data.iter().enumerate() {
            bytes.insert(address + i as u64, *byte);
        }
    }

    pub fn write_u32(&self, address: u64, value: u32) {
        self.write_bytes(address, &value.to_le_bytes());
    }

    pub fn write_u64(&self, address: u64, value: u64) {
        self.write_bytes(address, &value.to_le_bytes());
    }

    /// Number of transfers that started at `address`
    pub fn reads_at(&self, address: u64) -> usize {
        self.reads.lock().unwrap().get(&address).copied().unwrap_or(0)
    }

    /// Unmap `len` bytes starting at `address`
    pub fn unmap(&self, address: u64, len: usize) {
        let mut bytes = self.bytes.write().unwrap();
        for i in 0..len as u64 {
            bytes.remove(&(address + i));
        }
    }
}

impl ReadMemory for MockMemoryReader {
    fn read_raw(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
        let start = address.value();
        *self.reads.lock().unwrap().entry(start).or_default() += 1;
        let bytes = self.bytes.read().unwrap();
        for (i, slot) in buffer.iter_mut().enumerate() {
            match bytes.get(&(start + i as u64)) {
                Some(byte) => *slot = *byte,
                None => {
                    return Err(Error::read_failed(
                        start,
                        format!("unmapped byte at offset {}", i),
                    ));
                }
            }
        }
        Ok(())
    }

    fn window(&self) -> AddressWindow {
        self.window
    }

    fn base_address(&self) -> Address {
        self.base_address
    }

    fn image_size(&self) -> usize {
        self.image_size
    }
}

/// Builder for [`MockMemoryReader`]
pub struct MockMemoryBuilder {
    bytes: BTreeMap<u64, u8>,
    base_address: u64,
    image_size: usize,
    window: AddressWindow,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self {
            bytes: BTreeMap::new(),
            base_address: 0x1_4000_0000,
            image_size: 0,
            window: AddressWindow::default(),
        }
    }

    pub fn base_address(mut self, base: u64) -> Self {
        self.base_address = base;
        self
    }

    pub fn window(mut self, window: AddressWindow) -> Self {
        self.window = window;
        self
    }

    /// Map `image` at the base address and use its length as the image size
    pub fn image(mut self, image: &[u8]) -> Self {
        self.image_size = image.len();
        let base = self.base_address;
        self.write_bytes(base, image)
    }

    pub fn write_bytes(mut self, address: u64, data: &[u8]) -> Self {
        for (i, byte) in data.iter().enumerate() {
            self.bytes.insert(address + i as u64, *byte);
        }
        self
    }

    pub fn write_u32(self, address: u64, value: u32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_i32(self, address: u64, value: i32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_u64(self, address: u64, value: u64) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn build(self) -> MockMemoryReader {
        MockMemoryReader {
            bytes: RwLock::new(self.bytes),
            reads: Mutex::new(HashMap::new()),
            base_address: Address::new(self.base_address),
            image_size: self.image_size,
            window: self.window,
        }
    }
}

impl Default for MockMemoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
