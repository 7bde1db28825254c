//! Bounded decoding of foreign variable-length arrays
//!
//! Foreign arrays are described by a head/tail pointer pair. The pair comes
//! straight out of memory that may be corrupt or mid-update, so the cursor
//! refuses anything that is not clearly a small, well-formed range and never
//! reads the records itself.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::address::{Address, AddressWindow};
use super::layout::{FromRecord, Record};
use super::reader::ReadMemory;
use crate::error::{Error, Result};

/// `{ head, tail }` bounds of a foreign array, tail exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayHandle {
    pub head: Address,
    pub tail: Address,
}

impl ArrayHandle {
    /// Size of the handle itself in foreign memory
    pub const SIZE: usize = 16;

    pub fn new(head: Address, tail: Address) -> Self {
        Self { head, tail }
    }

    /// Read a handle stored at `address`
    pub fn read<R: ReadMemory + ?Sized>(reader: &R, address: Address) -> Result<Self> {
        let head = reader.read_address(address)?;
        let tail = reader.read_address(address.add(8))?;
        Ok(Self::new(head, tail))
    }

    /// Both bounds plausible and `tail >= head`
    pub fn is_valid(&self, window: &AddressWindow) -> bool {
        window.is_plausible(self.head) && window.is_plausible(self.tail) && self.tail >= self.head
    }

    pub fn byte_len(&self) -> u64 {
        self.tail.value().saturating_sub(self.head.value())
    }
}

impl FromRecord for ArrayHandle {
    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self::new(record.pointer("head")?, record.pointer("tail")?))
    }
}

/// Lazily-iterated view of an [`ArrayHandle`] as fixed-size records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayCursor {
    handle: ArrayHandle,
    record_size: usize,
    count: usize,
}

impl ArrayCursor {
    pub fn new(
        handle: ArrayHandle,
        record_size: usize,
        max_entries: usize,
        window: &AddressWindow,
    ) -> Self {
        let count = Self::count_for(&handle, record_size, max_entries, window);
        Self {
            handle,
            record_size,
            count,
        }
    }

    fn count_for(
        handle: &ArrayHandle,
        record_size: usize,
        max_entries: usize,
        window: &AddressWindow,
    ) -> usize {
        if record_size == 0 || !handle.is_valid(window) {
            return 0;
        }
        let count = handle.byte_len() / record_size as u64;
        if count > max_entries as u64 {
            warn!(
                "Array at {} claims {} records of {} bytes (max {}), treating as corrupt",
                handle.head, count, record_size, max_entries
            );
            return 0;
        }
        count as usize
    }

    pub fn handle(&self) -> ArrayHandle {
        self.handle
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn item_count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn record_address(&self, index: usize) -> Result<Address> {
        if index >= self.count {
            return Err(Error::read_failed(
                self.handle.head.value(),
                format!("index {} out of range 0..{}", index, self.count),
            ));
        }
        Ok(self.handle.head.add((index * self.record_size) as u64))
    }

    /// Addresses of each record, restartable and free of reads
    pub fn iter(&self) -> ArrayIter {
        ArrayIter {
            next: self.handle.head,
            stride: self.record_size as u64,
            remaining: self.count,
        }
    }
}

impl IntoIterator for &ArrayCursor {
    type Item = Address;
    type IntoIter = ArrayIter;

    fn into_iter(self) -> ArrayIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct ArrayIter {
    next: Address,
    stride: u64,
    remaining: usize,
}

impl Iterator for ArrayIter {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next;
        self.next = self.next.add(self.stride);
        self.remaining -= 1;
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ArrayIter {}
