//! Decoder for packed, bucketed name -> slot lookup tables
//!
//! The table is an array of buckets. Each bucket holds a group of control
//! bytes followed by the same number of `(name pointer, slot index)` entries;
//! a control byte equal to the empty marker means the entry is unused. Only
//! the structure is decoded. The hash that places names into buckets is not
//! modelled, so lookups scan every occupied entry.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::address::Address;
use super::array::{ArrayCursor, ArrayHandle};
use super::reader::ReadMemory;
use super::text::TextEncoding;
use crate::config::memory::MAX_RECORD_SIZE;
use crate::error::{Error, Result};

/// Capability that turns a foreign lookup table into `(name, slot)` pairs
pub trait ForeignMapDecoder: Send + Sync {
    /// Decode the table whose array handle is stored at `address`.
    /// Unreadable buckets or names are skipped.
    fn decode(&self, reader: &dyn ReadMemory, address: Address, max_entries: usize)
    -> Vec<(String, usize)>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketMapLayout {
    /// Control bytes (and entries) per bucket
    pub group_width: usize,
    pub entry_stride: usize,
    pub name_offset: usize,
    pub index_offset: usize,
    pub empty_control: u8,
    pub name_encoding: TextEncoding,
    pub name_max_len: usize,
}

impl Default for BucketMapLayout {
    fn default() -> Self {
        Self {
            group_width: 8,
            entry_stride: 16,
            name_offset: 0,
            index_offset: 8,
            empty_control: 0xFF,
            name_encoding: TextEncoding::Utf8,
            name_max_len: 64,
        }
    }
}

impl BucketMapLayout {
    /// Control bytes plus entries. Saturates to `usize::MAX` on overflow.
    pub fn bucket_size(&self) -> usize {
        self.group_width
            .checked_mul(self.entry_stride)
            .and_then(|entries| entries.checked_add(self.group_width))
            .unwrap_or(usize::MAX)
    }

    /// Entries must hold their name pointer and slot index, and a bucket must stay under [`MAX_RECORD_SIZE`]
    pub fn validate(&self) -> Result<()> {
        if self.group_width == 0 || self.entry_stride == 0 {
            return Err(Error::InvalidLayout(
                "bucket group_width and entry_stride must be positive".to_string(),
            ));
        }
        let fits = |offset: usize, width: usize| {
            offset
                .checked_add(width)
                .is_some_and(|end| end <= self.entry_stride)
        };
        if !fits(self.name_offset, 8) || !fits(self.index_offset, 4) {
            return Err(Error::InvalidLayout(format!(
                "bucket entry fields at {:#x}/{:#x} do not fit a {} byte stride",
                self.name_offset, self.index_offset, self.entry_stride
            )));
        }
        if self.bucket_size() > MAX_RECORD_SIZE {
            return Err(Error::InvalidLayout(format!(
                "bucket of {} x {} bytes exceeds {} bytes",
                self.group_width, self.entry_stride, MAX_RECORD_SIZE
            )));
        }
        Ok(())
    }

    fn decode_bucket(&self, reader: &dyn ReadMemory, bucket: &[u8], out: &mut Vec<(String, usize)>) {
        let (controls, entries) = bucket.split_at(self.group_width);
        for (slot, control) in controls.iter().enumerate() {
            if *control == self.empty_control {
                continue;
            }
            let Some(base) = slot.checked_mul(self.entry_stride) else {
                continue;
            };
            let field = |offset: usize, width: usize| {
                let start = base.checked_add(offset)?;
                entries.get(start..start.checked_add(width)?)
            };
            let (Some(name_bytes), Some(index_bytes)) =
                (field(self.name_offset, 8), field(self.index_offset, 4))
            else {
                continue;
            };

            let name_ptr = Address::new(u64::from_le_bytes(name_bytes.try_into().unwrap_or([0; 8])));
            let index = u32::from_le_bytes(index_bytes.try_into().unwrap_or([0; 4]));
            match reader.read_text(name_ptr, self.name_encoding, self.name_max_len) {
                Ok(name) if !name.is_empty() => out.push((name, index as usize)),
                Ok(_) => {}
                Err(e) => debug!("Skipping lookup entry with unreadable name at {}: {}", name_ptr, e),
            }
        }
    }
}

impl ForeignMapDecoder for BucketMapLayout {
    fn decode(
        &self,
        reader: &dyn ReadMemory,
        address: Address,
        max_entries: usize,
    ) -> Vec<(String, usize)> {
        if let Err(e) = self.validate() {
            debug!("Lookup table layout rejected: {}", e);
            return Vec::new();
        }
        let handle = match ArrayHandle::read(reader, address) {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Lookup table handle unreadable at {}: {}", address, e);
                return Vec::new();
            }
        };
        let cursor = ArrayCursor::new(handle, self.bucket_size(), max_entries, &reader.window());

        let mut entries = Vec::new();
        for bucket_addr in cursor.iter() {
            match reader.read_bytes(bucket_addr, self.bucket_size()) {
                Ok(bucket) => self.decode_bucket(reader, &bucket, &mut entries),
                Err(e) => debug!("Skipping unreadable bucket at {}: {}", bucket_addr, e),
            }
        }
        entries
    }
}
