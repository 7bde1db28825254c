use std::sync::Arc;

use super::address::{Address, AddressWindow};
use super::process::ProcessHandle;
use super::text::{TextEncoding, decode_text};
use crate::error::{Error, Result};

/// Page granularity used to shorten text reads that straddle unmapped memory
const PAGE_SIZE: u64 = 0x1000;

/// Fail-soft access to a foreign address space.
///
/// Implementors only provide the raw transfer plus the image geometry; the
/// plausibility checks and primitive decoding live in the provided methods so
/// every reader rejects the same addresses.
pub trait ReadMemory: Send + Sync {
    /// Copy `buffer.len()` bytes from `address`. A partial transfer is an error.
    fn read_raw(&self, address: Address, buffer: &mut [u8]) -> Result<()>;

    /// Window of addresses considered plausible
    fn window(&self) -> AddressWindow;

    /// Base address of the loaded executable image
    fn base_address(&self) -> Address;

    /// Size of the loaded executable image in bytes
    fn image_size(&self) -> usize;

    fn is_plausible(&self, address: Address) -> bool {
        self.window().is_plausible(address)
    }

    /// Fill `buffer` from `address`, rejecting null and implausible ranges
    fn read_into(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
        if !self.window().contains_range(address, buffer.len()) {
            return Err(Error::ImplausibleAddress(address.value()));
        }
        if buffer.is_empty() {
            return Ok(());
        }
        self.read_raw(address, buffer)
    }

    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read_into(address, &mut buffer)?;
        Ok(buffer)
    }

    fn read_u8(&self, address: Address) -> Result<u8> {
        read_array::<1, _>(self, address).map(|b| b[0])
    }

    fn read_u16(&self, address: Address) -> Result<u16> {
        read_array(self, address).map(u16::from_le_bytes)
    }

    fn read_u32(&self, address: Address) -> Result<u32> {
        read_array(self, address).map(u32::from_le_bytes)
    }

    fn read_i32(&self, address: Address) -> Result<i32> {
        read_array(self, address).map(i32::from_le_bytes)
    }

    fn read_u64(&self, address: Address) -> Result<u64> {
        read_array(self, address).map(u64::from_le_bytes)
    }

    fn read_i64(&self, address: Address) -> Result<i64> {
        read_array(self, address).map(i64::from_le_bytes)
    }

    fn read_f32(&self, address: Address) -> Result<f32> {
        read_array(self, address).map(f32::from_le_bytes)
    }

    /// Read a pointer-sized value. The result itself is not checked for plausibility.
    fn read_address(&self, address: Address) -> Result<Address> {
        self.read_u64(address).map(Address::new)
    }

    /// Read at most `max_len` bytes of text, truncated at the first terminator.
    ///
    /// If the full run crosses into unreadable memory, the read is retried up
    /// to the end of the page holding `address`.
    fn read_text(&self, address: Address, encoding: TextEncoding, max_len: usize) -> Result<String> {
        let bytes = match self.read_bytes(address, max_len) {
            Ok(bytes) => bytes,
            Err(e) => {
                let to_page_end = (PAGE_SIZE - address.value() % PAGE_SIZE) as usize;
                if to_page_end >= max_len {
                    return Err(e);
                }
                self.read_bytes(address, to_page_end)?
            }
        };
        Ok(decode_text(&bytes, encoding))
    }
}

fn read_array<const N: usize, R: ReadMemory + ?Sized>(reader: &R, address: Address) -> Result<[u8; N]> {
    let mut buffer = [0u8; N];
    reader.read_into(address, &mut buffer)?;
    Ok(buffer)
}

/// Shared, thread-safe reader handle used by caches and the background walker
pub type SharedReader = Arc<dyn ReadMemory>;

impl<R: ReadMemory + ?Sized> ReadMemory for Arc<R> {
    fn read_raw(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
        (**self).read_raw(address, buffer)
    }

    fn window(&self) -> AddressWindow {
        (**self).window()
    }

    fn base_address(&self) -> Address {
        (**self).base_address()
    }

    fn image_size(&self) -> usize {
        (**self).image_size()
    }
}

/// [`ReadMemory`] over a live process
pub struct MemoryReader {
    process: ProcessHandle,
    window: AddressWindow,
}

impl MemoryReader {
    pub fn new(process: ProcessHandle) -> Self {
        Self::with_window(process, AddressWindow::default())
    }

    pub fn with_window(process: ProcessHandle, window: AddressWindow) -> Self {
        Self { process, window }
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }
}

impl ReadMemory for MemoryReader {
    fn read_raw(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
        self.process.read_memory(address, buffer)
    }

    fn window(&self) -> AddressWindow {
        self.window
    }

    fn base_address(&self) -> Address {
        self.process.base_address
    }

    fn image_size(&self) -> usize {
        self.process.image_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MockMemoryBuilder;

    #[test]
    fn test_null_and_out_of_window_reads_fail() {
        let reader = MockMemoryBuilder::new()
            .write_bytes(0x2000_0000, &[1, 2, 3, 4])
            .build();

        for address in [0u64, 0x10, 0xFFFF_8000_0000_0000, u64::MAX] {
            let address = Address::new(address);
            assert!(reader.read_bytes(address, 4).is_err());
            assert!(reader.read_u32(address).is_err());
            assert!(reader.read_address(address).is_err());
        }
    }

    #[test]
    fn test_unmapped_and_partial_reads_fail() {
        let reader = MockMemoryBuilder::new()
            .write_bytes(0x2000_0000, &[1, 2, 3, 4])
            .build();

        assert!(reader.read_u32(Address::new(0x3000_0000)).is_err());
        // Starts inside the region but runs past its end
        assert!(reader.read_u64(Address::new(0x2000_0000)).is_err());
        assert_eq!(reader.read_u32(Address::new(0x2000_0000)).unwrap(), 0x0403_0201);
    }

    #[test]
    fn test_zero_length_read_at_plausible_address() {
        let reader = MockMemoryBuilder::new().build();
        assert!(reader.read_bytes(Address::new(0x2000_0000), 0).unwrap().is_empty());
        assert!(reader.read_bytes(Address::NULL, 0).is_err());
    }

    #[test]
    fn test_read_text_retries_to_page_end() {
        // Text sits at the end of a mapped page; a 256 byte read would run off it
        let address = 0x2000_0FF0u64;
        let reader = MockMemoryBuilder::new()
            .write_bytes(address, b"Metadata/Chest\0\0")
            .build();

        let text = reader
            .read_text(Address::new(address), TextEncoding::Utf8, 256)
            .unwrap();
        assert_eq!(text, "Metadata/Chest");
    }

    #[test]
    fn test_read_text_unreadable_fails() {
        let reader = MockMemoryBuilder::new().build();
        assert!(reader
            .read_text(Address::new(0x2000_0000), TextEncoding::Utf8, 16)
            .is_err());
    }

    #[test]
    fn test_shared_reader_delegates() {
        let reader: SharedReader = Arc::new(
            MockMemoryBuilder::new()
                .base_address(0x1_4000_0000)
                .write_u64(0x2000_0000, 0xDEAD_BEEF)
                .build(),
        );
        let shared = Arc::clone(&reader);
        assert_eq!(shared.base_address(), Address::new(0x1_4000_0000));
        assert_eq!(shared.read_u64(Address::new(0x2000_0000)).unwrap(), 0xDEAD_BEEF);
    }
}
