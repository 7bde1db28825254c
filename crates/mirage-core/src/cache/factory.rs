use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::cached::Cached;
use super::clock::FrameClock;
use crate::config::MemoryConfig;
use crate::memory::{
    Address, ArrayCursor, ArrayHandle, FromRecord, ReadMemory, ReadMemoryExt, Record,
    RecordLayout, SharedReader, TextEncoding,
};

/// An address that can be rebound in place. Views built on it follow the rebinding.
#[derive(Debug, Clone, Default)]
pub struct TrackedAddress(Arc<AtomicU64>);

impl TrackedAddress {
    pub fn new(address: Address) -> Self {
        Self(Arc::new(AtomicU64::new(address.value())))
    }

    pub fn get(&self) -> Address {
        Address::new(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, address: Address) {
        self.0.store(address.value(), Ordering::Release);
    }

    pub fn clear(&self) {
        self.set(Address::NULL);
    }
}

/// Builds [`Cached`] views that read through one shared reader and clock
#[derive(Clone)]
pub struct ViewFactory {
    reader: SharedReader,
    clock: FrameClock,
    max_array_entries: usize,
    max_text_len: usize,
}

impl ViewFactory {
    pub fn new(reader: SharedReader, clock: FrameClock, config: &MemoryConfig) -> Self {
        Self {
            reader,
            clock,
            max_array_entries: config.max_array_entries,
            max_text_len: config.max_text_len,
        }
    }

    pub fn reader(&self) -> &SharedReader {
        &self.reader
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Ceiling applied to every text read built by this factory
    pub fn max_text_len(&self) -> usize {
        self.max_text_len
    }

    /// A view over an arbitrary producer
    pub fn view<T, F>(&self, producer: F) -> Cached<T>
    where
        T: Clone + Default + 'static,
        F: Fn(&dyn ReadMemory) -> Option<T> + Send + Sync + 'static,
    {
        let reader = Arc::clone(&self.reader);
        Cached::new(self.clock.clone(), move || producer(reader.as_ref()))
    }

    /// A view whose address is read from `address` on every production
    pub fn tracked_view<T, F>(&self, address: TrackedAddress, producer: F) -> Cached<T>
    where
        T: Clone + Default + 'static,
        F: Fn(&dyn ReadMemory, Address) -> Option<T> + Send + Sync + 'static,
    {
        self.view(move |reader| {
            let current = address.get();
            if current.is_null() {
                return None;
            }
            producer(reader, current)
        })
    }

    pub fn record_view(&self, address: Address, layout: RecordLayout) -> Cached<Option<Record>> {
        self.view(move |reader| reader.read_record(address, &layout).ok().map(Some))
    }

    pub fn struct_view<T>(&self, address: Address, layout: RecordLayout) -> Cached<T>
    where
        T: FromRecord + Clone + Default + 'static,
    {
        self.view(move |reader| reader.read_struct::<T>(address, &layout).ok())
    }

    /// `max_len` is capped at the configured `max_text_len`
    pub fn text_view(&self, address: Address, encoding: TextEncoding, max_len: usize) -> Cached<String> {
        let max_len = max_len.min(self.max_text_len);
        self.view(move |reader| reader.read_text(address, encoding, max_len).ok())
    }

    /// Record addresses of the array whose handle is stored at `handle_address`
    pub fn array_view(&self, handle_address: Address, record_size: usize) -> Cached<Vec<Address>> {
        let max_entries = self.max_array_entries;
        self.view(move |reader| {
            let handle = ArrayHandle::read(reader, handle_address).ok()?;
            let cursor = ArrayCursor::new(handle, record_size, max_entries, &reader.window());
            Some(cursor.iter().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FrameDriver;
    use crate::memory::{MockMemoryBuilder, MockMemoryReader, PrimitiveKind};

    fn factory(reader: Arc<MockMemoryReader>, driver: &FrameDriver) -> ViewFactory {
        ViewFactory::new(reader, driver.clock(), &MemoryConfig::default())
    }

    #[test]
    fn test_record_view_rereads_after_frame() {
        let reader = Arc::new(MockMemoryBuilder::new().write_u32(0x2000_0000, 1).build());
        let driver = FrameDriver::new();
        let views = factory(Arc::clone(&reader), &driver);
        let layout = RecordLayout::new("Counter").field("value", 0, PrimitiveKind::U32);
        let view = views.record_view(Address::new(0x2000_0000), layout);

        let value = |v: &Cached<Option<Record>>| v.get().map(|r| r.u32("value").unwrap());
        assert_eq!(value(&view), Some(1));

        reader.write_u32(0x2000_0000, 2);
        assert_eq!(value(&view), Some(1));

        driver.advance();
        assert_eq!(value(&view), Some(2));

        reader.unmap(0x2000_0000, 4);
        driver.advance();
        assert_eq!(value(&view), None);
    }

    #[test]
    fn test_tracked_view_follows_rebinding() {
        let reader = Arc::new(
            MockMemoryBuilder::new()
                .write_u32(0x2000_0000, 10)
                .write_u32(0x3000_0000, 20)
                .build(),
        );
        let driver = FrameDriver::new();
        let views = factory(reader, &driver);
        let address = TrackedAddress::new(Address::new(0x2000_0000));
        let view = views.tracked_view(address.clone(), |reader, at| reader.read_u32(at).ok());

        assert_eq!(view.get(), 10);
        address.set(Address::new(0x3000_0000));
        view.flush();
        assert_eq!(view.get(), 20);

        address.clear();
        driver.advance();
        assert_eq!(view.get(), 0);
    }

    #[test]
    fn test_array_view() {
        let reader = Arc::new(
            MockMemoryBuilder::new()
                .write_u64(0x2000_0000, 0x2100_0000)
                .write_u64(0x2000_0008, 0x2100_0030)
                .build(),
        );
        let driver = FrameDriver::new();
        let view = factory(reader, &driver).array_view(Address::new(0x2000_0000), 0x10);
        assert_eq!(
            view.get(),
            vec![
                Address::new(0x2100_0000),
                Address::new(0x2100_0010),
                Address::new(0x2100_0020)
            ]
        );
    }

    #[test]
    fn test_text_view() {
        let reader = Arc::new(
            MockMemoryBuilder::new()
                .write_bytes(0x2000_0000, b"Metadata/Monster\0")
                .build(),
        );
        let driver = FrameDriver::new();
        let view = factory(reader, &driver).text_view(Address::new(0x2000_0000), TextEncoding::Utf8, 17);
        assert_eq!(view.get(), "Metadata/Monster");
    }

    #[test]
    fn test_text_view_capped_by_config() {
        let reader = Arc::new(
            MockMemoryBuilder::new()
                .write_bytes(0x2000_0000, b"Metadata/Monster\0")
                .build(),
        );
        let driver = FrameDriver::new();
        let config = MemoryConfig {
            max_text_len: 8,
            ..MemoryConfig::default()
        };
        let views = ViewFactory::new(reader, driver.clock(), &config);
        assert_eq!(views.max_text_len(), 8);

        let view = views.text_view(Address::new(0x2000_0000), TextEncoding::Utf8, 17);
        assert_eq!(view.get(), "Metadata");
    }
}
