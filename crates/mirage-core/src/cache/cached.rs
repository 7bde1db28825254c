//! Frame-memoized views over foreign memory

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::clock::FrameClock;

type Producer<T> = Arc<dyn Fn() -> Option<T> + Send + Sync>;

/// Frame value of an entry that has never been computed, or was flushed
const STALE: i64 = -1;
/// Frame value of a disposed entry; no clock ever reaches it
const DISPOSED: i64 = i64::MAX;

struct Slot<T> {
    value: T,
    last_frame: i64,
    producer: Option<Producer<T>>,
}

/// A value re-derived from foreign memory at most once per frame.
///
/// The producer runs outside the entry lock, so two threads touching a stale
/// entry in the same frame may both run it. Both store a value from the same
/// frame's memory.
pub struct Cached<T> {
    clock: FrameClock,
    slot: Mutex<Slot<T>>,
}

impl<T: Clone + Default> Cached<T> {
    pub fn new<F>(clock: FrameClock, producer: F) -> Self
    where
        F: Fn() -> Option<T> + Send + Sync + 'static,
    {
        Self {
            clock,
            slot: Mutex::new(Slot {
                value: T::default(),
                last_frame: STALE,
                producer: Some(Arc::new(producer)),
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current value, recomputed if the clock has moved since the last computation.
    ///
    /// A failed production stores `T::default()` and is not retried until the next frame.
    pub fn get(&self) -> T {
        let frame = self.clock.current();
        let producer = {
            let slot = self.slot();
            if slot.last_frame >= frame {
                return slot.value.clone();
            }
            match &slot.producer {
                Some(producer) => Arc::clone(producer),
                None => return slot.value.clone(),
            }
        };

        let value = producer().unwrap_or_default();

        let mut slot = self.slot();
        // Disposed while producing
        if slot.last_frame == DISPOSED {
            return slot.value.clone();
        }
        slot.value = value.clone();
        slot.last_frame = frame;
        value
    }

    /// Force the next [`get`](Self::get) to recompute
    pub fn flush(&self) {
        let mut slot = self.slot();
        if slot.last_frame != DISPOSED {
            slot.last_frame = STALE;
        }
    }

    /// Drop the producer and value. Later reads return `T::default()` without producing.
    pub fn dispose(&self) {
        let mut slot = self.slot();
        slot.producer = None;
        slot.value = T::default();
        slot.last_frame = DISPOSED;
    }

    pub fn is_disposed(&self) -> bool {
        self.slot().last_frame == DISPOSED
    }

    /// Frame of the last computation, `-1` if none is current
    pub fn last_frame(&self) -> i64 {
        self.slot().last_frame
    }
}

impl<T> fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last_frame = self
            .slot
            .lock()
            .map(|slot| slot.last_frame)
            .unwrap_or(STALE);
        f.debug_struct("Cached")
            .field("last_frame", &last_frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FrameDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        clock: FrameClock,
        result: Option<u32>,
    ) -> (Cached<u32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cached = Cached::new(clock, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u32;
            result.map(|v| v + n)
        });
        (cached, calls)
    }

    #[test]
    fn test_one_production_per_frame() {
        let driver = FrameDriver::new();
        let (cached, calls) = counting(driver.clock(), Some(100));

        assert_eq!(cached.get(), 100);
        assert_eq!(cached.get(), 100);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        driver.advance();
        assert_eq!(cached.get(), 101);
        assert_eq!(cached.get(), 101);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fresh_entry_is_due_on_frame_zero() {
        let driver = FrameDriver::new();
        let (cached, _) = counting(driver.clock(), Some(7));
        assert_eq!(cached.last_frame(), -1);
        assert_eq!(cached.get(), 7);
        assert_eq!(cached.last_frame(), 0);
    }

    #[test]
    fn test_failure_stores_default_until_next_frame() {
        let driver = FrameDriver::new();
        let (cached, calls) = counting(driver.clock(), None);

        assert_eq!(cached.get(), 0);
        assert_eq!(cached.get(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        driver.advance();
        cached.get();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_forces_recompute() {
        let driver = FrameDriver::new();
        let (cached, calls) = counting(driver.clock(), Some(10));

        assert_eq!(cached.get(), 10);
        cached.flush();
        assert_eq!(cached.get(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispose_is_safe_noop() {
        let driver = FrameDriver::new();
        let (cached, calls) = counting(driver.clock(), Some(5));
        assert_eq!(cached.get(), 5);

        cached.dispose();
        assert!(cached.is_disposed());
        driver.advance();
        assert_eq!(cached.get(), 0);
        cached.flush();
        assert_eq!(cached.get(), 0);
        cached.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
