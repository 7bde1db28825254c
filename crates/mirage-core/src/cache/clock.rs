//! Frame counter shared by every cache
//!
//! [`FrameDriver`] is the only writer; it is held by whatever loop owns the
//! application tick. Everything else gets a [`FrameClock`], which can read the
//! counter and wait for it to move but cannot advance it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ClockInner {
    frame: AtomicI64,
    lock: Mutex<()>,
    tick: Condvar,
}

/// Read-only handle to the frame counter
#[derive(Debug, Clone)]
pub struct FrameClock {
    inner: Arc<ClockInner>,
}

impl FrameClock {
    pub fn current(&self) -> i64 {
        self.inner.frame.load(Ordering::Acquire)
    }

    /// Block until the counter moves past `frame` or `timeout` elapses.
    ///
    /// Returns the frame observed on wake-up, which equals `frame` on timeout.
    pub fn wait_for_frame_after(&self, frame: i64, timeout: Duration) -> i64 {
        let deadline = Instant::now() + timeout;
        let Ok(mut guard) = self.inner.lock.lock() else {
            return self.current();
        };
        loop {
            let now = self.current();
            if now > frame {
                return now;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return now;
            }
            match self.inner.tick.wait_timeout(guard, remaining) {
                Ok((next, _)) => guard = next,
                Err(_) => return self.current(),
            }
        }
    }
}

/// The single writer of the frame counter
#[derive(Debug, Default)]
pub struct FrameDriver {
    inner: Arc<ClockInner>,
}

impl FrameDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(&self) -> FrameClock {
        FrameClock {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn current(&self) -> i64 {
        self.inner.frame.load(Ordering::Acquire)
    }

    /// Start the next frame and wake anything waiting on a frame boundary
    pub fn advance(&self) -> i64 {
        let frame = {
            let _guard = self.inner.lock.lock();
            self.inner.frame.fetch_add(1, Ordering::AcqRel) + 1
        };
        self.inner.tick.notify_all();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_advance_is_monotonic() {
        let driver = FrameDriver::new();
        let clock = driver.clock();
        assert_eq!(clock.current(), 0);
        assert_eq!(driver.advance(), 1);
        assert_eq!(driver.advance(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn test_wait_times_out_without_advance() {
        let driver = FrameDriver::new();
        let clock = driver.clock();
        let start = Instant::now();
        assert_eq!(clock.wait_for_frame_after(0, Duration::from_millis(30)), 0);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_returns_immediately_when_already_past() {
        let driver = FrameDriver::new();
        driver.advance();
        let start = Instant::now();
        assert_eq!(driver.clock().wait_for_frame_after(0, Duration::from_secs(10)), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_wakes_on_advance() {
        let driver = FrameDriver::new();
        let clock = driver.clock();

        let waiter = thread::spawn(move || {
            let start = Instant::now();
            (clock.wait_for_frame_after(0, Duration::from_secs(10)), start.elapsed())
        });
        thread::sleep(Duration::from_millis(50));
        driver.advance();

        let (frame, elapsed) = waiter.join().unwrap();
        assert_eq!(frame, 1);
        assert!(elapsed < Duration::from_secs(1));
    }
}
