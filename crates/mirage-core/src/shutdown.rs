//! Cooperative stop flag with interruptible sleeps

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Stop flag shared by the entity walker, the CLI loops and the Ctrl-C handler.
///
/// [`wait`](Self::wait) replaces `thread::sleep()` in those loops and returns
/// early once [`trigger`](Self::trigger) is called. A poisoned lock reads as
/// stopped.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Option<MutexGuard<'_, bool>> {
        self.stopped.lock().ok()
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        if let Some(mut stopped) = self.lock() {
            *stopped = true;
        }
        self.wake.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().is_none_or(|stopped| *stopped)
    }

    /// Sleep up to `duration`. Returns `true` if shutdown was triggered
    /// before or during the wait.
    pub fn wait(&self, duration: Duration) -> bool {
        let Some(guard) = self.lock() else {
            return true;
        };
        match self
            .wake
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
        {
            Ok((stopped, _)) => *stopped,
            Err(_) => true,
        }
    }
}
