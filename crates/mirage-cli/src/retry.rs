//! Retry utilities for attaching to the target.

use anyhow::Result;
use mirage_core::{Anchor, Mirror, ShutdownSignal};
use tracing::{debug, info};

use crate::commands::ProcessSelector;

/// Open the target and attach the mirror, retrying until it succeeds.
///
/// The target may not be running yet, or may still be initializing so the
/// anchor pattern is not resolvable. Returns `Ok(None)` if shutdown was
/// signaled while waiting.
pub fn attach_with_retry(
    mirror: &Mirror,
    selector: &ProcessSelector,
    shutdown: &ShutdownSignal,
) -> Result<Option<Anchor>> {
    let delay = mirror.config().attach.retry_delay();
    let mut attempts = 0u32;

    loop {
        if shutdown.is_shutdown() {
            return Ok(None);
        }
        attempts += 1;

        match selector.open() {
            Ok(process) => match mirror.attach_process(process) {
                Ok(anchor) => {
                    info!("Attached after {} attempt(s)", attempts);
                    return Ok(Some(anchor));
                }
                Err(e) => {
                    info!(
                        "Anchor not resolvable ({}), retrying in {}s (attempt {})",
                        e,
                        delay.as_secs(),
                        attempts
                    );
                }
            },
            Err(e) => {
                debug!("Target {} not available: {}", selector.describe(), e);
            }
        }

        // Wait before retry (interruptible)
        if shutdown.wait(delay) {
            return Ok(None);
        }
    }
}
