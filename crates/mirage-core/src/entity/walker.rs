//! Background thread driving [`EntityGraph::walk_once`]

use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use super::graph::EntityGraph;
use crate::cache::{FrameClock, ViewFactory};
use crate::config::WalkerConfig;
use crate::error::Result;
use crate::memory::Address;
use crate::shutdown::ShutdownSignal;

/// What the walker reads from while attached
#[derive(Clone)]
pub struct WalkTarget {
    pub views: ViewFactory,
    /// Anchor root address
    pub root: Address,
}

/// Current attachment, `None` while detached.
///
/// The walker holds the read lock for a whole cycle, so taking the write lock
/// waits out any cycle still running against the previous target.
pub type SharedTarget = Arc<RwLock<Option<WalkTarget>>>;

pub struct Walker {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<ShutdownSignal>,
}

impl Walker {
    pub fn spawn(
        graph: Arc<EntityGraph>,
        target: SharedTarget,
        clock: FrameClock,
        config: WalkerConfig,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<Self> {
        let signal = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("entity-walker".to_string())
            .spawn(move || run_loop(&graph, &target, &clock, &config, &signal))?;
        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal shutdown and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Entity walker thread panicked");
            }
        }
    }
}

impl Drop for Walker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run_loop(
    graph: &EntityGraph,
    target: &SharedTarget,
    clock: &FrameClock,
    config: &WalkerConfig,
    shutdown: &ShutdownSignal,
) {
    info!("Entity walker started");
    let mut last_frame = clock.current() - 1;

    while !shutdown.is_shutdown() {
        let attached = target.read().map(|t| t.is_some()).unwrap_or(false);
        if !attached {
            if shutdown.wait(config.idle_poll()) {
                break;
            }
            continue;
        }

        // At most one cycle per frame, but keep walking if frames stop
        last_frame = clock.wait_for_frame_after(last_frame, config.frame_wait());
        if shutdown.is_shutdown() {
            break;
        }

        let Ok(guard) = target.read() else {
            break;
        };
        if let Some(current) = guard.as_ref() {
            let stats = graph.walk_once(&current.views, current.root);
            debug!(
                "Walk cycle: {} nodes, {} entities, +{} -{}",
                stats.visited, stats.discovered, stats.added, stats.removed
            );
        }
    }

    info!("Entity walker stopped");
}
