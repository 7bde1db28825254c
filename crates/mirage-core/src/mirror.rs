//! Attachment lifecycle and the consumer-facing entry point
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mirage_core::{Config, FrameDriver, Mirror, ProcessHandle, load_layout};
//!
//! let driver = FrameDriver::new();
//! let mut mirror = Mirror::new(load_layout("layout.json")?, Config::default(), driver.clock());
//! mirror.attach_process(ProcessHandle::find_by_name("target.exe")?)?;
//! mirror.start()?;
//!
//! loop {
//!     driver.advance();
//!     for entity in mirror.entities() {
//!         println!("{} {}", entity.id(), entity.path());
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{Cached, FrameClock, ViewFactory};
use crate::config::Config;
use crate::entity::{
    EntityEvent, EntityGraph, EntityId, EntityWrapper, SharedTarget, WalkStats, WalkTarget, Walker,
};
use crate::error::{Error, Result};
use crate::memory::{Address, MemoryReader, ProcessHandle, ReadMemory, SharedReader};
use crate::offset::{Anchor, LayoutDescriptor, MatchQuality, locate_anchor};
use crate::shutdown::ShutdownSignal;

/// Serializable snapshot of the mirror's state
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub layout_version: String,
    pub attached: bool,
    pub attached_at: Option<DateTime<Utc>>,
    pub anchor: Option<Anchor>,
    pub last_match_quality: Option<MatchQuality>,
    pub tracked_ids: usize,
    pub tracked_addresses: usize,
    pub live_entities: usize,
    pub walk_cycles: u64,
    pub last_visited: usize,
    pub guard_trips: u64,
    pub walker_running: bool,
}

#[derive(Debug, Default)]
struct AttachState {
    anchor: Option<Anchor>,
    attached_at: Option<DateTime<Utc>>,
    last_quality: Option<MatchQuality>,
}

/// Live mirror of the foreign entity graph
pub struct Mirror {
    layout: LayoutDescriptor,
    config: Config,
    clock: FrameClock,
    graph: Arc<EntityGraph>,
    target: SharedTarget,
    state: Mutex<AttachState>,
    walker: Option<Walker>,
    shutdown: Arc<ShutdownSignal>,
}

impl Mirror {
    pub fn new(layout: LayoutDescriptor, config: Config, clock: FrameClock) -> Self {
        let graph = Arc::new(EntityGraph::new(layout.entity_graph.clone(), &config));
        Self {
            layout,
            config,
            clock,
            graph,
            target: Arc::new(RwLock::new(None)),
            state: Mutex::new(AttachState::default()),
            walker: None,
            shutdown: Arc::new(ShutdownSignal::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &LayoutDescriptor {
        &self.layout
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    fn state(&self) -> std::sync::MutexGuard<'_, AttachState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Scan `reader` for the anchor and start mirroring from it.
    ///
    /// Any previous attachment is dropped first, disposing its wrappers. On
    /// failure the mirror stays detached; retrying is up to the caller.
    pub fn attach(&self, reader: SharedReader) -> Result<Anchor> {
        self.detach();

        let mut quality = MatchQuality::default();
        let result = locate_anchor(
            reader.as_ref(),
            &self.layout.anchor,
            &self.config.attach,
            Some(&mut quality),
        );
        self.state().last_quality = Some(quality);
        let anchor = match result {
            Ok(anchor) => anchor,
            Err(e) => {
                warn!("Attach failed: {}", e);
                return Err(e);
            }
        };

        let views = ViewFactory::new(reader, self.clock.clone(), &self.config.memory);
        {
            let mut target = self.target.write().map_err(|_| Error::NotAttached)?;
            *target = Some(WalkTarget {
                views,
                root: anchor.root,
            });
        }

        let mut state = self.state();
        state.anchor = Some(anchor);
        state.attached_at = Some(Utc::now());
        info!(
            "Attached (layout {}), entity root {}",
            self.layout.version, anchor.root
        );
        Ok(anchor)
    }

    /// Attach to a live process through a [`MemoryReader`] using the configured window
    pub fn attach_process(&self, process: ProcessHandle) -> Result<Anchor> {
        info!(
            "Attaching to {} (pid {}, base {:#x})",
            process.name, process.pid, process.base_address
        );
        let reader = MemoryReader::with_window(process, self.config.memory.window());
        self.attach(Arc::new(reader))
    }

    pub fn detach(&self) {
        let previous = match self.target.write() {
            Ok(mut target) => {
                let previous = target.take();
                // Cleared under the lock so no cycle can repopulate it
                self.graph.clear();
                previous
            }
            Err(_) => None,
        };
        let mut state = self.state();
        state.anchor = None;
        state.attached_at = None;
        if previous.is_some() {
            info!("Detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.target.read().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.state().anchor
    }

    /// Start the background walker. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.walker.as_ref().is_some_and(Walker::is_running) {
            return Ok(());
        }
        self.shutdown = Arc::new(ShutdownSignal::new());
        self.walker = Some(Walker::spawn(
            Arc::clone(&self.graph),
            Arc::clone(&self.target),
            self.clock.clone(),
            self.config.walker.clone(),
            Arc::clone(&self.shutdown),
        )?);
        Ok(())
    }

    /// Stop the background walker and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(walker) = self.walker.take() {
            walker.stop();
        }
    }

    /// Run one walk cycle on the calling thread
    pub fn walk_once(&self) -> Result<WalkStats> {
        let target = self.target.read().map_err(|_| Error::NotAttached)?;
        let current = target.as_ref().ok_or(Error::NotAttached)?;
        Ok(self.graph.walk_once(&current.views, current.root))
    }

    pub fn try_get_entity(&self, id: EntityId) -> Option<Arc<EntityWrapper>> {
        self.graph.try_get(id)
    }

    pub fn entities(&self) -> Vec<Arc<EntityWrapper>> {
        self.graph.entities()
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<EntityEvent> {
        self.graph.subscribe()
    }

    pub fn graph(&self) -> &Arc<EntityGraph> {
        &self.graph
    }

    /// View factory over the attached process
    pub fn views(&self) -> Option<ViewFactory> {
        self.target
            .read()
            .ok()
            .and_then(|t| t.as_ref().map(|current| current.views.clone()))
    }

    pub fn reader(&self) -> Option<SharedReader> {
        self.views().map(|views| Arc::clone(views.reader()))
    }

    /// A view over the entity `id` that follows it across relocations
    pub fn entity_view<T, F>(&self, id: EntityId, producer: F) -> Option<Cached<T>>
    where
        T: Clone + Default + 'static,
        F: Fn(&dyn ReadMemory, Address) -> Option<T> + Send + Sync + 'static,
    {
        let wrapper = self.graph.try_get(id)?;
        let views = self.views()?;
        Some(views.tracked_view(wrapper.tracked_address(), producer))
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let stats = self.graph.stats();
        let state = self.state();
        Diagnostics {
            layout_version: self.layout.version.clone(),
            attached: self.is_attached(),
            attached_at: state.attached_at,
            anchor: state.anchor,
            last_match_quality: state.last_quality,
            tracked_ids: stats.tracked_ids,
            tracked_addresses: stats.tracked_addresses,
            live_entities: stats.live_entities,
            walk_cycles: stats.walk_cycles,
            last_visited: stats.last_visited,
            guard_trips: stats.guard_trips,
            walker_running: self.walker.as_ref().is_some_and(Walker::is_running),
        }
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.stop();
    }
}
