//! Identity-stable cache of the entities reachable from the anchor root
//!
//! Each walk traverses the foreign node structure with an explicit stack and a
//! visited set, so cycles and corrupt links terminate. Wrappers are keyed by
//! id and never replaced: a relocated entity has its wrapper's address rebound,
//! a vanished one is invalidated, and a returning id revalidates the same
//! wrapper. Both maps are concurrent so consumers can read while the walker
//! writes; a reader may observe a cycle half-applied. Walks themselves run one
//! at a time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::id::EntityId;
use super::layout::{EntityGraphLayout, EntityLayout, node_fields};
use super::wrapper::{EntityWrapper, verify_entity};
use crate::cache::ViewFactory;
use crate::config::Config;
use crate::memory::{Address, ReadMemory, ReadMemoryExt, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityEvent {
    Added(EntityId),
    Removed(EntityId),
}

/// Outcome of one walk cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    /// Distinct node addresses read
    pub visited: usize,
    /// Ids admitted this cycle
    pub discovered: usize,
    /// Ids with a node but a failed validity check
    pub rejected: usize,
    pub added: usize,
    pub removed: usize,
    pub cap_reached: bool,
    pub root_failed: bool,
}

/// Counters for operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub tracked_ids: usize,
    pub tracked_addresses: usize,
    pub live_entities: usize,
    pub walk_cycles: u64,
    pub last_visited: usize,
    pub guard_trips: u64,
}

/// What one node contributed to the walk
struct NodeRead {
    links: [Option<Address>; 3],
    candidate: Option<(EntityId, Address)>,
}

pub struct EntityGraph {
    layout: Arc<EntityGraphLayout>,
    entity_layout: Arc<EntityLayout>,
    max_visited_nodes: usize,
    max_entity_id: u32,
    max_array_entries: usize,
    by_id: DashMap<EntityId, Arc<EntityWrapper>>,
    by_address: DashMap<Address, Arc<EntityWrapper>>,
    subscribers: Mutex<Vec<Sender<EntityEvent>>>,
    walk_cycles: AtomicU64,
    guard_trips: AtomicU64,
    last_visited: AtomicUsize,
    /// Held for a whole walk cycle
    walk_lock: Mutex<()>,
}

impl EntityGraph {
    /// Text reads in `layout` are capped at `config.memory.max_text_len`
    pub fn new(mut layout: EntityGraphLayout, config: &Config) -> Self {
        let max_text_len = config.memory.max_text_len;
        layout.entity.path_max_len = layout.entity.path_max_len.min(max_text_len);
        if let Some(lookup) = layout.entity.component_lookup.as_mut() {
            lookup.buckets.name_max_len = lookup.buckets.name_max_len.min(max_text_len);
        }
        let entity_layout = Arc::new(layout.entity.clone());
        Self {
            layout: Arc::new(layout),
            entity_layout,
            max_visited_nodes: config.walker.max_visited_nodes,
            max_entity_id: config.walker.max_entity_id,
            max_array_entries: config.memory.max_array_entries,
            by_id: DashMap::new(),
            by_address: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            walk_cycles: AtomicU64::new(0),
            guard_trips: AtomicU64::new(0),
            last_visited: AtomicUsize::new(0),
            walk_lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &EntityGraphLayout {
        &self.layout
    }

    /// Live wrapper for `id`. Invalidated wrappers are not returned.
    pub fn try_get(&self, id: EntityId) -> Option<Arc<EntityWrapper>> {
        self.by_id
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|wrapper| wrapper.is_valid())
    }

    pub fn get_by_address(&self, address: Address) -> Option<Arc<EntityWrapper>> {
        self.by_address
            .get(&address)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|wrapper| wrapper.is_valid())
    }

    /// Snapshot of live wrappers, ordered by id
    pub fn entities(&self) -> Vec<Arc<EntityWrapper>> {
        let mut live: Vec<_> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().is_valid())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        live.sort_by_key(|wrapper| wrapper.id());
        live
    }

    pub fn subscribe(&self) -> Receiver<EntityEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn emit(&self, event: EntityEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event).is_ok());
        }
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            tracked_ids: self.by_id.len(),
            tracked_addresses: self.by_address.len(),
            live_entities: self.by_id.iter().filter(|e| e.value().is_valid()).count(),
            walk_cycles: self.walk_cycles.load(Ordering::Relaxed),
            last_visited: self.last_visited.load(Ordering::Relaxed),
            guard_trips: self.guard_trips.load(Ordering::Relaxed),
        }
    }

    fn read_node(&self, reader: &dyn ReadMemory, link: Address) -> Option<NodeRead> {
        let node: Record = reader.read_record(link, &self.layout.node).ok()?;

        let mut links = [None; 3];
        for (slot, field) in links.iter_mut().zip(node_fields::LINKS) {
            *slot = node.pointer(field).ok().filter(|next| next.is_set());
        }

        let candidate = node
            .integer(node_fields::ID)
            .ok()
            .and_then(|raw| EntityId::from_raw(raw, self.max_entity_id))
            .zip(node.pointer(node_fields::ENTITY).ok());

        Some(NodeRead { links, candidate })
    }

    /// Admit or update `id` at `address`. Returns whether the id counts as discovered.
    ///
    /// A valid wrapper already at `address` is accepted without being checked again.
    /// An address claimed earlier in this cycle by a different id stays indexed
    /// under that id.
    fn admit(
        &self,
        views: &ViewFactory,
        id: EntityId,
        address: Address,
        discovered: &HashSet<EntityId>,
        appeared: &mut Vec<EntityId>,
    ) -> bool {
        let reader = views.reader().as_ref();
        let known = self.by_id.get(&id).map(|entry| Arc::clone(entry.value()));

        if let Some(wrapper) = &known {
            if wrapper.is_valid() && wrapper.address() == address {
                return true;
            }
        }

        if let Err(e) = verify_entity(reader, address, &self.entity_layout) {
            debug!("Rejected entity {} at {}: {}", id, address, e);
            return false;
        }

        let wrapper = match known {
            Some(wrapper) => {
                let previous = wrapper.address();
                if previous.is_set() && previous != address {
                    self.by_address.remove_if(&previous, |_, w| w.id() == id);
                }
                if !wrapper.is_valid() {
                    appeared.push(id);
                }
                wrapper
            }
            None => {
                let mut created = false;
                let wrapper = Arc::clone(
                    self.by_id
                        .entry(id)
                        .or_insert_with(|| {
                            created = true;
                            Arc::new(EntityWrapper::new(
                                id,
                                address,
                                views,
                                Arc::clone(&self.entity_layout),
                                self.max_array_entries,
                            ))
                        })
                        .value(),
                );
                if created || !wrapper.is_valid() {
                    appeared.push(id);
                }
                wrapper
            }
        };

        wrapper.rebind(address);
        match self.by_address.entry(address) {
            Entry::Occupied(slot)
                if slot.get().id() != id && discovered.contains(&slot.get().id()) =>
            {
                debug!(
                    "Entity {} shares {} with entity {}, keeping the earlier claim",
                    id,
                    address,
                    slot.get().id()
                );
            }
            Entry::Occupied(mut slot) => {
                slot.insert(wrapper);
            }
            Entry::Vacant(slot) => {
                slot.insert(wrapper);
            }
        }
        true
    }

    /// Run one walk cycle from the anchor `root` and reconcile the maps.
    /// Concurrent callers queue behind the cycle in progress.
    pub fn walk_once(&self, views: &ViewFactory, root: Address) -> WalkStats {
        let _walking = self.walk_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let reader = views.reader().as_ref();
        let mut stats = WalkStats::default();
        let mut visited: HashSet<Address> = HashSet::new();
        let mut discovered: HashSet<EntityId> = HashSet::new();
        let mut appeared: Vec<EntityId> = Vec::new();
        let mut stack: Vec<Address> = Vec::new();

        match self.layout.root_chain.resolve(reader, root) {
            Ok(first) => stack.push(first),
            Err(e) => {
                debug!("Entity root unreadable from {}: {}", root, e);
                stats.root_failed = true;
            }
        }

        while let Some(link) = stack.pop() {
            if visited.contains(&link) {
                continue;
            }
            if visited.len() >= self.max_visited_nodes {
                warn!(
                    "Entity walk reached the {} node cap, stopping early",
                    self.max_visited_nodes
                );
                stats.cap_reached = true;
                self.guard_trips.fetch_add(1, Ordering::Relaxed);
                break;
            }
            visited.insert(link);

            let Some(node) = self.read_node(reader, link) else {
                continue;
            };
            stack.extend(node.links.into_iter().flatten().filter(|next| !visited.contains(next)));

            let Some((id, address)) = node.candidate else {
                continue;
            };
            // First node carrying an id wins for this cycle
            if discovered.contains(&id) {
                continue;
            }
            if self.admit(views, id, address, &discovered, &mut appeared) {
                discovered.insert(id);
            } else {
                stats.rejected += 1;
            }
        }

        stats.visited = visited.len();
        stats.discovered = discovered.len();
        self.reconcile(&discovered, &appeared, &mut stats);

        self.walk_cycles.fetch_add(1, Ordering::Relaxed);
        self.last_visited.store(stats.visited, Ordering::Relaxed);
        stats
    }

    fn reconcile(&self, discovered: &HashSet<EntityId>, appeared: &[EntityId], stats: &mut WalkStats) {
        let vanished: Vec<Arc<EntityWrapper>> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().is_valid() && !discovered.contains(entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for wrapper in vanished {
            let id = wrapper.id();
            let address = wrapper.address();
            self.by_address.remove_if(&address, |_, w| w.id() == id);
            wrapper.invalidate();
            stats.removed += 1;
            self.emit(EntityEvent::Removed(id));
        }

        for &id in appeared {
            stats.added += 1;
            self.emit(EntityEvent::Added(id));
        }

        if stats.added > 0 || stats.removed > 0 {
            info!(
                "Entities: +{} -{} ({} live, {} nodes visited)",
                stats.added, stats.removed, stats.discovered, stats.visited
            );
        }
    }

    /// Drop every wrapper, disposing its views. Live entities are reported as removed.
    pub fn clear(&self) {
        let wrappers: Vec<Arc<EntityWrapper>> =
            self.by_id.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.by_id.clear();
        self.by_address.clear();

        for wrapper in wrappers {
            let was_valid = wrapper.is_valid();
            wrapper.dispose();
            if was_valid {
                self.emit(EntityEvent::Removed(wrapper.id()));
            }
        }
    }
}

/// Group events by id, keeping only the last one per id
pub fn coalesce_events(events: impl IntoIterator<Item = EntityEvent>) -> HashMap<EntityId, EntityEvent> {
    events
        .into_iter()
        .map(|event| match event {
            EntityEvent::Added(id) | EntityEvent::Removed(id) => (id, event),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FrameDriver;
    use crate::config::WalkerConfig;
    use crate::entity::fixtures::{self, Node, ROOT};
    use crate::memory::{MockMemoryBuilder, MockMemoryReader, SharedReader};
    use std::thread;

    struct Harness {
        reader: Arc<MockMemoryReader>,
        views: ViewFactory,
        graph: EntityGraph,
        _driver: FrameDriver,
    }

    fn harness_with(config: Config) -> Harness {
        let reader = Arc::new(MockMemoryBuilder::new().build());
        let driver = FrameDriver::new();
        let views = ViewFactory::new(
            Arc::clone(&reader) as SharedReader,
            driver.clock(),
            &config.memory,
        );
        let graph = EntityGraph::new(fixtures::graph_layout(), &config);
        Harness {
            reader,
            views,
            graph,
            _driver: driver,
        }
    }

    fn harness() -> Harness {
        harness_with(Config::default())
    }

    impl Harness {
        fn walk(&self) -> WalkStats {
            self.graph.walk_once(&self.views, Address::new(ROOT))
        }

        fn ids(&self) -> Vec<u32> {
            self.graph.entities().iter().map(|w| w.id().value()).collect()
        }
    }

    #[test]
    fn test_cycle_terminates_and_dedups() {
        let h = harness();
        fixtures::write_ring(&h.reader, &[11, 12, 13, 14, 15]);

        let stats = h.walk();
        assert_eq!(stats.visited, 5);
        assert_eq!(stats.discovered, 5);
        assert!(!stats.cap_reached);
        assert_eq!(h.ids(), vec![11, 12, 13, 14, 15]);
        for i in 0..5 {
            assert_eq!(h.reader.reads_at(fixtures::node_at(i)), 1, "node {} read once", i);
        }

        // Second pass over the same memory changes nothing
        let stats = h.walk();
        assert_eq!(stats.visited, 5);
        assert_eq!((stats.added, stats.removed), (0, 0));
    }

    #[test]
    fn test_self_loop_and_sentinels() {
        let h = harness();
        // Sentinel head with id 0 pointing at itself and at one real node
        fixtures::write_node(
            &h.reader,
            fixtures::node_at(0),
            Node {
                left: fixtures::node_at(0),
                parent: fixtures::node_at(1),
                right: fixtures::node_at(0),
                id: 0,
                entity: 0,
            },
        );
        fixtures::write_node(
            &h.reader,
            fixtures::node_at(1),
            Node {
                left: 0x10,
                parent: fixtures::node_at(0),
                right: fixtures::node_at(7),
                id: 42,
                entity: fixtures::entity_at(1),
            },
        );
        fixtures::write_entity(&h.reader, fixtures::entity_at(1), "Metadata/Chests/Box");
        fixtures::set_first_node(&h.reader, fixtures::node_at(0));

        let stats = h.walk();
        // Sentinel, the real node, the implausible 0x10 and the unmapped node 7
        assert_eq!(stats.visited, 4);
        assert_eq!(h.ids(), vec![42]);
    }

    #[test]
    fn test_duplicate_id_first_wins() {
        let h = harness();
        fixtures::write_ring(&h.reader, &[5, 6]);
        // Node 1 also claims id 5, with a different entity
        fixtures::write_node(
            &h.reader,
            fixtures::node_at(1),
            Node {
                left: 0,
                parent: fixtures::node_at(0),
                right: fixtures::node_at(0),
                id: 5,
                entity: fixtures::entity_at(1),
            },
        );

        h.walk();
        assert_eq!(h.ids(), vec![5]);
        let wrapper = h.graph.try_get(EntityId::new(5)).unwrap();
        assert_eq!(wrapper.address(), Address::new(fixtures::entity_at(0)));
    }

    #[test]
    fn test_invalid_entities_are_rejected() {
        let h = harness();
        fixtures::write_ring(&h.reader, &[1, 2, 3]);
        // Broken back reference on 2, wrong path prefix on 3
        h.reader.write_u64(fixtures::entity_at(1) + 0x08, 0x5000_0000);
        fixtures::write_entity(&h.reader, fixtures::entity_at(2), "Art/Meshes/Rock");

        let stats = h.walk();
        assert_eq!(stats.rejected, 2);
        assert_eq!(h.ids(), vec![1]);
        assert!(h.graph.try_get(EntityId::new(2)).is_none());
    }

    #[test]
    fn test_identity_stable_across_relocation() {
        let h = harness();
        fixtures::write_ring(&h.reader, &[77]);
        h.walk();
        let before = h.graph.try_get(EntityId::new(77)).unwrap();
        let x = Address::new(fixtures::entity_at(0));
        assert_eq!(before.address(), x);
        assert_eq!(before.path(), "Metadata/Monsters/M77");

        // The foreign process moves the entity to Y
        let y = fixtures::entity_at(9);
        fixtures::write_entity(&h.reader, y, "Metadata/Monsters/Moved");
        h.reader.write_u64(fixtures::node_at(0) + 0x28, y);
        let stats = h.walk();
        assert_eq!((stats.added, stats.removed), (0, 0));

        let after = h.graph.try_get(EntityId::new(77)).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.address(), Address::new(y));
        assert_eq!(before.path(), "Metadata/Monsters/Moved");
        assert!(h.graph.get_by_address(x).is_none());
        assert!(h.graph.get_by_address(Address::new(y)).is_some());
    }

    #[test]
    fn test_removal_and_reuse() {
        let h = harness();
        let events = h.graph.subscribe();
        fixtures::write_ring(&h.reader, &[3, 4]);
        h.walk();
        let original = h.graph.try_get(EntityId::new(4)).unwrap();
        assert_eq!(
            coalesce_events(events.try_iter()).len(),
            2,
            "both ids announced"
        );

        // Cycle N+1: id 4 gone
        fixtures::write_ring(&h.reader, &[3]);
        h.reader.write_u64(fixtures::node_at(0), 0);
        let stats = h.walk();
        assert_eq!(stats.removed, 1);
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![EntityEvent::Removed(EntityId::new(4))]
        );
        assert!(h.graph.try_get(EntityId::new(4)).is_none());
        assert!(original.address().is_null());
        assert!(!original.is_valid());

        // Cycle N+2: id 4 back at its old place
        fixtures::write_ring(&h.reader, &[3, 4]);
        let stats = h.walk();
        assert_eq!(stats.added, 1);
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![EntityEvent::Added(EntityId::new(4))]
        );
        let reused = h.graph.try_get(EntityId::new(4)).unwrap();
        assert!(Arc::ptr_eq(&original, &reused));
        assert!(reused.is_valid());
    }

    #[test]
    fn test_unreadable_root_empties_set() {
        let h = harness();
        fixtures::write_ring(&h.reader, &[8, 9]);
        h.walk();
        assert_eq!(h.ids().len(), 2);

        h.reader.unmap(ROOT, 8);
        let stats = h.walk();
        assert!(stats.root_failed);
        assert_eq!(stats.removed, 2);
        assert!(h.graph.entities().is_empty());
        assert_eq!(h.graph.stats().tracked_ids, 2);
        assert_eq!(h.graph.stats().live_entities, 0);
    }

    #[test]
    fn test_visited_cap_trips_guard() {
        let config = Config {
            walker: WalkerConfig {
                max_visited_nodes: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness_with(config);
        fixtures::write_ring(&h.reader, &[1, 2, 3, 4, 5, 6]);

        let stats = h.walk();
        assert!(stats.cap_reached);
        assert_eq!(stats.visited, 3);
        assert_eq!(h.ids().len(), 3);
        assert_eq!(h.graph.stats().guard_trips, 1);
    }

    #[test]
    fn test_clear_disposes_and_reports() {
        let h = harness();
        let events = h.graph.subscribe();
        fixtures::write_ring(&h.reader, &[21]);
        h.walk();
        let wrapper = h.graph.try_get(EntityId::new(21)).unwrap();
        events.try_iter().for_each(drop);

        h.graph.clear();
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![EntityEvent::Removed(EntityId::new(21))]
        );
        assert_eq!(h.graph.stats().tracked_ids, 0);
        assert!(!wrapper.is_valid());
        assert_eq!(wrapper.path(), "");
    }

    #[test]
    fn test_concurrent_walks_keep_one_wrapper_per_id() {
        let h = Arc::new(harness());
        let events = h.graph.subscribe();
        let ids: Vec<u32> = (1..=200).collect();
        fixtures::write_ring(&h.reader, &ids);

        let walkers: Vec<_> = (0..2)
            .map(|_| {
                let h = Arc::clone(&h);
                thread::spawn(move || {
                    h.walk();
                })
            })
            .collect();
        for walker in walkers {
            walker.join().unwrap();
        }

        let added = events
            .try_iter()
            .filter(|event| matches!(event, EntityEvent::Added(_)))
            .count();
        assert_eq!(added, 200);
        assert_eq!(h.graph.stats().tracked_ids, 200);
        assert_eq!(h.ids(), ids);
        for &id in &ids {
            let by_id = h.graph.try_get(EntityId::new(id)).unwrap();
            let by_address = h.graph.get_by_address(by_id.address()).unwrap();
            assert!(Arc::ptr_eq(&by_id, &by_address));
        }
    }

    #[test]
    fn test_shared_entity_address_keeps_first_claim() {
        let h = harness();
        fixtures::write_ring(&h.reader, &[1, 2]);
        // Node 1 (id 2) points at the entity of id 1
        h.reader.write_u64(fixtures::node_at(1) + 0x28, fixtures::entity_at(0));
        let shared = Address::new(fixtures::entity_at(0));

        for _ in 0..2 {
            h.walk();
            assert_eq!(h.ids(), vec![1, 2]);
            let owner = h.graph.get_by_address(shared).unwrap();
            assert_eq!(owner.id(), EntityId::new(1));
            assert_eq!(h.graph.stats().tracked_addresses, 1);
        }
    }

    #[test]
    fn test_text_reads_capped_by_config() {
        let config = Config {
            memory: crate::config::MemoryConfig {
                max_text_len: 16,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness_with(config);
        fixtures::write_ring(&h.reader, &[11]);

        h.walk();
        let wrapper = h.graph.try_get(EntityId::new(11)).unwrap();
        assert_eq!(wrapper.path(), "Metadata/Monster");
        assert_eq!(h.graph.layout().entity.path_max_len, 16);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let h = harness();
        drop(h.graph.subscribe());
        let kept = h.graph.subscribe();
        fixtures::write_ring(&h.reader, &[1]);
        h.walk();
        assert_eq!(kept.try_iter().count(), 1);
        assert_eq!(h.graph.subscribers.lock().unwrap().len(), 1);
    }
}
