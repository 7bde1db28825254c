//! Identity-stable handle to one foreign entity

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::id::EntityId;
use super::layout::EntityLayout;
use crate::cache::{Cached, TrackedAddress, ViewFactory};
use crate::error::{Error, Result};
use crate::memory::{
    Address, ArrayCursor, ForeignMapDecoder, ReadMemory, ReadMemoryExt,
};

/// Read the entity's path text
pub(crate) fn read_path(reader: &dyn ReadMemory, address: Address, layout: &EntityLayout) -> Result<String> {
    let text_at = layout.path.resolve(reader, address)?;
    reader.read_text(text_at, layout.path_encoding, layout.path_max_len)
}

/// Check that `address` holds an entity: the record is readable, the back
/// reference leads back to `address`, and the path carries the expected prefix.
pub fn verify_entity(reader: &dyn ReadMemory, address: Address, layout: &EntityLayout) -> Result<String> {
    reader.read_record(address, &layout.record)?;

    let back = layout.back_reference.resolve(reader, address)?;
    if back != address {
        return Err(Error::InvalidLayout(format!(
            "back reference of {} points to {}",
            address, back
        )));
    }

    let path = read_path(reader, address, layout)?;
    if path.is_empty() || !path.starts_with(&layout.path_prefix) {
        return Err(Error::InvalidLayout(format!(
            "entity {} has unexpected path '{}'",
            address, path
        )));
    }
    Ok(path)
}

fn read_components(
    reader: &dyn ReadMemory,
    address: Address,
    layout: &EntityLayout,
    max_entries: usize,
) -> Option<Vec<Address>> {
    let field = layout.component_list.as_deref()?;
    let record = reader.read_record(address, &layout.record).ok()?;
    let handle = record.array(field).ok()?;
    let cursor = ArrayCursor::new(handle, 8, max_entries, &reader.window());
    // An unreadable slot keeps its position so lookup indices stay aligned
    Some(
        cursor
            .iter()
            .map(|slot| reader.read_address(slot).unwrap_or(Address::NULL))
            .collect(),
    )
}

fn read_lookup(
    reader: &dyn ReadMemory,
    address: Address,
    layout: &EntityLayout,
    max_entries: usize,
) -> Option<Vec<(String, usize)>> {
    let lookup = layout.component_lookup.as_ref()?;
    let table = lookup.chain.resolve(reader, address).ok()?;
    Some(lookup.buckets.decode(reader, table, max_entries))
}

/// The single local wrapper of an [`EntityId`].
///
/// The wrapper outlives address changes and removals: the walker rebinds its
/// address in place, clears it on removal and re-validates it if the id returns.
pub struct EntityWrapper {
    id: EntityId,
    address: TrackedAddress,
    valid: AtomicBool,
    path: Cached<String>,
    components: Cached<Vec<Address>>,
    lookup: Cached<Vec<(String, usize)>>,
}

impl EntityWrapper {
    pub fn new(
        id: EntityId,
        address: Address,
        views: &ViewFactory,
        layout: Arc<EntityLayout>,
        max_entries: usize,
    ) -> Self {
        let tracked = TrackedAddress::new(address);

        let path_layout = Arc::clone(&layout);
        let path = views.tracked_view(tracked.clone(), move |reader, at| {
            read_path(reader, at, &path_layout).ok()
        });

        let list_layout = Arc::clone(&layout);
        let components = views.tracked_view(tracked.clone(), move |reader, at| {
            read_components(reader, at, &list_layout, max_entries)
        });

        let lookup = views.tracked_view(tracked.clone(), move |reader, at| {
            read_lookup(reader, at, &layout, max_entries)
        });

        Self {
            id,
            address: tracked,
            valid: AtomicBool::new(false),
            path,
            components,
            lookup,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Current backing address, null once the entity has been removed
    pub fn address(&self) -> Address {
        self.address.get()
    }

    /// Shared address cell for building further views that follow this entity
    pub fn tracked_address(&self) -> TrackedAddress {
        self.address.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire) && self.address.get().is_set()
    }

    pub fn path(&self) -> String {
        self.path.get()
    }

    /// Pointers to the entity's components, in slot order
    pub fn components(&self) -> Vec<Address> {
        self.components.get()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.lookup.get().into_iter().map(|(name, _)| name).collect()
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.lookup.get().iter().any(|(n, _)| n == name)
    }

    /// Address of the named component, if the lookup table lists it
    pub fn component_address(&self, name: &str) -> Option<Address> {
        let slot = self
            .lookup
            .get()
            .into_iter()
            .find_map(|(n, slot)| (n == name).then_some(slot))?;
        self.components
            .get()
            .get(slot)
            .copied()
            .filter(|address| address.is_set())
    }

    /// Point the wrapper at `address` and mark it valid
    pub(crate) fn rebind(&self, address: Address) {
        if self.address.get() != address {
            debug!("Entity {} rebound {} -> {}", self.id, self.address.get(), address);
            self.address.set(address);
            self.flush();
        }
        self.valid.store(true, Ordering::Release);
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.address.clear();
        self.flush();
    }

    /// Force every view to re-read on next access
    pub fn flush(&self) {
        self.path.flush();
        self.components.flush();
        self.lookup.flush();
    }

    /// Release every view. The wrapper stays usable but yields defaults.
    pub(crate) fn dispose(&self) {
        self.valid.store(false, Ordering::Release);
        self.address.clear();
        self.path.dispose();
        self.components.dispose();
        self.lookup.dispose();
    }
}

impl fmt::Debug for EntityWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityWrapper")
            .field("id", &self.id)
            .field("address", &self.address.get())
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .finish()
    }
}
