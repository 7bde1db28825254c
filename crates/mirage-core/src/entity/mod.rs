//! Entity graph cache: discovery, identity tracking and notifications

mod graph;
mod id;
pub mod layout;
mod walker;
mod wrapper;

#[cfg(test)]
pub(crate) mod fixtures;

pub use graph::{EntityEvent, EntityGraph, GraphStats, WalkStats, coalesce_events};
pub use id::EntityId;
pub use layout::{ComponentLookupLayout, EntityGraphLayout, EntityLayout, node_fields};
pub use walker::{SharedTarget, WalkTarget, Walker};
pub use wrapper::{EntityWrapper, verify_entity};
