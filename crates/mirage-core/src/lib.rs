//! # mirage-core
//!
//! Live, typed mirror of data structures inside another process.
//!
//! This crate provides:
//! - Fail-soft foreign memory reads with a plausibility window
//! - Table-driven record decoding and bounded array cursors
//! - Anchor discovery via wildcard signature scanning and pointer recipes
//! - Frame-memoized views (`Cached<T>`) driven by an injected frame clock
//! - A background entity graph walker with identity-stable wrappers
//!
//! ## Feature Flags
//!
//! - `debug-tools`: Enables the anchor dump used by the CLI for diagnosing
//!   layout descriptors against a new build of the target.

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod memory;
pub mod mirror;
pub mod offset;
pub mod shutdown;

pub use cache::{Cached, FrameClock, FrameDriver, TrackedAddress, ViewFactory};
pub use config::Config;
pub use entity::{
    EntityEvent, EntityGraph, EntityGraphLayout, EntityId, EntityLayout, EntityWrapper,
    GraphStats, WalkStats,
};
pub use error::{Error, Result};
pub use memory::{
    Address, AddressWindow, ArrayCursor, ArrayHandle, BucketMapLayout, ForeignMapDecoder,
    FromRecord, MemoryReader, PrimitiveKind, ProcessHandle, ReadMemory,
    ReadMemoryExt, Record, RecordLayout, SharedReader, TextEncoding,
};
pub use mirror::{Diagnostics, Mirror};
pub use offset::{
    Anchor, AnchorSignature, LayoutDescriptor, MatchQuality, PointerChain, ResolveStep,
    SignatureScanner, load_layout, locate_anchor, save_layout,
};
pub use shutdown::ShutdownSignal;

#[cfg(feature = "debug-tools")]
pub use offset::AnchorDump;
