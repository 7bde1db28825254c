//! Anchor discovery: signature scanning, pointer recipes and the layout descriptor

mod anchor;
mod chain;
mod descriptor;
#[cfg(feature = "debug-tools")]
mod dump;
mod scanner;
mod signature;

pub use anchor::{Anchor, locate_anchor};
pub use chain::{PointerChain, ResolveStep};
pub use descriptor::{LayoutDescriptor, load_layout, save_layout};
#[cfg(feature = "debug-tools")]
pub use dump::*;
pub use scanner::{MatchQuality, ScanResult, SignatureScanner, find_pattern};
pub use signature::{AnchorSignature, apply_mask, format_pattern, parse_pattern};
