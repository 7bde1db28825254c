use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::scanner::{MatchQuality, SignatureScanner};
use super::signature::AnchorSignature;
use crate::config::AttachConfig;
use crate::error::{Error, Result};
use crate::memory::{Address, ReadMemory};

/// Result of a successful signature scan and recipe resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Address of the pattern match inside the image
    pub match_address: Address,
    /// Root structure address produced by the recipe
    pub root: Address,
    pub quality: MatchQuality,
}

/// Scan the image for `signature` and resolve its recipe to the root address.
///
/// On failure the returned error carries the best partial match, and
/// `last_quality` (when given) is updated either way for diagnostics.
pub fn locate_anchor<R: ReadMemory + ?Sized>(
    reader: &R,
    signature: &AnchorSignature,
    config: &AttachConfig,
    last_quality: Option<&mut MatchQuality>,
) -> Result<Anchor> {
    let pattern = signature.pattern_bytes()?;
    let scanner = SignatureScanner::load(reader, config)?;
    let result = scanner.scan(&pattern);
    if let Some(slot) = last_quality {
        *slot = result.quality;
    }

    let Some(position) = result.position else {
        warn!(
            "Anchor pattern not found (best partial match {}/{} at offset {:?})",
            result.quality.matched, result.quality.total, result.quality.offset
        );
        return Err(Error::PatternNotFound {
            matched: result.quality.matched,
            total: result.quality.total,
        });
    };

    let match_address = scanner.base().add(position as u64);
    debug!("Anchor pattern matched at {}", match_address);

    let root = signature.recipe.resolve(reader, match_address)?;
    info!("Anchor resolved: match {} -> root {}", match_address, root);

    Ok(Anchor {
        match_address,
        root,
        quality: result.quality,
    })
}
