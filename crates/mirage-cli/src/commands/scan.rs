//! Scan command implementation.
//!
//! Locates the anchor for the loaded layout without starting the walker, and
//! optionally saves an [`AnchorDump`] for comparing against a new build.

use std::path::Path;

use anyhow::Result;
use mirage_core::{AnchorDump, Config, LayoutDescriptor, MatchQuality, MemoryReader, locate_anchor};

use super::ProcessSelector;

/// Run the scan command
pub fn run(
    layout: &LayoutDescriptor,
    config: &Config,
    selector: &ProcessSelector,
    output: Option<&Path>,
) -> Result<()> {
    println!("mirage {} - Scan Mode", env!("CARGO_PKG_VERSION"));

    let process = selector.open()?;
    println!(
        "Found {} (PID: {}, Base: {:#x}, Image: {:#x} bytes)",
        process.name, process.pid, process.base_address, process.image_size
    );
    println!("Pattern: {}", layout.anchor.pattern);

    let reader = MemoryReader::with_window(process, config.memory.window());
    let mut quality = MatchQuality::default();
    let anchor = match locate_anchor(&reader, &layout.anchor, &config.attach, Some(&mut quality)) {
        Ok(anchor) => anchor,
        Err(e) => {
            println!(
                "Anchor not found: best partial match {}/{} bytes{}",
                quality.matched,
                quality.total,
                quality
                    .offset
                    .map(|o| format!(" at image offset {:#x}", o))
                    .unwrap_or_default()
            );
            return Err(e.into());
        }
    };

    println!();
    println!("=== Anchor ===");
    println!("  match: {}", anchor.match_address);
    println!("  root:  {}", anchor.root);

    let dump = AnchorDump::from_anchor(&layout.version, &anchor, &reader);
    if let Some(path) = output {
        dump.save(path)?;
        println!("Dump saved to: {}", path.display());
    } else {
        println!();
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }

    Ok(())
}
