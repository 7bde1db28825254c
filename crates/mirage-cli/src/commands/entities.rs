//! Entities command implementation.

use anyhow::Result;
use mirage_core::{Config, EntityWrapper, FrameDriver, LayoutDescriptor, Mirror};
use serde_json::json;

use super::ProcessSelector;

/// Run the entities command: attach once, walk once, list what was found
pub fn run(
    layout: LayoutDescriptor,
    config: Config,
    selector: &ProcessSelector,
    component: Option<&str>,
    as_json: bool,
) -> Result<()> {
    let driver = FrameDriver::new();
    let mirror = Mirror::new(layout, config, driver.clock());
    let process = selector.open()?;
    mirror.attach_process(process)?;

    let stats = mirror.walk_once()?;
    let entities: Vec<_> = mirror
        .entities()
        .into_iter()
        .filter(|e| component.is_none_or(|name| e.has_component(name)))
        .collect();

    if as_json {
        let list: Vec<_> = entities.iter().map(|e| entity_json(e)).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "walk": stats,
                "entities": list,
            }))?
        );
        return Ok(());
    }

    println!(
        "Walked {} nodes: {} entities ({} rejected){}",
        stats.visited,
        stats.discovered,
        stats.rejected,
        if stats.cap_reached { ", node cap reached" } else { "" }
    );
    println!();
    for entity in &entities {
        println!(
            "  {:>10}  {}  {}  [{} components]",
            entity.id(),
            entity.address(),
            entity.path(),
            entity.components().len()
        );
    }
    println!();
    println!("{} entities listed", entities.len());

    Ok(())
}

fn entity_json(entity: &EntityWrapper) -> serde_json::Value {
    json!({
        "id": entity.id(),
        "address": entity.address(),
        "path": entity.path(),
        "components": entity.component_names(),
    })
}
