//! Main mirroring mode command.

use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use mirage_core::entity::coalesce_events;
use mirage_core::{
    Config, EntityEvent, FrameDriver, LayoutDescriptor, Mirror, ReadMemory, ShutdownSignal,
};
use owo_colors::OwoColorize;
use tracing::{debug, info, warn};

use super::ProcessSelector;
use crate::retry::attach_with_retry;

/// How often the attached process is checked for liveness
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Run the main mirroring mode until shutdown
pub fn run(
    layout: LayoutDescriptor,
    config: Config,
    selector: &ProcessSelector,
    tick_ms: u64,
    status_secs: u64,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    info!("mirage {} (layout {})", env!("CARGO_PKG_VERSION"), layout.version);

    let driver = FrameDriver::new();
    let mut mirror = Mirror::new(layout, config, driver.clock());
    let events = mirror.subscribe();
    let tick = Duration::from_millis(tick_ms.max(1));
    let status_every = (status_secs > 0).then(|| Duration::from_secs(status_secs));

    println!("Waiting for {}... (Ctrl+C to quit)", selector.describe());
    while !shutdown.is_shutdown() {
        let Some(anchor) = attach_with_retry(&mirror, selector, shutdown)? else {
            break;
        };
        println!(
            "{} root {} (pattern {}/{})",
            "Attached".green(),
            anchor.root,
            anchor.quality.matched,
            anchor.quality.total
        );

        mirror.start()?;
        mirror_loop(&mirror, &driver, &events, tick, status_every, shutdown);
        mirror.stop();
        mirror.detach();
        report_events(&events);

        if !shutdown.is_shutdown() {
            println!("{}", "Target disconnected, waiting for reconnect...".yellow());
        }
    }

    print_status(&mirror);
    info!("Shutting down");
    Ok(())
}

/// Advance frames and report changes until the target goes away or shutdown
fn mirror_loop(
    mirror: &Mirror,
    driver: &FrameDriver,
    events: &Receiver<EntityEvent>,
    tick: Duration,
    status_every: Option<Duration>,
    shutdown: &ShutdownSignal,
) {
    let mut last_liveness = Instant::now();
    let mut last_status = Instant::now();

    while !shutdown.is_shutdown() {
        let frame = driver.advance();
        report_events(events);

        if last_liveness.elapsed() >= LIVENESS_INTERVAL {
            last_liveness = Instant::now();
            if !target_alive(mirror) {
                warn!("Target no longer readable (frame {})", frame);
                return;
            }
        }

        if let Some(every) = status_every {
            if last_status.elapsed() >= every {
                last_status = Instant::now();
                print_status(mirror);
            }
        }

        thread::sleep(tick);
    }
}

fn target_alive(mirror: &Mirror) -> bool {
    mirror
        .reader()
        .is_some_and(|reader| reader.read_u8(reader.base_address()).is_ok())
}

/// Drain pending notifications, collapsing add/remove pairs within the batch
fn report_events(events: &Receiver<EntityEvent>) {
    let batch = coalesce_events(events.try_iter());
    if batch.is_empty() {
        return;
    }

    let mut changes: Vec<_> = batch.into_values().collect();
    changes.sort_by_key(|event| match event {
        EntityEvent::Added(id) | EntityEvent::Removed(id) => *id,
    });
    for event in changes {
        match event {
            EntityEvent::Added(id) => println!("  {} {}", "+".green(), id),
            EntityEvent::Removed(id) => println!("  {} {}", "-".red(), id),
        }
    }
}

fn print_status(mirror: &Mirror) {
    let diagnostics = mirror.diagnostics();
    match serde_json::to_string(&diagnostics) {
        Ok(json) => debug!("Diagnostics: {}", json),
        Err(e) => debug!("Diagnostics unavailable: {}", e),
    }
    println!(
        "{} {} live entities, {} cycles, {} nodes last walk, {} guard trips",
        "Status:".bold(),
        diagnostics.live_entities,
        diagnostics.walk_cycles,
        diagnostics.last_visited,
        diagnostics.guard_trips
    );
}
