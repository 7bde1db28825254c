use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mirage_core::{Config, ShutdownSignal, load_layout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod retry;

use commands::ProcessSelector;

#[derive(Parser)]
#[command(name = "mirage")]
#[command(about = "Live mirror of another process's entity graph")]
struct Args {
    /// Runtime configuration (TOML). Defaults are used when missing.
    #[arg(short, long, default_value = "mirage.toml")]
    config: PathBuf,

    /// Layout descriptor for the target build (JSON)
    #[arg(short, long, default_value = "layout.json", env = "MIRAGE_LAYOUT")]
    layout: PathBuf,

    /// Target process id
    #[arg(short, long, global = true)]
    pid: Option<u32>,

    /// Target process executable name, used when no pid is given
    #[arg(long, global = true, env = "MIRAGE_PROCESS")]
    process: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Attach, keep the entity graph mirrored and report changes
    Run {
        /// Frame interval driving cache invalidation (milliseconds)
        #[arg(long, default_value = "16")]
        tick_ms: u64,

        /// Print diagnostics every N seconds (0 disables)
        #[arg(long, default_value = "10")]
        status_secs: u64,
    },

    /// Locate the anchor and optionally save a dump for layout debugging
    Scan {
        /// Write the anchor dump as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Walk the graph once and list live entities
    Entities {
        /// Only list entities whose component lookup has this name
        #[arg(long)]
        component: Option<String>,

        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Display raw memory bytes
    Hexdump {
        /// Start address (hex, with or without 0x)
        address: String,

        /// Number of bytes to read
        #[arg(short, long, default_value = "256")]
        size: usize,

        /// Show the ASCII column
        #[arg(short, long)]
        ascii: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mirage=info".parse()?))
        .init();

    let args = Args::parse();
    let selector = ProcessSelector::new(args.pid, args.process.clone());
    let config = load_config(&args.config);

    match args.command {
        Command::Run {
            tick_ms,
            status_secs,
        } => {
            let layout = load_layout(&args.layout)?;
            let shutdown = Arc::new(ShutdownSignal::new());
            let shutdown_ctrlc = Arc::clone(&shutdown);
            ctrlc::set_handler(move || {
                info!("Received shutdown signal, stopping...");
                shutdown_ctrlc.trigger();
            })?;
            commands::run::run(layout, config, &selector, tick_ms, status_secs, &shutdown)
        }
        Command::Scan { output } => {
            let layout = load_layout(&args.layout)?;
            commands::scan::run(&layout, &config, &selector, output.as_deref())
        }
        Command::Entities { component, json } => {
            let layout = load_layout(&args.layout)?;
            commands::entities::run(layout, config, &selector, component.as_deref(), json)
        }
        Command::Hexdump {
            address,
            size,
            ascii,
        } => {
            let address = commands::hex_utils::parse_hex_address(&address)?;
            commands::hexdump::run(&config, &selector, address, size, ascii)
        }
    }
}

fn load_config(path: &Path) -> Config {
    match Config::load(path) {
        Ok(c) => {
            info!("Loaded config from {:?}", path);
            c
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    }
}
