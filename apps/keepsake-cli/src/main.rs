use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use keepsake_common::{SaveConfig, Saveable, SlotId};
use keepsake_engine::{Registry, SaveContext};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keepsake-cli", about = "CLI tool for keepsake save files")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the save files
    #[arg(long, default_value = "saves")]
    path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a save/load round trip against a demo payload
    Demo {
        /// Slot to save into
        #[arg(short, long, default_value = "1")]
        slot: u32,
    },
    /// Switch the active slot and persist the pointer
    Switch {
        /// Slot to switch to
        target: u32,
    },
    /// Delete save files: everything, one key across slots, or one file
    Wipe {
        /// Restrict deletion to this saveable key
        #[arg(long)]
        key: Option<String>,
        /// Restrict deletion to this slot (requires --key)
        #[arg(long)]
        slot: Option<u32>,
    },
}

/// Demo payload exercising the full pipeline from the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DemoCounter {
    runs: u32,
    last_message: String,
}

impl Saveable for DemoCounter {
    const KEY: &'static str = "DemoCounter";
}

fn config_for(path: PathBuf) -> SaveConfig {
    SaveConfig {
        save_path: path,
        ..SaveConfig::default()
    }
}

/// Tick the context until `done` reports true or a timeout elapses.
fn pump(ctx: &mut SaveContext, mut done: impl FnMut(&SaveContext) -> bool) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        ctx.tick();
        if done(ctx) {
            return Ok(());
        }
        anyhow::ensure!(Instant::now() < deadline, "timed out waiting for the save worker");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Demo { slot } => {
            let mut registry = Registry::new();
            registry.register::<DemoCounter>();
            let mut ctx = SaveContext::new(config_for(cli.path), registry);

            ctx.initialize();
            pump(&mut ctx, |c| c.is_initialized())?;

            if ctx.current_slot() != SlotId(slot) {
                let switched = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&switched);
                ctx.switch_slot(SlotId(slot), move || flag.store(true, Ordering::SeqCst));
                pump(&mut ctx, |_| switched.load(Ordering::SeqCst))?;
            }

            let before = ctx.get_cached::<DemoCounter>();
            println!(
                "Loaded slot {}: runs={}, last_message={:?}",
                ctx.current_slot(),
                before.runs,
                before.last_message
            );

            let next = DemoCounter {
                runs: before.runs + 1,
                last_message: format!("run #{}", before.runs + 1),
            };
            ctx.submit(next, || tracing::info!("demo counter saved"));
            pump(&mut ctx, |c| {
                c.get_cached::<DemoCounter>().runs == before.runs + 1
            })?;

            let after = ctx.get_cached::<DemoCounter>();
            println!(
                "Saved slot {}: runs={}, last_message={:?}",
                ctx.current_slot(),
                after.runs,
                after.last_message
            );
        }
        Commands::Switch { target } => {
            let mut registry = Registry::new();
            registry.register::<DemoCounter>();
            let mut ctx = SaveContext::new(config_for(cli.path), registry);

            ctx.initialize();
            pump(&mut ctx, |c| c.is_initialized())?;
            let from = ctx.current_slot();

            let switched = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&switched);
            ctx.switch_slot(SlotId(target), move || flag.store(true, Ordering::SeqCst));
            pump(&mut ctx, |_| switched.load(Ordering::SeqCst))?;
            println!("Switched slot: {from} -> {target}");
        }
        Commands::Wipe { key, slot } => {
            let store = keepsake_store::FileStore::new(&config_for(cli.path));
            match (key, slot) {
                (Some(key), Some(slot)) => {
                    let removed = store.delete_exact(&key, SlotId(slot))?;
                    println!(
                        "{} {key} in slot {slot}",
                        if removed { "Deleted" } else { "No file for" }
                    );
                }
                (Some(key), None) => {
                    let removed = store.delete_by_key(&key)?;
                    println!("Deleted {removed} file(s) for {key}");
                }
                (None, Some(_)) => {
                    anyhow::bail!("--slot requires --key");
                }
                (None, None) => {
                    let removed = store.delete_all()?;
                    println!("Deleted {removed} save file(s)");
                }
            }
        }
    }

    Ok(())
}
