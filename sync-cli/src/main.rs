//! # minutes-sync
//!
//! Command-line front end for syncing meeting minutes through a shared folder.
//!
//! ## Commands
//!
//! - `configure`: Point this device at a shared folder
//! - `status`: Show device, provider and queue status
//! - `import` / `show` / `delete`: Edit the local dataset
//! - `push` / `pull`: Sync with the shared folder
//! - `resolve`: Settle diverging data by hand
//! - `drain`: Run operations queued while offline
//! - `watch`: Sync on a timer until Ctrl-C
//! - `reset`: Forget the sync configuration
//!
//! ## Example
//!
//! ```bash
//! # On the laptop
//! minutes-sync configure ~/Dropbox/minutes
//! minutes-sync import meetings.json
//! minutes-sync push
//!
//! # On the desktop
//! minutes-sync configure ~/Dropbox/minutes
//! minutes-sync pull
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use minutes_sync_core::Resolution;
use minutes_sync_types::EntityType;

mod commands;
mod config;

use commands::{configure, data, pull, push, queue, status, watch};
use config::CliConfig;

/// Sync meeting minutes between devices through a shared folder.
#[derive(Parser, Debug)]
#[command(name = "minutes-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the local store, device identity and config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Behave as if the network were down (pushes are queued)
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync through a shared folder (created if missing)
    Configure {
        /// Shared folder, e.g. inside a Dropbox or network drive
        path: PathBuf,
    },

    /// Show sync status
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Push local data to the shared folder
    Push,

    /// Pull from the shared folder and merge locally
    Pull,

    /// Merge a dataset JSON file into local data
    Import {
        /// Dataset file
        file: PathBuf,
    },

    /// Print local data
    Show {
        /// Print the raw dataset as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a local entity
    Delete {
        /// meeting, stakeholder or category
        kind: EntityType,

        /// Entity id (categories also accept their name)
        id: String,
    },

    /// Run operations queued while offline
    Drain,

    /// Settle diverging data by hand
    Resolve {
        /// use_local, use_cloud or merge
        resolution: Resolution,
    },

    /// Keep syncing in the foreground until Ctrl-C
    Watch,

    /// Forget the shared folder and the sync state
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let config = CliConfig::load(&data_dir).await?;
    init_tracing(&config.log_filter);

    let online = !cli.offline;
    match cli.command {
        Commands::Configure { path } => configure::run(&data_dir, &config, &path).await?,
        Commands::Status { json } => status::run(&data_dir, &config, online, json).await?,
        Commands::Push => push::run(&data_dir, &config, online).await?,
        Commands::Pull => pull::run(&data_dir, &config, online).await?,
        Commands::Import { file } => data::import(&data_dir, &config, &file).await?,
        Commands::Show { json } => data::show(&data_dir, &config, json).await?,
        Commands::Delete { kind, id } => data::delete(&data_dir, &config, kind, &id).await?,
        Commands::Drain => queue::drain(&data_dir, &config, online).await?,
        Commands::Resolve { resolution } => {
            pull::resolve(&data_dir, &config, online, resolution).await?
        }
        Commands::Watch => watch::run(&data_dir, &config, online).await?,
        Commands::Reset => configure::reset(&data_dir, &config).await?,
    }

    Ok(())
}

/// Log to stderr. `RUST_LOG` overrides the configured filter.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory for minutes-sync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("app", "minutes", "minutes-sync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
