//! Configure the shared folder, or forget it.

use anyhow::{Context, Result};
use std::path::Path;

use minutes_sync_client::{FolderRemoteStore, ProviderKind};

use super::{open, open_store, open_with};
use crate::config::CliConfig;

/// Run the configure command.
pub async fn run(data_dir: &Path, config: &CliConfig, folder: &Path) -> Result<()> {
    tokio::fs::create_dir_all(folder)
        .await
        .with_context(|| format!("Failed to create {}", folder.display()))?;
    let folder = tokio::fs::canonicalize(folder)
        .await
        .with_context(|| format!("Failed to resolve {}", folder.display()))?;

    let store = open_store(data_dir).await?;
    let sync = open_with(store, FolderRemoteStore::new(&folder), config, true).await?;
    sync.configure_sync_provider(
        ProviderKind::Folder,
        serde_json::json!({ "path": folder.display().to_string() }),
    )
    .await
    .with_context(|| format!("Cannot sync through {}", folder.display()))?;

    println!("Sync configured!");
    println!();
    println!("  Folder: {}", folder.display());
    println!("  Device: {} ({})", sync.device().name, sync.device().id);
    Ok(())
}

/// Run the reset command.
pub async fn reset(data_dir: &Path, config: &CliConfig) -> Result<()> {
    let sync = open(data_dir, config, true).await?;
    sync.clear_sync_data()
        .await
        .context("Failed to clear sync data")?;

    println!("Sync data cleared. Local data and device identity were kept.");
    Ok(())
}
