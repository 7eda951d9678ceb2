//! Keep syncing in the foreground until Ctrl-C.

use anyhow::{bail, Result};
use std::path::Path;

use minutes_sync_client::SyncEvent;

use super::open;
use crate::config::CliConfig;

/// Run the watch command.
pub async fn run(data_dir: &Path, config: &CliConfig, online: bool) -> Result<()> {
    let sync = open(data_dir, config, online).await?;
    if !sync.is_configured() {
        bail!("Sync is not configured. Run 'minutes-sync configure <folder>' first.");
    }

    let listener = sync.add_listener(|event| println!("[{}] {}", event.name(), describe(event)));

    if sync.is_online() {
        if let Err(e) = sync.sync_from_cloud().await {
            tracing::warn!("Initial pull failed: {}", e);
        }
    }

    sync.start_auto_sync();
    sync.start_queue_processor();

    println!(
        "Watching (auto-sync every {}s, queue every {}s). Press Ctrl-C to stop.",
        config.auto_sync_interval_secs, config.queue_process_interval_secs
    );
    tokio::signal::ctrl_c().await?;

    println!();
    println!("Stopping...");
    sync.stop();
    sync.remove_listener(listener);
    Ok(())
}

fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::StatusChange { status, error } => match error {
            Some(error) => format!("{} ({})", status, error),
            None => status.to_string(),
        },
        SyncEvent::SyncSuccess {
            direction, data, ..
        } => match data {
            Some(data) => format!("{:?}, {} entities", direction, data.entity_count()),
            None => format!("{:?}", direction),
        },
        SyncEvent::SyncError { error } => error.clone(),
        SyncEvent::ConflictResolved { resolution, .. } => resolution.to_string(),
        SyncEvent::OperationQueued { id, kind, .. } => format!("{:?} {}", kind, id),
        SyncEvent::OperationFailed { operation, error } => {
            format!("{} dropped: {}", operation.id, error)
        }
    }
}
