//! Drain the offline queue.

use anyhow::{Context, Result};
use std::path::Path;

use super::open;
use crate::config::CliConfig;

/// Run the drain command.
pub async fn drain(data_dir: &Path, config: &CliConfig, online: bool) -> Result<()> {
    let sync = open(data_dir, config, online).await?;

    let queued = sync.queued_operations().await;
    if queued.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    println!("Draining {} queued operation(s)...", queued.len());

    let report = sync.process_queue().await.context("Drain failed")?;
    let remaining = sync.queued_operations().await.len();

    println!();
    println!("  Completed: {}", report.completed);
    println!("  Retried:   {}", report.retried);
    println!("  Failed:    {}", report.failed);
    println!("  Remaining: {}", remaining);
    Ok(())
}
