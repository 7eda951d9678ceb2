//! Push local data to the shared folder.

use anyhow::{Context, Result};
use std::path::Path;

use super::{open, print_outcome};
use crate::config::CliConfig;

/// Run the push command.
pub async fn run(data_dir: &Path, config: &CliConfig, online: bool) -> Result<()> {
    let sync = open(data_dir, config, online).await?;
    let local = sync.load_local().await?;

    println!("Pushing {} entities...", local.entity_count());
    let outcome = sync.sync_to_cloud(local).await.context("Push failed")?;
    print_outcome(&outcome);
    Ok(())
}
