//! Inspect and edit the local dataset.

use anyhow::{Context, Result};
use std::path::Path;

use minutes_sync_types::{Dataset, EntityType};

use super::open;
use crate::config::CliConfig;

/// Merge a dataset file into the local store.
pub async fn import(data_dir: &Path, config: &CliConfig, file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let incoming: Dataset = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a valid dataset", file.display()))?;

    let sync = open(data_dir, config, true).await?;
    let local = sync.load_local().await?;
    let merged = minutes_sync_core::merge(&local, &incoming);
    sync.save_local(&merged).await?;

    println!("Imported {}", file.display());
    println!();
    println!("  Meetings:     {}", merged.meetings.len());
    println!("  Stakeholders: {}", merged.stakeholders.len());
    println!("  Categories:   {}", merged.stakeholder_categories.len());
    Ok(())
}

/// Print the local dataset.
pub async fn show(data_dir: &Path, config: &CliConfig, json: bool) -> Result<()> {
    let sync = open(data_dir, config, true).await?;
    let data = sync.load_local().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("Meetings ({}):", data.meetings.len());
    for meeting in &data.meetings {
        println!("  {}  {}", meeting.id, meeting.title);
    }
    println!("Stakeholders ({}):", data.stakeholders.len());
    for stakeholder in &data.stakeholders {
        println!("  {}  {}", stakeholder.id, stakeholder.name);
    }
    println!("Categories ({}):", data.stakeholder_categories.len());
    for category in &data.stakeholder_categories {
        let name = category
            .name
            .as_deref()
            .or(category.label.as_deref())
            .unwrap_or("-");
        println!("  {}  {}", category.id.as_deref().unwrap_or("-"), name);
    }
    println!("Tombstones: {}", data.deleted_items.len());
    Ok(())
}

/// Delete one local entity.
pub async fn delete(data_dir: &Path, config: &CliConfig, kind: EntityType, id: &str) -> Result<()> {
    let sync = open(data_dir, config, true).await?;

    if sync.delete_entity(kind, id).await? {
        println!("Deleted {} {}", kind, id);
    } else {
        println!("No local {} '{}', deletion recorded anyway", kind, id);
    }
    println!("Run 'minutes-sync push' to share the deletion.");
    Ok(())
}
