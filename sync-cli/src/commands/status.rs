//! Show sync status.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;

use minutes_sync_types::Timestamp;

use super::open;
use crate::config::CliConfig;

/// Run the status command.
pub async fn run(data_dir: &Path, config: &CliConfig, online: bool, json: bool) -> Result<()> {
    let sync = open(data_dir, config, online).await?;
    let status = sync.get_sync_status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("=== minutes-sync status ===");
    println!();
    println!("Device:");
    println!("  ID:   {}", status.device_id);
    println!("  Name: {}", status.device_name);
    println!();

    let Some(settings) = sync.provider_settings() else {
        println!("Provider: NOT CONFIGURED");
        println!();
        println!("Run 'minutes-sync configure <folder>' to start syncing.");
        return Ok(());
    };

    println!("Provider:");
    println!("  Kind:    {}", settings.kind);
    if let Some(path) = settings.config.get("path").and_then(|p| p.as_str()) {
        println!("  Folder:  {}", path);
    }
    println!("  Enabled: {}", if status.enabled { "yes" } else { "no" });
    println!();

    println!("Sync:");
    println!("  State:     {}", status.status);
    println!(
        "  Last sync: {}",
        status
            .last_sync
            .map(|t| format_timestamp(t, Utc::now()))
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Queued:    {}", status.queued_operations);
    println!(
        "  Network:   {}",
        if status.is_online { "online" } else { "OFFLINE" }
    );

    Ok(())
}

/// Format a timestamp relative to `now`.
fn format_timestamp(ts: Timestamp, now: Timestamp) -> String {
    let diff = (now - ts).num_seconds().max(0);

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
