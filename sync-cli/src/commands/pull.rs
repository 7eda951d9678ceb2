//! Pull from the shared folder, and settle conflicts by hand.

use anyhow::{Context, Result};
use std::path::Path;

use minutes_sync_core::Resolution;

use super::{open, print_outcome};
use crate::config::CliConfig;

/// Run the pull command.
pub async fn run(data_dir: &Path, config: &CliConfig, online: bool) -> Result<()> {
    let sync = open(data_dir, config, online).await?;

    println!("Pulling...");
    let outcome = sync.sync_from_cloud().await.context("Pull failed")?;
    print_outcome(&outcome);
    Ok(())
}

/// Run the resolve command.
pub async fn resolve(
    data_dir: &Path,
    config: &CliConfig,
    online: bool,
    resolution: Resolution,
) -> Result<()> {
    let sync = open(data_dir, config, online).await?;

    let data = sync
        .resolve_conflict(resolution)
        .await
        .with_context(|| format!("Failed to resolve with {}", resolution))?;

    println!("Resolved with {}", resolution);
    println!();
    println!("  Meetings:     {}", data.meetings.len());
    println!("  Stakeholders: {}", data.stakeholders.len());
    println!("  Categories:   {}", data.stakeholder_categories.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{data, push, test_support};
    use tempfile::tempdir;

    #[tokio::test]
    async fn pushed_data_reaches_second_device() {
        let remote = tempdir().unwrap();
        let laptop = tempdir().unwrap();
        let desktop = tempdir().unwrap();
        let config = CliConfig::default();
        test_support::configured(laptop.path(), remote.path()).await;
        test_support::configured(desktop.path(), remote.path()).await;

        let file = test_support::dataset_file(laptop.path(), &["m1", "m2"]).await;
        data::import(laptop.path(), &config, &file).await.unwrap();
        push::run(laptop.path(), &config, true).await.unwrap();

        run(desktop.path(), &config, true).await.unwrap();

        let mut ids: Vec<_> = test_support::local(desktop.path())
            .await
            .meetings
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn deletion_reaches_second_device() {
        let remote = tempdir().unwrap();
        let laptop = tempdir().unwrap();
        let desktop = tempdir().unwrap();
        let config = CliConfig::default();
        test_support::configured(laptop.path(), remote.path()).await;
        test_support::configured(desktop.path(), remote.path()).await;

        let file = test_support::dataset_file(laptop.path(), &["m1", "m2"]).await;
        data::import(laptop.path(), &config, &file).await.unwrap();
        push::run(laptop.path(), &config, true).await.unwrap();
        run(desktop.path(), &config, true).await.unwrap();

        data::delete(desktop.path(), &config, minutes_sync_types::EntityType::Meeting, "m1")
            .await
            .unwrap();
        push::run(desktop.path(), &config, true).await.unwrap();
        run(laptop.path(), &config, true).await.unwrap();

        let meetings = test_support::local(laptop.path()).await.meetings;
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].id, "m2");
    }

    #[tokio::test]
    async fn resolve_with_cloud_replaces_local() {
        let remote = tempdir().unwrap();
        let laptop = tempdir().unwrap();
        let desktop = tempdir().unwrap();
        let config = CliConfig::default();
        test_support::configured(laptop.path(), remote.path()).await;
        test_support::configured(desktop.path(), remote.path()).await;

        let file = test_support::dataset_file(laptop.path(), &["m1"]).await;
        data::import(laptop.path(), &config, &file).await.unwrap();
        push::run(laptop.path(), &config, true).await.unwrap();
        let file = test_support::dataset_file(desktop.path(), &["d1"]).await;
        data::import(desktop.path(), &config, &file).await.unwrap();

        resolve(desktop.path(), &config, true, Resolution::UseCloud)
            .await
            .unwrap();

        let meetings = test_support::local(desktop.path()).await.meetings;
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].id, "m1");
    }
}
