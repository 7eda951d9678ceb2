//! CLI command implementations.

pub mod configure;
pub mod data;
pub mod pull;
pub mod push;
pub mod queue;
pub mod status;
pub mod watch;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use minutes_sync_client::storage::{keys, load_json};
use minutes_sync_client::{
    ConnectivityMonitor, FileStore, FolderRemoteStore, ProviderKind, ProviderSettings,
    SyncOrchestrator, SyncOutcome,
};

use crate::config::CliConfig;

/// Orchestrator as wired by the CLI.
pub type Orchestrator = SyncOrchestrator<FolderRemoteStore, FileStore>;

/// Directory of the local key-value store.
pub fn store_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("store")
}

/// Open the local store.
pub async fn open_store(data_dir: &Path) -> Result<FileStore> {
    FileStore::open(store_dir(data_dir))
        .await
        .context("Failed to open local store")
}

/// Shared folder recorded by `configure`, if any.
pub async fn configured_folder(store: &FileStore) -> Result<Option<PathBuf>> {
    let settings: Option<ProviderSettings> = load_json(store, keys::SYNC_CONFIG)
        .await
        .context("Failed to read sync configuration")?;
    Ok(settings
        .filter(|s| s.kind == ProviderKind::Folder)
        .and_then(|s| s.config.get("path")?.as_str().map(PathBuf::from)))
}

/// Open the orchestrator against the configured folder.
///
/// Before `configure` has run, the remote points at `<data-dir>/remote`;
/// every sync fails with "not configured" before touching it.
pub async fn open(data_dir: &Path, config: &CliConfig, online: bool) -> Result<Orchestrator> {
    let store = open_store(data_dir).await?;
    let folder = configured_folder(&store)
        .await?
        .unwrap_or_else(|| data_dir.join("remote"));
    open_with(store, FolderRemoteStore::new(folder), config, online).await
}

/// Open the orchestrator with an explicit remote.
pub async fn open_with(
    store: FileStore,
    remote: FolderRemoteStore,
    config: &CliConfig,
    online: bool,
) -> Result<Orchestrator> {
    SyncOrchestrator::builder(remote, store)
        .with_config(config.to_sync_config())
        .with_connectivity(ConnectivityMonitor::new(online))
        .build()
        .await
        .context("Failed to initialize sync")
}

/// Print the result of a push or pull.
pub fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Uploaded => println!("Push successful!"),
        SyncOutcome::Unchanged => println!("Already up to date."),
        SyncOutcome::Pulled(data) => {
            println!("Pull successful!");
            println!();
            println!("  Meetings:     {}", data.meetings.len());
            println!("  Stakeholders: {}", data.stakeholders.len());
            println!("  Categories:   {}", data.stakeholder_categories.len());
        }
        SyncOutcome::Queued(id) => {
            println!("Push queued (offline mode)");
            println!("  Operation: {}", id);
            println!();
            println!("Run 'minutes-sync drain' once the connection is back.");
        }
        SyncOutcome::Offline => println!("Offline, nothing to do."),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use minutes_sync_types::{Dataset, Meeting};

    /// Configure `data_dir` to sync through `remote`.
    pub async fn configured(data_dir: &Path, remote: &Path) {
        configure::run(data_dir, &CliConfig::default(), remote)
            .await
            .unwrap();
    }

    /// Write a dataset file with the given meeting ids.
    pub async fn dataset_file(dir: &Path, ids: &[&str]) -> PathBuf {
        let now = chrono::Utc::now();
        let data = ids.iter().fold(Dataset::new(), |data, id| {
            data.with_meeting(Meeting::new(*id, format!("Meeting {id}"), now))
        });
        let path = dir.join("import.json");
        tokio::fs::write(&path, serde_json::to_vec(&data).unwrap())
            .await
            .unwrap();
        path
    }

    /// Local dataset of `data_dir`.
    pub async fn local(data_dir: &Path) -> Dataset {
        open(data_dir, &CliConfig::default(), true)
            .await
            .unwrap()
            .load_local()
            .await
            .unwrap()
    }
}
