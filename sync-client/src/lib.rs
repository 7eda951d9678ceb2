//! # sync-client
//!
//! Sync orchestrator for minutes-sync.
//!
//! This is the library applications embed to keep their meeting data in
//! step across devices through a shared remote blob.
//!
//! ## Features
//!
//! - **Offline-first**: pushes made offline go to a durable, prioritized queue
//! - **Merge before upload**: remote changes are never overwritten blindly
//! - **Integrity checks**: every download is verified against its checksum
//! - **Backend abstraction**: pluggable remote stores (folder, mock, your own)
//! - **Pure core**: merge, delta and queue logic live in sync-core
//!
//! ## Example
//!
//! ```ignore
//! use minutes_sync_client::{FileStore, FolderRemoteStore, ProviderKind, SyncOrchestrator};
//!
//! let store = FileStore::open("/var/lib/minutes").await?;
//! let remote = FolderRemoteStore::new("/home/me/Drive/minutes");
//! let sync = SyncOrchestrator::builder(remote, store).build().await?;
//!
//! sync.configure_sync_provider(ProviderKind::Folder, serde_json::json!({})).await?;
//! sync.add_listener(|event| println!("{}", event.name()));
//!
//! // Push local changes
//! sync.sync_to_cloud(sync.load_local().await?).await?;
//!
//! // Pull changes from other devices
//! sync.sync_from_cloud().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod credentials;
pub mod device;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod remote;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ProviderKind, ProviderSettings, SyncConfig, DEFAULT_REMOTE_KEY};
pub use connectivity::ConnectivityMonitor;
pub use credentials::{AccessToken, CredentialProvider, TokenManager};
pub use device::DeviceRecord;
pub use error::{ClientError, CredentialError, RemoteError, StorageError};
pub use events::{ListenerHandle, ListenerRegistry, SyncDirection, SyncEvent};
pub use orchestrator::{
    DrainReport, OrchestratorBuilder, SyncOrchestrator, SyncOutcome, SyncStatusReport,
};
pub use remote::{
    FolderRemoteStore, MockRemoteStore, MockTokenBackend, RemoteStore, TokenBackend,
    TokenRemoteStore, UploadReceipt,
};
pub use storage::{FileStore, KeyValueStore, LocalData, MemoryStore};
