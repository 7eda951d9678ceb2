//! SyncOrchestrator - coordinates pushes, pulls and the operation queue.
//!
//! One orchestrator owns one remote store and one local store. All syncs
//! are serialized through a single lock: a push that finds a sync already
//! running is queued instead of waiting, pulls and queued operations wait
//! their turn.
//!
//! # Example
//!
//! ```ignore
//! use minutes_sync_client::{FolderRemoteStore, FileStore, ProviderKind, SyncOrchestrator};
//!
//! let store = FileStore::open("/var/lib/minutes").await?;
//! let remote = FolderRemoteStore::new("/home/me/Drive/minutes");
//! let sync = SyncOrchestrator::builder(remote, store).build().await?;
//!
//! sync.configure_sync_provider(ProviderKind::Folder, serde_json::json!({})).await?;
//! let local = sync.load_local().await?;
//! sync.sync_to_cloud(local).await?;
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use minutes_sync_core::{
    build_payload, compute_delta, merge, resolve_conflict, verify_payload, Conflict,
    ConflictDetector, OperationKind, OperationQueue, OperationStatus, QueuedOperation, Resolution,
    RetryDecision, StatusEvent, SyncStatus, TombstoneSet, PRIORITY_DEFAULT, PRIORITY_HIGH,
    PRIORITY_LOW,
};
use minutes_sync_types::{Dataset, DeviceId, EntityType, OperationId, SyncPayload, Timestamp};

use crate::clock::{Clock, SystemClock};
use crate::config::{ProviderKind, ProviderSettings, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::device::{self, DeviceRecord};
use crate::error::{ClientError, CredentialError, RemoteError};
use crate::events::{ListenerHandle, ListenerRegistry, SyncDirection, SyncEvent};
use crate::remote::RemoteStore;
use crate::storage::{keys, load_json, save_json, KeyValueStore, LocalData};

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The merged dataset was uploaded.
    Uploaded,
    /// The remote already held the merged dataset; nothing was uploaded.
    Unchanged,
    /// Remote data was merged into the local store.
    Pulled(Dataset),
    /// The request was put on the operation queue.
    Queued(OperationId),
    /// Offline; nothing happened.
    Offline,
}

/// Summary of one queue drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Operations executed successfully.
    pub completed: usize,
    /// Failed executions that were scheduled for another attempt.
    pub retried: usize,
    /// Operations dropped.
    pub failed: usize,
}

/// Snapshot returned by [`SyncOrchestrator::get_sync_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    /// A provider has been configured.
    pub configured: bool,
    /// Configured provider kind.
    pub provider: Option<ProviderKind>,
    /// Sync is enabled.
    pub enabled: bool,
    /// Time of the last completed sync.
    pub last_sync: Option<Timestamp>,
    /// Current connectivity.
    pub is_online: bool,
    /// This device.
    pub device_id: DeviceId,
    /// This device's name.
    pub device_name: String,
    /// Operations waiting in the queue.
    pub queued_operations: usize,
    /// Orchestrator state.
    pub status: SyncStatus,
}

struct State {
    status: SyncStatus,
    settings: Option<ProviderSettings>,
    last_seen: Option<Timestamp>,
}

struct Inner<R, S> {
    remote: R,
    store: S,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    connectivity: ConnectivityMonitor,
    device: DeviceRecord,
    detector: ConflictDetector,
    listeners: ListenerRegistry,
    state: Mutex<State>,
    queue: AsyncMutex<OperationQueue>,
    sync_lock: AsyncMutex<()>,
    drain_lock: AsyncMutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Builder for [`SyncOrchestrator`].
pub struct OrchestratorBuilder<R, S> {
    remote: R,
    store: S,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    connectivity: ConnectivityMonitor,
}

impl<R, S> OrchestratorBuilder<R, S>
where
    R: RemoteStore + 'static,
    S: KeyValueStore + 'static,
{
    /// Set the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock used for timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a connectivity monitor with the host application.
    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Load persisted state and create the orchestrator.
    ///
    /// Operations left `processing` by a previous run are reset to
    /// `pending`.
    pub async fn build(self) -> Result<SyncOrchestrator<R, S>, ClientError> {
        let now = self.clock.now();
        let device =
            device::load_or_create(&self.store, self.config.device_name.as_deref(), now).await?;
        let settings: Option<ProviderSettings> =
            load_json(&self.store, keys::SYNC_CONFIG).await?;

        let persisted: Vec<QueuedOperation> = load_json(&self.store, keys::OPERATION_QUEUE)
            .await?
            .unwrap_or_default();
        let restored = !persisted.is_empty();
        let queue = OperationQueue::from_operations(
            persisted,
            self.config.queue_capacity,
            self.config.max_retries,
        );
        if restored {
            save_json(&self.store, keys::OPERATION_QUEUE, queue.operations()).await?;
            tracing::info!("Restored {} queued operations", queue.len());
        }

        tracing::info!(
            "Sync orchestrator ready: device={} ({}), configured={}",
            device.id,
            device.name,
            settings.is_some()
        );

        Ok(SyncOrchestrator {
            inner: Arc::new(Inner {
                detector: ConflictDetector::new(self.config.conflict_tolerance),
                remote: self.remote,
                store: self.store,
                config: self.config,
                clock: self.clock,
                connectivity: self.connectivity,
                listeners: ListenerRegistry::new(),
                state: Mutex::new(State {
                    status: SyncStatus::Idle,
                    settings,
                    last_seen: device.last_seen,
                }),
                device,
                queue: AsyncMutex::new(queue),
                sync_lock: AsyncMutex::new(()),
                drain_lock: AsyncMutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

/// Coordinates sync between a local store and a remote store.
///
/// Cloning is cheap; clones share all state.
pub struct SyncOrchestrator<R, S> {
    inner: Arc<Inner<R, S>>,
}

impl<R, S> Clone for SyncOrchestrator<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, S> std::fmt::Debug for SyncOrchestrator<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("device", &self.inner.device.id)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<R, S> SyncOrchestrator<R, S>
where
    R: RemoteStore + 'static,
    S: KeyValueStore + 'static,
{
    /// Start building an orchestrator with default configuration, the
    /// system clock, and an online connectivity monitor.
    pub fn builder(remote: R, store: S) -> OrchestratorBuilder<R, S> {
        OrchestratorBuilder {
            remote,
            store,
            config: SyncConfig::default(),
            clock: Arc::new(SystemClock),
            connectivity: ConnectivityMonitor::default(),
        }
    }

    /// This device's identity, with the time of its last successful sync.
    pub fn device(&self) -> DeviceRecord {
        DeviceRecord {
            last_seen: self.state().last_seen,
            ..self.inner.device.clone()
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The remote store.
    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// The local store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// The connectivity monitor.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Current state.
    pub fn status(&self) -> SyncStatus {
        self.state().status
    }

    /// True when a provider is configured and sync is enabled.
    pub fn is_configured(&self) -> bool {
        self.state().settings.as_ref().is_some_and(|s| s.enabled)
    }

    /// True when the connectivity monitor reports online.
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Register an event listener.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add_listener(listener)
    }

    /// Unregister an event listener.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.listeners.remove_listener(handle)
    }

    // =========================================================================
    // Provider configuration
    // =========================================================================

    /// Test the connection to the remote store and persist the provider.
    ///
    /// Nothing is persisted when the connection test fails.
    pub async fn configure_sync_provider(
        &self,
        kind: ProviderKind,
        config: serde_json::Value,
    ) -> Result<(), ClientError> {
        if let Err(e) = self.timed(self.inner.remote.test_connection()).await {
            tracing::warn!("Connection test for {} provider failed: {}", kind, e);
            return Err(e);
        }

        let settings = ProviderSettings {
            kind,
            config,
            enabled: true,
            configured_at: self.inner.clock.now(),
        };
        save_json(&self.inner.store, keys::SYNC_CONFIG, &settings).await?;
        self.state().settings = Some(settings);

        tracing::info!("Sync provider configured: {}", kind);
        Ok(())
    }

    /// Enable or disable sync without forgetting the provider.
    pub async fn set_sync_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        let settings = {
            let mut state = self.state();
            let Some(settings) = state.settings.as_mut() else {
                return Err(ClientError::NotConfigured);
            };
            settings.enabled = enabled;
            settings.clone()
        };
        save_json(&self.inner.store, keys::SYNC_CONFIG, &settings).await?;
        tracing::info!("Sync {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Persisted provider settings.
    pub fn provider_settings(&self) -> Option<ProviderSettings> {
        self.state().settings.clone()
    }

    // =========================================================================
    // Local data
    // =========================================================================

    /// Read the local dataset.
    pub async fn load_local(&self) -> Result<Dataset, ClientError> {
        Ok(LocalData::new(&self.inner.store).load().await?)
    }

    /// Replace the local dataset. Waits for a running sync to finish.
    pub async fn save_local(&self, data: &Dataset) -> Result<(), ClientError> {
        let _guard = self.inner.sync_lock.lock().await;
        Ok(LocalData::new(&self.inner.store).save(data).await?)
    }

    /// Delete a local entity and record its tombstone.
    ///
    /// Returns whether a local entity was removed.
    pub async fn delete_entity(&self, kind: EntityType, id: &str) -> Result<bool, ClientError> {
        let _guard = self.inner.sync_lock.lock().await;
        let now = self.inner.clock.now();
        let removed = LocalData::new(&self.inner.store)
            .delete_entity(kind, id, now)
            .await?;
        tracing::debug!("Deleted {} {} (found locally: {})", kind, id, removed);
        Ok(removed)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Push `data` to the remote store.
    ///
    /// The remote dataset is downloaded and merged first, so nothing another
    /// device uploaded is overwritten. Entities held by the local store but
    /// missing from `data` are kept. When offline, or when another sync is
    /// running, the push is queued instead; offline pushes made through this
    /// call are protected from eviction.
    pub async fn sync_to_cloud(&self, data: Dataset) -> Result<SyncOutcome, ClientError> {
        self.push_or_enqueue(data, PRIORITY_HIGH).await
    }

    async fn push_or_enqueue(
        &self,
        data: Dataset,
        priority: u8,
    ) -> Result<SyncOutcome, ClientError> {
        self.ensure_configured()?;

        if !self.is_online() {
            tracing::info!("Offline, queueing upload");
            let id = self
                .enqueue(OperationKind::SyncToCloud, Some(data), priority)
                .await?;
            self.transition(StatusEvent::WentOffline, None);
            return Ok(SyncOutcome::Queued(id));
        }

        let Ok(_guard) = self.inner.sync_lock.try_lock() else {
            tracing::debug!("Sync in progress, queueing upload");
            let id = self
                .enqueue(
                    OperationKind::SyncToCloud,
                    Some(data),
                    priority.max(PRIORITY_DEFAULT),
                )
                .await?;
            return Ok(SyncOutcome::Queued(id));
        };

        self.run_sync(self.push(data), success_event).await
    }

    /// Pull the remote dataset and merge it into the local store.
    pub async fn sync_from_cloud(&self) -> Result<SyncOutcome, ClientError> {
        self.ensure_configured()?;

        if !self.is_online() {
            tracing::debug!("Offline, skipping pull");
            self.transition(StatusEvent::WentOffline, None);
            return Ok(SyncOutcome::Offline);
        }

        let _guard = self.inner.sync_lock.lock().await;
        self.run_sync(self.pull(), success_event).await
    }

    /// Settle diverging data explicitly.
    ///
    /// `use_local` overwrites the remote, `use_cloud` overwrites the local
    /// store, `merge` performs the regular merge. Returns the dataset now
    /// stored on both sides.
    pub async fn resolve_conflict(&self, resolution: Resolution) -> Result<Dataset, ClientError> {
        self.ensure_configured()?;
        if !self.is_online() {
            return Err(RemoteError::Network("offline".into()).into());
        }

        let _guard = self.inner.sync_lock.lock().await;
        let body = async {
            let now = self.inner.clock.now();
            let remote = self.download_payload().await?;
            let local = LocalData::new(&self.inner.store).load().await?;

            let conflict = match &remote {
                Some(remote) => self.detect(&local, remote, now)?,
                None => None,
            };
            let remote_data = remote.as_ref().map(|r| r.data.clone()).unwrap_or_default();
            let resolved = resolve_conflict(resolution, &local, &remote_data);
            let payload = self.payload(resolved, now)?;
            self.upload_if_changed(&payload, remote.as_ref()).await?;
            self.persist_synced(&payload.data, now).await?;

            tracing::info!("Conflict resolved: {}", resolution);
            self.emit(SyncEvent::ConflictResolved {
                conflict,
                resolution,
            });
            Ok::<_, ClientError>(payload.data)
        };

        self.run_sync(body, |data: &Dataset| SyncEvent::SyncSuccess {
            direction: SyncDirection::FromCloud,
            data: Some(data.clone()),
            uploaded: false,
        })
        .await
    }

    // =========================================================================
    // Operation queue
    // =========================================================================

    /// Add an operation to the durable queue.
    ///
    /// When online, a drain is started in the background.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        data: Option<Dataset>,
        priority: u8,
    ) -> Result<OperationId, ClientError> {
        let now = self.inner.clock.now();
        let enqueued = {
            let mut queue = self.inner.queue.lock().await;
            let enqueued = queue.enqueue(kind, data, priority, now)?;
            self.persist_queue(&queue).await?;
            enqueued
        };

        if let Some(mut evicted) = enqueued.evicted {
            tracing::warn!("Queue full, evicted operation {} ({})", evicted.id, evicted.kind);
            evicted.status = OperationStatus::Failed;
            self.emit(SyncEvent::OperationFailed {
                operation: evicted,
                error: "evicted: operation queue full".into(),
            });
        }

        tracing::debug!("Queued {} operation {} (priority {})", kind, enqueued.id, priority);
        self.emit(SyncEvent::OperationQueued {
            id: enqueued.id,
            kind,
            priority,
        });

        if self.is_online() {
            self.spawn_drain();
        }
        Ok(enqueued.id)
    }

    /// Copies of the queued operations, in execution order.
    pub async fn queued_operations(&self) -> Vec<QueuedOperation> {
        self.inner.queue.lock().await.operations().to_vec()
    }

    /// Execute queued operations until the queue is empty or connectivity
    /// is lost.
    ///
    /// Returns immediately if another drain is running. Retryable failures
    /// back off exponentially; operations are dropped after `max_retries`
    /// failed executions or on the first non-retryable error.
    pub async fn process_queue(&self) -> Result<DrainReport, ClientError> {
        let Ok(_draining) = self.inner.drain_lock.try_lock() else {
            tracing::debug!("Queue drain already running");
            return Ok(DrainReport::default());
        };

        let mut report = DrainReport::default();
        loop {
            if !self.is_online() || !self.is_configured() {
                break;
            }

            let next = {
                let mut queue = self.inner.queue.lock().await;
                let next = queue.next_pending();
                if next.is_some() {
                    self.persist_queue(&queue).await?;
                }
                next
            };
            let Some(op) = next else { break };

            tracing::debug!(
                operation_id = %op.id,
                retry_count = op.retry_count,
                "Executing queued {} operation",
                op.kind
            );

            match self.execute(&op).await {
                Ok(()) => {
                    let mut queue = self.inner.queue.lock().await;
                    if queue.complete(op.id).is_ok() {
                        self.persist_queue(&queue).await?;
                    }
                    report.completed += 1;
                }
                Err(e) if e.is_retryable() && !self.is_online() => {
                    tracing::info!("Connectivity lost while running operation {}", op.id);
                    let mut queue = self.inner.queue.lock().await;
                    if queue.release(op.id).is_ok() {
                        self.persist_queue(&queue).await?;
                    }
                }
                Err(e) if e.is_retryable() => {
                    let decision = {
                        let mut queue = self.inner.queue.lock().await;
                        let decision = queue.fail(op.id, e.to_string());
                        if decision.is_ok() {
                            self.persist_queue(&queue).await?;
                        }
                        decision
                    };
                    match decision {
                        Ok(RetryDecision::Retry { delay, attempt }) => {
                            tracing::info!(
                                operation_id = %op.id,
                                retry_count = attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Queued operation failed, retrying: {}",
                                e
                            );
                            tokio::time::sleep(delay).await;
                            let mut queue = self.inner.queue.lock().await;
                            if queue.requeue(op.id, self.inner.clock.now()).is_ok() {
                                self.persist_queue(&queue).await?;
                            }
                            report.retried += 1;
                        }
                        Ok(RetryDecision::Exhausted(dropped)) => {
                            tracing::warn!(
                                "Operation {} dropped after {} attempts: {}",
                                dropped.id,
                                dropped.retry_count,
                                e
                            );
                            self.emit(SyncEvent::OperationFailed {
                                operation: dropped,
                                error: e.to_string(),
                            });
                            report.failed += 1;
                        }
                        // Cleared while running.
                        Err(_) => {}
                    }
                }
                Err(e) => {
                    let dropped = {
                        let mut queue = self.inner.queue.lock().await;
                        let dropped = queue.abandon(op.id, e.to_string()).ok();
                        self.persist_queue(&queue).await?;
                        dropped
                    };
                    tracing::warn!("Operation {} dropped: {}", op.id, e);
                    if let Some(dropped) = dropped {
                        self.emit(SyncEvent::OperationFailed {
                            operation: dropped,
                            error: e.to_string(),
                        });
                    }
                    report.failed += 1;
                }
            }
        }

        if report != DrainReport::default() {
            tracing::info!(
                "Queue drained: {} completed, {} retried, {} failed",
                report.completed,
                report.retried,
                report.failed
            );
        }
        Ok(report)
    }

    // =========================================================================
    // Connectivity and timers
    // =========================================================================

    /// Report a connectivity change.
    ///
    /// Going offline moves to `offline`; coming back online returns to
    /// `idle` and drains the queue in the background.
    pub fn set_online(&self, online: bool) {
        if !self.inner.connectivity.set_online(online) {
            return;
        }
        self.on_connectivity(online);
        if online {
            self.spawn_drain();
        }
    }

    /// Periodically push the local dataset.
    pub fn start_auto_sync(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.auto_sync_interval;

        let handle = tokio::spawn(async move {
            tracing::info!("Auto-sync started (interval: {}s)", period.as_secs());
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;
                let Some(this) = upgrade(&weak) else { break };
                if !this.is_configured() {
                    continue;
                }
                match this.load_local().await {
                    Ok(local) => {
                        if let Err(e) = this.push_or_enqueue(local, PRIORITY_LOW).await {
                            tracing::warn!("Auto-sync failed: {}", e);
                        }
                    }
                    Err(e) => tracing::error!("Auto-sync could not read local data: {}", e),
                }
            }
        });
        self.track(handle);
    }

    /// Drain the queue periodically and whenever connectivity returns.
    pub fn start_queue_processor(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.queue_process_interval;
        let mut changes = self.inner.connectivity.subscribe();

        let handle = tokio::spawn(async move {
            tracing::info!("Queue processor started (interval: {}s)", period.as_secs());
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let change = tokio::select! {
                    _ = timer.tick() => None,
                    changed = changes.changed() => match changed {
                        Ok(()) => Some(*changes.borrow_and_update()),
                        Err(_) => break,
                    },
                };

                let Some(this) = upgrade(&weak) else { break };
                if let Some(online) = change {
                    this.on_connectivity(online);
                }
                if this.is_online() {
                    if let Err(e) = this.process_queue().await {
                        tracing::warn!("Queue drain failed: {}", e);
                    }
                }
            }
        });
        self.track(handle);
    }

    /// Stop the background timers.
    pub fn stop(&self) {
        let handles: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Report configuration, connectivity, queue depth and state.
    pub async fn get_sync_status(&self) -> Result<SyncStatusReport, ClientError> {
        let last_sync: Option<Timestamp> =
            load_json(&self.inner.store, keys::LAST_SYNC_TIME).await?;
        let queued_operations = self.inner.queue.lock().await.len();
        let (status, settings) = {
            let state = self.state();
            (state.status, state.settings.clone())
        };

        Ok(SyncStatusReport {
            configured: settings.is_some(),
            provider: settings.as_ref().map(|s| s.kind),
            enabled: settings.as_ref().is_some_and(|s| s.enabled),
            last_sync,
            is_online: self.is_online(),
            device_id: self.inner.device.id,
            device_name: self.inner.device.name.clone(),
            queued_operations,
            status,
        })
    }

    /// Forget the provider, the queue, the snapshot and the last sync time.
    ///
    /// Timers are stopped. The device identity and the local dataset are
    /// kept.
    pub async fn clear_sync_data(&self) -> Result<(), ClientError> {
        self.stop();
        let _guard = self.inner.sync_lock.lock().await;

        self.inner.queue.lock().await.clear();
        for key in keys::SYNC_KEYS {
            self.inner.store.remove_item(key).await?;
        }
        self.state().settings = None;
        self.transition(StatusEvent::Reset, None);

        tracing::info!("Sync data cleared");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_configured(&self) -> Result<(), ClientError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ClientError::NotConfigured)
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.listeners.emit(&event);
    }

    /// Apply a status event, emitting `status_change` if the state moved.
    fn transition(&self, event: StatusEvent, error: Option<String>) {
        let changed = {
            let mut state = self.state();
            let next = state.status.on_event(event);
            let changed = next != state.status;
            state.status = next;
            changed.then_some(next)
        };
        if let Some(status) = changed {
            tracing::debug!("Sync status: {}", status);
            self.emit(SyncEvent::StatusChange { status, error });
        }
    }

    fn on_connectivity(&self, online: bool) {
        if online {
            tracing::info!("Connectivity restored");
            self.transition(StatusEvent::Settled, None);
        } else {
            tracing::info!("Connectivity lost");
            self.transition(StatusEvent::WentOffline, None);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn spawn_drain(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.process_queue().await {
                tracing::warn!("Queue drain failed: {}", e);
            }
        });
    }

    /// Wrap one sync attempt in status transitions and events.
    ///
    /// Errors are logged and reported to listeners, then returned.
    async fn run_sync<T>(
        &self,
        body: impl Future<Output = Result<T, ClientError>>,
        success: impl FnOnce(&T) -> SyncEvent,
    ) -> Result<T, ClientError> {
        self.transition(StatusEvent::SyncStarted, None);
        match body.await {
            Ok(value) => {
                self.transition(StatusEvent::SyncSucceeded, None);
                self.emit(success(&value));
                self.transition(StatusEvent::Settled, None);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Sync failed: {}", e);
                let message = e.to_string();
                self.transition(StatusEvent::SyncFailed, Some(message.clone()));
                self.emit(SyncEvent::SyncError { error: message });
                self.transition(StatusEvent::Settled, None);
                Err(e)
            }
        }
    }

    async fn execute(&self, op: &QueuedOperation) -> Result<(), ClientError> {
        self.ensure_configured()?;
        let _guard = self.inner.sync_lock.lock().await;

        match op.kind {
            OperationKind::SyncToCloud => {
                // The stored dataset supersedes the one captured at enqueue
                // time unless the store has nothing.
                let local = LocalData::new(&self.inner.store).load().await?;
                let data = if has_content(&local) {
                    local
                } else {
                    op.data.clone().unwrap_or(local)
                };
                self.run_sync(self.push(data), success_event).await?;
            }
            OperationKind::SyncFromCloud => {
                self.run_sync(self.pull(), success_event).await?;
            }
        }
        Ok(())
    }

    /// Download, merge and upload. The sync lock must be held.
    async fn push(&self, data: Dataset) -> Result<SyncOutcome, ClientError> {
        let remote = self.download_payload().await?;

        if !has_content(&data) && remote.as_ref().is_some_and(|r| !r.data.is_empty()) {
            tracing::info!("Local dataset is empty, pulling remote data instead of uploading");
            return self.pull_from(remote).await;
        }

        let now = self.inner.clock.now();
        let stored = LocalData::new(&self.inner.store).load().await?;
        let local = merge(&self.with_snapshot_tombstones(data, now).await?, &stored);
        let merged = match &remote {
            Some(remote) => {
                self.report_conflict(&local, remote, now)?;
                merge(&local, &remote.data)
            }
            None => merge(&local, &Dataset::new()),
        };
        let payload = self.payload(self.apply_retention(merged, now), now)?;

        let uploaded = self.upload_if_changed(&payload, remote.as_ref()).await?;
        self.persist_synced(&payload.data, now).await?;

        Ok(if uploaded {
            SyncOutcome::Uploaded
        } else {
            SyncOutcome::Unchanged
        })
    }

    /// Download and merge into the local store. The sync lock must be held.
    async fn pull(&self) -> Result<SyncOutcome, ClientError> {
        let remote = self.download_payload().await?;
        self.pull_from(remote).await
    }

    /// Merge an already downloaded payload into the local store.
    async fn pull_from(&self, remote: Option<SyncPayload>) -> Result<SyncOutcome, ClientError> {
        let local = LocalData::new(&self.inner.store).load().await?;
        let merged = self.merge_into_local(local, remote).await?;
        Ok(SyncOutcome::Pulled(merged))
    }

    async fn merge_into_local(
        &self,
        local: Dataset,
        remote: Option<SyncPayload>,
    ) -> Result<Dataset, ClientError> {
        let now = self.inner.clock.now();
        let local = self.with_snapshot_tombstones(local, now).await?;
        let merged = match &remote {
            Some(remote) => {
                self.report_conflict(&local, remote, now)?;
                merge(&local, &remote.data)
            }
            None => {
                tracing::debug!("No remote data yet");
                merge(&local, &Dataset::new())
            }
        };
        let merged = self.apply_retention(merged, now);

        self.persist_synced(&merged, now).await?;
        tracing::info!("Merged remote data: {} entities", merged.entity_count());
        Ok(merged)
    }

    /// Record tombstones for keyed entities that disappeared from `data`
    /// since the last sync.
    ///
    /// Skipped when `data` holds no entities, so that a wiped local store
    /// is never read as "delete everything".
    async fn with_snapshot_tombstones(
        &self,
        mut data: Dataset,
        now: Timestamp,
    ) -> Result<Dataset, ClientError> {
        if data.is_empty() {
            return Ok(data);
        }
        let Some(snapshot) = load_json::<Dataset, S>(&self.inner.store, keys::SNAPSHOT).await?
        else {
            return Ok(data);
        };

        let known = TombstoneSet::from_items(&data.deleted_items);
        let derived: Vec<_> = compute_delta(Some(&snapshot), &data)
            .deletion_tombstones(now)
            .into_iter()
            .filter(|t| !known.contains(t.kind, &t.id))
            .collect();
        if !derived.is_empty() {
            tracing::debug!("Recorded {} deletions since last sync", derived.len());
            data.deleted_items.extend(derived);
        }
        Ok(data)
    }

    fn apply_retention(&self, mut data: Dataset, now: Timestamp) -> Dataset {
        let Some(retention) = self.inner.config.tombstone_retention else {
            return data;
        };
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| now.checked_sub_signed(r))
        else {
            return data;
        };

        let mut tombstones = TombstoneSet::from_items(&data.deleted_items);
        let pruned = tombstones.prune_older_than(cutoff);
        if pruned > 0 {
            tracing::debug!("Pruned {} expired tombstones", pruned);
            data.deleted_items = tombstones.to_vec();
        }
        data
    }

    fn payload(&self, data: Dataset, now: Timestamp) -> Result<SyncPayload, ClientError> {
        let device = &self.inner.device;
        Ok(build_payload(data, device.id, &device.name, now)?)
    }

    fn detect(
        &self,
        local: &Dataset,
        remote: &SyncPayload,
        now: Timestamp,
    ) -> Result<Option<Conflict>, ClientError> {
        let local = self.payload(local.clone(), now)?;
        Ok(self.inner.detector.detect(&local, remote))
    }

    /// Detect a conflict ahead of an automatic merge and report it.
    fn report_conflict(
        &self,
        local: &Dataset,
        remote: &SyncPayload,
        now: Timestamp,
    ) -> Result<(), ClientError> {
        if let Some(conflict) = self.detect(local, remote, now)? {
            tracing::info!(
                "Conflict with {} ({}ms apart), merging",
                remote.metadata.device_name,
                conflict.time_difference_ms
            );
            self.emit(SyncEvent::ConflictResolved {
                conflict: Some(conflict),
                resolution: Resolution::Merge,
            });
        }
        Ok(())
    }

    async fn upload_if_changed(
        &self,
        payload: &SyncPayload,
        remote: Option<&SyncPayload>,
    ) -> Result<bool, ClientError> {
        if remote.is_some_and(|r| r.metadata.version == payload.metadata.version) {
            tracing::debug!("Remote already at version {}, skipping upload", payload.metadata.version);
            return Ok(false);
        }

        let bytes = payload.to_bytes()?;
        let key = self.inner.config.remote_key.as_str();
        let receipt = self
            .remote_call(|| self.inner.remote.upload(key, &bytes))
            .await?;
        tracing::info!(
            "Uploaded {} entities ({} bytes, id={:?})",
            payload.data.entity_count(),
            bytes.len(),
            receipt.id
        );
        Ok(true)
    }

    /// Download and verify the remote payload.
    async fn download_payload(&self) -> Result<Option<SyncPayload>, ClientError> {
        let key = self.inner.config.remote_key.as_str();
        let Some(bytes) = self.remote_call(|| self.inner.remote.download(key)).await? else {
            return Ok(None);
        };
        let payload = SyncPayload::from_bytes(&bytes)?;
        verify_payload(&payload)?;
        Ok(Some(payload))
    }

    async fn persist_synced(&self, data: &Dataset, now: Timestamp) -> Result<(), ClientError> {
        LocalData::new(&self.inner.store).save(data).await?;
        save_json(&self.inner.store, keys::SNAPSHOT, data).await?;
        save_json(&self.inner.store, keys::LAST_SYNC_TIME, &now).await?;
        device::record_seen(&self.inner.store, &self.inner.device, now).await?;
        self.state().last_seen = Some(now);
        Ok(())
    }

    async fn persist_queue(&self, queue: &OperationQueue) -> Result<(), ClientError> {
        save_json(&self.inner.store, keys::OPERATION_QUEUE, queue.operations()).await?;
        Ok(())
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, ClientError> {
        let limit = self.inner.config.remote_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(ClientError::from),
            Err(_) => Err(ClientError::Timeout(limit)),
        }
    }

    /// Run a remote call with the timeout applied.
    ///
    /// A rejected credential triggers one refresh and one retry. A second
    /// rejection, or a failed refresh, means the user has to sign in again.
    async fn remote_call<T, F, Fut>(&self, call: F) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let reason = match self.timed(call()).await {
            Err(ClientError::Remote(RemoteError::Unauthorized(reason))) => reason,
            other => return other,
        };

        tracing::info!("Credential rejected ({}), refreshing", reason);
        self.inner
            .remote
            .refresh_credentials()
            .await
            .map_err(|e| match e {
                CredentialError::Provider(msg) => CredentialError::ReauthenticationRequired(msg),
                other => other,
            })?;

        match self.timed(call()).await {
            Err(ClientError::Remote(RemoteError::Unauthorized(reason))) => {
                Err(CredentialError::ReauthenticationRequired(reason).into())
            }
            other => other,
        }
    }
}

fn upgrade<R, S>(weak: &Weak<Inner<R, S>>) -> Option<SyncOrchestrator<R, S>> {
    weak.upgrade().map(|inner| SyncOrchestrator { inner })
}

fn has_content(data: &Dataset) -> bool {
    !data.is_empty() || !data.deleted_items.is_empty()
}

fn success_event(outcome: &SyncOutcome) -> SyncEvent {
    match outcome {
        SyncOutcome::Pulled(data) => SyncEvent::SyncSuccess {
            direction: SyncDirection::FromCloud,
            data: Some(data.clone()),
            uploaded: false,
        },
        other => SyncEvent::SyncSuccess {
            direction: SyncDirection::ToCloud,
            data: None,
            uploaded: matches!(other, SyncOutcome::Uploaded),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::MockRemoteStore;
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};
    use minutes_sync_types::{Meeting, Stakeholder, Tombstone};
    use std::time::Duration;

    type Orchestrator = SyncOrchestrator<MockRemoteStore, MemoryStore>;

    const KEY: &str = "minutes-sync-data";

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    struct Harness {
        sync: Orchestrator,
        remote: MockRemoteStore,
        store: MemoryStore,
        clock: Arc<ManualClock>,
        events: Arc<Mutex<Vec<SyncEvent>>>,
    }

    impl Harness {
        fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }

        fn events(&self) -> Vec<SyncEvent> {
            self.events.lock().unwrap().clone()
        }

        fn remote_payload(&self) -> SyncPayload {
            SyncPayload::from_bytes(&self.remote.get(KEY).unwrap()).unwrap()
        }

        async fn rebuild(&self) -> Orchestrator {
            SyncOrchestrator::builder(self.remote.clone(), self.store.clone())
                .with_clock(self.clock.clone())
                .build()
                .await
                .unwrap()
        }
    }

    async fn unconfigured_with(config: SyncConfig) -> Harness {
        let remote = MockRemoteStore::new();
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let sync = SyncOrchestrator::builder(remote.clone(), store.clone())
            .with_config(config.with_device_name("Laptop"))
            .with_clock(clock.clone())
            .build()
            .await
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        sync.add_listener(move |event| sink.lock().unwrap().push(event.clone()));

        Harness {
            sync,
            remote,
            store,
            clock,
            events,
        }
    }

    async fn harness_with(config: SyncConfig) -> Harness {
        let h = unconfigured_with(config).await;
        h.sync
            .configure_sync_provider(ProviderKind::Custom, serde_json::Value::Null)
            .await
            .unwrap();
        h
    }

    async fn harness() -> Harness {
        harness_with(SyncConfig::default()).await
    }

    /// Upload `data` as if another device had pushed it at `at`.
    fn seed_remote(remote: &MockRemoteStore, data: Dataset, at: Timestamp) -> DeviceId {
        let device = DeviceId::random();
        let payload = build_payload(data, device, "Desktop", at).unwrap();
        remote.put(KEY, payload.to_bytes().unwrap());
        device
    }

    fn meetings(n: usize) -> Dataset {
        (0..n).fold(Dataset::new(), |data, i| {
            data.with_meeting(Meeting::new(format!("m{i}"), format!("Meeting {i}"), start()))
        })
    }

    #[tokio::test]
    async fn unconfigured_sync_fails_fast() {
        let h = unconfigured_with(SyncConfig::default()).await;

        let push = h.sync.sync_to_cloud(meetings(1)).await;
        let pull = h.sync.sync_from_cloud().await;

        assert!(matches!(push, Err(ClientError::NotConfigured)));
        assert!(matches!(pull, Err(ClientError::NotConfigured)));
        assert_eq!(h.remote.download_count(), 0);
        assert!(h.names().is_empty());
    }

    #[tokio::test]
    async fn configuration_is_persisted() {
        let h = harness().await;
        assert!(h.sync.is_configured());
        assert!(h.store.contains(keys::SYNC_CONFIG));

        let reopened = h.rebuild().await;
        assert!(reopened.is_configured());
        assert_eq!(reopened.device().id, h.sync.device().id);
    }

    #[tokio::test]
    async fn failed_connection_test_leaves_provider_unconfigured() {
        let h = unconfigured_with(SyncConfig::default()).await;
        h.remote
            .fail_connection_test(RemoteError::Network("no route".into()));

        let result = h
            .sync
            .configure_sync_provider(ProviderKind::Folder, serde_json::json!({ "path": "/x" }))
            .await;

        assert!(matches!(result, Err(ClientError::Remote(_))));
        assert!(!h.sync.is_configured());
        assert!(!h.store.contains(keys::SYNC_CONFIG));
    }

    #[tokio::test]
    async fn disabled_sync_is_not_configured() {
        let h = harness().await;
        h.sync.set_sync_enabled(false).await.unwrap();

        assert!(matches!(
            h.sync.sync_to_cloud(meetings(1)).await,
            Err(ClientError::NotConfigured)
        ));
        let status = h.sync.get_sync_status().await.unwrap();
        assert!(status.configured);
        assert!(!status.enabled);
    }

    #[tokio::test]
    async fn push_uploads_attributed_payload() {
        let h = harness().await;

        let outcome = h.sync.sync_to_cloud(meetings(2)).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Uploaded);
        let payload = h.remote_payload();
        verify_payload(&payload).unwrap();
        assert_eq!(payload.data.meetings.len(), 2);
        assert_eq!(payload.metadata.device_id, h.sync.device().id);
        assert_eq!(payload.metadata.device_name, "Laptop");
        assert!(h.store.contains(keys::SNAPSHOT));
        assert!(h.store.contains(keys::LAST_SYNC_TIME));
        assert_eq!(h.sync.status(), SyncStatus::Idle);
        assert_eq!(
            h.names(),
            vec!["status_change", "status_change", "sync_success", "status_change"]
        );
    }

    fn statuses(events: &[SyncEvent]) -> Vec<(SyncStatus, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::StatusChange { status, error } => Some((*status, error.is_some())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn finished_sync_settles_back_to_idle() {
        let h = harness().await;

        h.sync.sync_to_cloud(meetings(1)).await.unwrap();
        h.remote
            .fail_next_download(RemoteError::Network("unreachable".into()));
        h.sync.sync_from_cloud().await.unwrap_err();

        assert_eq!(h.sync.status(), SyncStatus::Idle);
        assert_eq!(
            statuses(&h.events()),
            vec![
                (SyncStatus::Syncing, false),
                (SyncStatus::Success, false),
                (SyncStatus::Idle, false),
                (SyncStatus::Syncing, false),
                (SyncStatus::Error, true),
                (SyncStatus::Idle, false),
            ]
        );
    }

    #[tokio::test]
    async fn successful_sync_records_last_seen() {
        let h = harness().await;
        assert_eq!(h.sync.device().last_seen, None);

        h.clock.advance(Duration::from_secs(90));
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        let seen = start() + chrono::Duration::seconds(90);
        assert_eq!(h.sync.device().last_seen, Some(seen));
        assert_eq!(h.rebuild().await.device().last_seen, Some(seen));
    }

    #[tokio::test]
    async fn failed_sync_leaves_last_seen_alone() {
        let h = harness().await;
        h.remote
            .fail_next_download(RemoteError::Network("unreachable".into()));

        h.sync.sync_to_cloud(meetings(1)).await.unwrap_err();

        assert_eq!(h.sync.device().last_seen, None);
    }

    #[tokio::test]
    async fn empty_local_pulls_instead_of_overwriting() {
        let h = harness().await;
        seed_remote(&h.remote, meetings(50), start());

        let outcome = h.sync.sync_to_cloud(Dataset::new()).await.unwrap();

        let SyncOutcome::Pulled(merged) = outcome else {
            panic!("expected a pull, got {outcome:?}");
        };
        assert_eq!(merged.meetings.len(), 50);
        assert_eq!(h.remote.upload_count(), 0);
        assert_eq!(h.sync.load_local().await.unwrap().meetings.len(), 50);
    }

    #[tokio::test]
    async fn empty_push_keeps_unsynced_local_entities() {
        let h = harness().await;
        h.sync
            .save_local(&Dataset::new().with_meeting(Meeting::new("local-only", "Draft", start())))
            .await
            .unwrap();
        seed_remote(&h.remote, meetings(50), start());

        let outcome = h.sync.sync_to_cloud(Dataset::new()).await.unwrap();

        let SyncOutcome::Pulled(merged) = outcome else {
            panic!("expected a pull, got {outcome:?}");
        };
        assert_eq!(merged.meetings.len(), 51);
        let local = h.sync.load_local().await.unwrap();
        assert_eq!(local.meetings.len(), 51);
        assert!(local.meetings.iter().any(|m| m.id == "local-only"));
        assert_eq!(h.remote.download_count(), 1);
        assert_eq!(h.remote.upload_count(), 0);
    }

    #[tokio::test]
    async fn push_keeps_entities_missing_from_argument() {
        let h = harness().await;
        h.sync
            .save_local(&meetings(1).with_meeting(Meeting::new("draft", "Unsent", start())))
            .await
            .unwrap();

        h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        let local = h.sync.load_local().await.unwrap();
        assert!(local.meetings.iter().any(|m| m.id == "draft"));
        let remote = h.remote_payload().data;
        assert_eq!(remote.meetings.len(), 2);
        assert!(remote.meetings.iter().any(|m| m.id == "draft"));
        assert!(remote.deleted_items.is_empty());
    }

    #[tokio::test]
    async fn push_keeps_remote_changes() {
        let h = harness().await;
        seed_remote(
            &h.remote,
            Dataset::new().with_meeting(Meeting::new("r1", "From desktop", start())),
            start(),
        );

        h.sync
            .sync_to_cloud(Dataset::new().with_meeting(Meeting::new("l1", "From laptop", start())))
            .await
            .unwrap();

        let mut ids: Vec<_> = h
            .remote_payload()
            .data
            .meetings
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["l1", "r1"]);
    }

    #[tokio::test]
    async fn unchanged_data_is_not_uploaded_twice() {
        let h = harness().await;

        assert_eq!(
            h.sync.sync_to_cloud(meetings(3)).await.unwrap(),
            SyncOutcome::Uploaded
        );
        h.clock.advance(Duration::from_secs(60));
        assert_eq!(
            h.sync.sync_to_cloud(meetings(3)).await.unwrap(),
            SyncOutcome::Unchanged
        );
        assert_eq!(h.remote.upload_count(), 1);
    }

    #[tokio::test]
    async fn removal_since_last_sync_propagates() {
        let h = harness().await;
        h.sync.sync_to_cloud(meetings(2)).await.unwrap();

        h.clock.advance(Duration::from_secs(60));
        let mut current = meetings(2);
        current.meetings.retain(|m| m.id != "m1");
        h.sync.sync_to_cloud(current).await.unwrap();

        let remote = h.remote_payload().data;
        assert_eq!(remote.meetings.len(), 1);
        assert_eq!(remote.meetings[0].id, "m0");
        assert!(remote
            .deleted_items
            .iter()
            .any(|t| t.kind == EntityType::Meeting && t.id == "m1"));
    }

    #[tokio::test]
    async fn deleted_entity_is_removed_remotely() {
        let h = harness().await;
        h.sync.save_local(&meetings(2)).await.unwrap();
        h.sync
            .sync_to_cloud(h.sync.load_local().await.unwrap())
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(60));
        assert!(h.sync.delete_entity(EntityType::Meeting, "m0").await.unwrap());
        h.sync
            .sync_to_cloud(h.sync.load_local().await.unwrap())
            .await
            .unwrap();

        let remote = h.remote_payload().data;
        assert_eq!(remote.meetings.len(), 1);
        assert_eq!(remote.meetings[0].id, "m1");
    }

    #[tokio::test]
    async fn offline_push_is_queued_with_high_priority() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);

        let outcome = h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Queued(_)));
        let queued = h.sync.queued_operations().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].priority, PRIORITY_HIGH);
        assert_eq!(queued[0].kind, OperationKind::SyncToCloud);
        assert!(h.store.contains(keys::OPERATION_QUEUE));
        assert_eq!(h.sync.status(), SyncStatus::Offline);
        assert_eq!(h.remote.download_count(), 0);
        assert_eq!(h.names(), vec!["operation_queued", "status_change"]);
    }

    #[tokio::test]
    async fn offline_pull_does_nothing() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);

        assert_eq!(h.sync.sync_from_cloud().await.unwrap(), SyncOutcome::Offline);
        assert_eq!(h.remote.download_count(), 0);
    }

    #[tokio::test]
    async fn pull_merges_into_local_store() {
        let h = harness().await;
        h.sync
            .save_local(&Dataset::new().with_meeting(Meeting::new("l1", "Local", start())))
            .await
            .unwrap();
        seed_remote(
            &h.remote,
            Dataset::new().with_stakeholder(Stakeholder::new("s1", "Ada", start())),
            start(),
        );

        let outcome = h.sync.sync_from_cloud().await.unwrap();

        let SyncOutcome::Pulled(merged) = outcome else {
            panic!("expected a pull, got {outcome:?}");
        };
        assert_eq!(merged.meetings.len(), 1);
        assert_eq!(merged.stakeholders.len(), 1);
        assert_eq!(h.sync.load_local().await.unwrap(), merged);
        assert_eq!(h.remote.upload_count(), 0);

        let events = h.events();
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::SyncSuccess {
                direction: SyncDirection::FromCloud,
                data: Some(_),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn tampered_remote_fails_integrity_check() {
        let h = harness().await;
        let mut payload = build_payload(meetings(1), DeviceId::random(), "Desktop", start()).unwrap();
        payload.data.meetings[0].title = "Tampered".into();
        h.remote.put(KEY, payload.to_bytes().unwrap());

        let result = h.sync.sync_from_cloud().await;

        assert!(matches!(result, Err(ClientError::Integrity { .. })));
        assert_eq!(h.sync.status(), SyncStatus::Idle);
        assert!(statuses(&h.events()).contains(&(SyncStatus::Error, true)));
        assert!(h.names().contains(&"sync_error"));
        assert!(h.sync.load_local().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_remote_is_rejected() {
        let h = harness().await;
        h.remote.put(KEY, b"not json".to_vec());

        let result = h.sync.sync_from_cloud().await;
        assert!(matches!(result, Err(ClientError::Serialization(_))));
    }

    #[tokio::test]
    async fn rejected_credential_is_refreshed_once() {
        let h = harness().await;
        h.remote
            .fail_next_download(RemoteError::Unauthorized("expired".into()));

        h.sync.sync_from_cloud().await.unwrap();

        assert_eq!(h.remote.refresh_count(), 1);
        assert_eq!(h.remote.download_count(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_requires_reauthentication() {
        let h = harness().await;
        h.remote
            .fail_next_download(RemoteError::Unauthorized("expired".into()));
        h.remote
            .fail_next_refresh(CredentialError::Provider("revoked".into()));

        let result = h.sync.sync_from_cloud().await;

        assert!(matches!(
            result,
            Err(ClientError::Credential(CredentialError::ReauthenticationRequired(_)))
        ));
        assert_eq!(h.remote.download_count(), 1);
    }

    #[tokio::test]
    async fn second_rejection_requires_reauthentication() {
        let h = harness().await;
        h.remote
            .fail_next_download(RemoteError::Unauthorized("expired".into()));
        h.remote
            .fail_next_download(RemoteError::Unauthorized("still expired".into()));

        let result = h.sync.sync_from_cloud().await;

        assert!(matches!(
            result,
            Err(ClientError::Credential(CredentialError::ReauthenticationRequired(_)))
        ));
        assert_eq!(h.remote.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out() {
        let h = harness_with(SyncConfig::default().with_remote_timeout(Duration::from_secs(60)))
            .await;
        h.remote.set_latency(Duration::from_secs(120));

        let result = h.sync.sync_from_cloud().await;

        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert_eq!(h.sync.status(), SyncStatus::Idle);
        assert!(statuses(&h.events()).contains(&(SyncStatus::Error, true)));
    }

    #[tokio::test]
    async fn queued_push_runs_when_back_online() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);
        h.sync.sync_to_cloud(meetings(2)).await.unwrap();

        h.sync.connectivity().set_online(true);
        let report = h.sync.process_queue().await.unwrap();

        assert_eq!(report.completed, 1);
        assert!(h.sync.queued_operations().await.is_empty());
        assert_eq!(h.remote_payload().data.meetings.len(), 2);
    }

    #[tokio::test]
    async fn queued_push_prefers_current_local_data() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();
        h.sync.save_local(&meetings(3)).await.unwrap();

        h.sync.connectivity().set_online(true);
        h.sync.process_queue().await.unwrap();

        assert_eq!(h.remote_payload().data.meetings.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn operation_dropped_after_max_retries() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();
        for _ in 0..3 {
            h.remote
                .fail_next_download(RemoteError::Network("unreachable".into()));
        }

        h.sync.connectivity().set_online(true);
        let report = h.sync.process_queue().await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                completed: 0,
                retried: 2,
                failed: 1
            }
        );
        assert_eq!(h.remote.download_count(), 3);
        assert!(h.sync.queued_operations().await.is_empty());

        let failed: Vec<_> = h
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::OperationFailed { operation, .. } => Some(operation),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, OperationStatus::Failed);
        assert_eq!(failed[0].retry_count, 3);
    }

    #[tokio::test]
    async fn integrity_failure_is_not_retried() {
        let h = harness().await;
        let mut payload = build_payload(meetings(1), DeviceId::random(), "Desktop", start()).unwrap();
        payload.metadata.checksum = "0".repeat(64);
        h.remote.put(KEY, payload.to_bytes().unwrap());

        h.sync.connectivity().set_online(false);
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();
        h.sync.connectivity().set_online(true);
        let report = h.sync.process_queue().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(h.remote.download_count(), 1);
        assert!(h.names().contains(&"operation_failed"));
    }

    #[tokio::test]
    async fn drain_waits_while_offline() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        let report = h.sync.process_queue().await.unwrap();

        assert_eq!(report, DrainReport::default());
        assert_eq!(h.sync.queued_operations().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_drain_is_a_no_op() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();
        h.sync.connectivity().set_online(true);

        let _draining = h.sync.inner.drain_lock.lock().await;
        let report = h.sync.process_queue().await.unwrap();

        assert_eq!(report, DrainReport::default());
        assert_eq!(h.sync.queued_operations().await.len(), 1);
    }

    #[tokio::test]
    async fn push_during_running_sync_is_queued() {
        let h = harness().await;
        let running = h.sync.inner.sync_lock.lock().await;

        let outcome = h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Queued(_)));
        let queued = h.sync.queued_operations().await;
        assert_eq!(queued[0].priority, PRIORITY_DEFAULT);
        assert_eq!(h.remote.upload_count(), 0);
        drop(running);
    }

    #[tokio::test]
    async fn interrupted_operations_are_restored_as_pending() {
        let h = harness().await;
        let mut queue = OperationQueue::default();
        let id = queue
            .enqueue(OperationKind::SyncFromCloud, None, PRIORITY_DEFAULT, start())
            .unwrap()
            .id;
        queue.next_pending();
        save_json(&h.store, keys::OPERATION_QUEUE, queue.operations())
            .await
            .unwrap();

        let reopened = h.rebuild().await;

        let restored = reopened.queued_operations().await;
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, id);
        assert_eq!(restored[0].status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn simultaneous_edits_report_conflict() {
        let h = harness().await;
        let desktop = seed_remote(
            &h.remote,
            Dataset::new().with_meeting(Meeting::new("r1", "Desktop notes", start())),
            start() - chrono::Duration::hours(1),
        );

        h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        let conflict = h.events().into_iter().find_map(|e| match e {
            SyncEvent::ConflictResolved {
                conflict,
                resolution,
            } => Some((conflict, resolution)),
            _ => None,
        });
        let (conflict, resolution) = conflict.unwrap();
        assert_eq!(resolution, Resolution::Merge);
        let conflict = conflict.unwrap();
        assert_eq!(conflict.remote_device, desktop);
        assert_eq!(conflict.local_device, h.sync.device().id);
        assert_eq!(conflict.time_difference_ms, 3_600_000);
        assert_eq!(h.remote_payload().data.meetings.len(), 2);
    }

    #[tokio::test]
    async fn resolve_with_local_overwrites_remote() {
        let h = harness().await;
        seed_remote(&h.remote, meetings(5), start());
        h.sync
            .save_local(&Dataset::new().with_meeting(Meeting::new("only", "Mine", start())))
            .await
            .unwrap();

        let data = h.sync.resolve_conflict(Resolution::UseLocal).await.unwrap();

        assert_eq!(data.meetings.len(), 1);
        assert_eq!(h.remote_payload().data.meetings[0].id, "only");
        assert!(h.names().contains(&"conflict_resolved"));
    }

    #[tokio::test]
    async fn resolve_with_cloud_replaces_local() {
        let h = harness().await;
        seed_remote(&h.remote, meetings(5), start());
        h.sync
            .save_local(&Dataset::new().with_meeting(Meeting::new("only", "Mine", start())))
            .await
            .unwrap();

        let data = h.sync.resolve_conflict(Resolution::UseCloud).await.unwrap();

        assert_eq!(data.meetings.len(), 5);
        assert_eq!(h.sync.load_local().await.unwrap().meetings.len(), 5);
        assert_eq!(h.remote.upload_count(), 0);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_break_sync() {
        let h = harness().await;
        h.sync.add_listener(|_| panic!("listener bug"));

        assert_eq!(
            h.sync.sync_to_cloud(meetings(1)).await.unwrap(),
            SyncOutcome::Uploaded
        );
        assert!(h.names().contains(&"sync_success"));
    }

    #[tokio::test]
    async fn expired_tombstones_are_pruned() {
        let h = harness_with(
            SyncConfig::default().with_tombstone_retention(Duration::from_secs(30 * 86_400)),
        )
        .await;
        let old = Tombstone::new(EntityType::Meeting, "ancient", start() - chrono::Duration::days(90));
        let recent = Tombstone::new(EntityType::Meeting, "recent", start() - chrono::Duration::days(1));

        h.sync
            .sync_to_cloud(meetings(1).with_tombstone(old).with_tombstone(recent))
            .await
            .unwrap();

        let ids: Vec<_> = h
            .remote_payload()
            .data
            .deleted_items
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["recent"]);
    }

    #[tokio::test]
    async fn status_report_reflects_state() {
        let h = harness().await;
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        let status = h.sync.get_sync_status().await.unwrap();

        assert!(status.configured);
        assert!(status.enabled);
        assert_eq!(status.provider, Some(ProviderKind::Custom));
        assert_eq!(status.last_sync, Some(start()));
        assert!(status.is_online);
        assert_eq!(status.device_id, h.sync.device().id);
        assert_eq!(status.device_name, "Laptop");
        assert_eq!(status.queued_operations, 0);
        assert_eq!(status.status, SyncStatus::Idle);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["queuedOperations"], 0);
        assert_eq!(json["status"], "idle");
    }

    #[tokio::test]
    async fn clearing_sync_data_keeps_device_and_local_data() {
        let h = harness().await;
        h.sync.save_local(&meetings(2)).await.unwrap();
        h.sync
            .sync_to_cloud(h.sync.load_local().await.unwrap())
            .await
            .unwrap();
        let device = h.sync.device().id;

        h.sync.clear_sync_data().await.unwrap();

        assert!(!h.sync.is_configured());
        assert_eq!(h.sync.status(), SyncStatus::Idle);
        for key in keys::SYNC_KEYS {
            assert!(!h.store.contains(key), "{key} should be removed");
        }
        assert!(h.store.contains(keys::DEVICE_ID));
        assert_eq!(h.sync.load_local().await.unwrap().meetings.len(), 2);
        assert_eq!(h.rebuild().await.device().id, device);
    }

    #[tokio::test]
    async fn connectivity_changes_drive_status() {
        let h = harness().await;

        h.sync.set_online(false);
        assert_eq!(h.sync.status(), SyncStatus::Offline);
        h.sync.set_online(false);
        h.sync.set_online(true);
        assert_eq!(h.sync.status(), SyncStatus::Idle);

        let changes = h
            .events()
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::StatusChange { .. }))
            .count();
        assert_eq!(changes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_sync_pushes_on_interval() {
        let h = harness_with(
            SyncConfig::default().with_auto_sync_interval(Duration::from_secs(300)),
        )
        .await;
        h.sync.save_local(&meetings(1)).await.unwrap();

        h.sync.start_auto_sync();
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(h.remote.upload_count(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.remote.upload_count(), 1);

        h.sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn offline_auto_sync_leaves_room_for_user_pushes() {
        let h = harness_with(
            SyncConfig::default()
                .with_auto_sync_interval(Duration::from_secs(300))
                .with_queue_capacity(3),
        )
        .await;
        h.sync.save_local(&meetings(1)).await.unwrap();
        h.sync.connectivity().set_online(false);

        h.sync.start_auto_sync();
        tokio::time::sleep(Duration::from_secs(3 * 300 + 1)).await;

        let queued = h.sync.queued_operations().await;
        assert_eq!(queued.len(), 3);
        assert!(queued.iter().all(|op| op.priority == PRIORITY_LOW));

        let outcome = h.sync.sync_to_cloud(meetings(2)).await.unwrap();

        let SyncOutcome::Queued(id) = outcome else {
            panic!("expected the push to be queued, got {outcome:?}");
        };
        let queued = h.sync.queued_operations().await;
        assert_eq!(queued.len(), 3);
        assert!(queued
            .iter()
            .any(|op| op.id == id && op.priority == PRIORITY_HIGH));
        assert!(h.names().contains(&"operation_failed"));
        h.sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn queue_processor_drains_on_reconnect() {
        let h = harness().await;
        h.sync.connectivity().set_online(false);
        h.sync.sync_to_cloud(meetings(1)).await.unwrap();

        h.sync.start_queue_processor();
        tokio::task::yield_now().await;
        h.sync.connectivity().set_online(true);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.remote.upload_count(), 1);
        assert!(h.sync.queued_operations().await.is_empty());
        h.sync.stop();
    }
}
