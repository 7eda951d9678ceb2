//! Events emitted by the orchestrator and the listener registry.
//!
//! Listeners are plain callbacks invoked synchronously, in registration
//! order. A panicking listener is logged and skipped; delivery to the
//! remaining listeners and the orchestrator's own control flow continue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use minutes_sync_core::{Conflict, OperationKind, QueuedOperation, Resolution, SyncStatus};
use minutes_sync_types::{Dataset, OperationId};

/// Direction of a completed sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Local data was pushed.
    ToCloud,
    /// Remote data was pulled and merged.
    FromCloud,
}

/// Something observable happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The orchestrator changed state.
    StatusChange {
        /// New state.
        status: SyncStatus,
        /// Error message when entering `error`.
        error: Option<String>,
    },
    /// A sync completed.
    SyncSuccess {
        /// Which way data moved.
        direction: SyncDirection,
        /// Merged dataset now stored locally, for pulls.
        data: Option<Dataset>,
        /// False when the upload was skipped because nothing changed.
        uploaded: bool,
    },
    /// A sync attempt failed.
    SyncError {
        /// Error message.
        error: String,
    },
    /// Diverging payloads were reconciled.
    ConflictResolved {
        /// The detected conflict, if detection flagged one.
        conflict: Option<Conflict>,
        /// How it was settled.
        resolution: Resolution,
    },
    /// An operation was added to the durable queue.
    OperationQueued {
        /// Id of the queued operation.
        id: OperationId,
        /// What it will do.
        kind: OperationKind,
        /// Its priority.
        priority: u8,
    },
    /// An operation was dropped.
    OperationFailed {
        /// The dropped operation, status `failed`.
        operation: QueuedOperation,
        /// Error of the last attempt.
        error: String,
    },
}

impl SyncEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::StatusChange { .. } => "status_change",
            SyncEvent::SyncSuccess { .. } => "sync_success",
            SyncEvent::SyncError { .. } => "sync_error",
            SyncEvent::ConflictResolved { .. } => "conflict_resolved",
            SyncEvent::OperationQueued { .. } => "operation_queued",
            SyncEvent::OperationFailed { .. } => "operation_failed",
        }
    }
}

/// Handle returned by [`ListenerRegistry::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Registered event listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerHandle, Listener)>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((handle, Arc::new(listener)));
        handle
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener.
    pub fn emit(&self, event: &SyncEvent) {
        // Snapshot so listeners may add or remove listeners while running.
        let listeners: Vec<Listener> = self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!("Listener panicked while handling {}", event.name());
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerHandle, Listener)>> {
        // Listeners run outside the lock, so a poisoned list is still intact.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
