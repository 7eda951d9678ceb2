//! Durable operation queue for minutes-sync.
//!
//! This module holds the queue *data structure* and its retry policy:
//! - ordering by `(priority ascending, enqueue time ascending)`
//! - a capacity bound with eviction of background work
//! - retry accounting with exponential backoff
//!
//! It performs no I/O. sync-client persists [`OperationQueue::operations`]
//! after every mutation and runs the drain loop:
//! 1. `next_pending()` - mark the head `processing`
//! 2. `complete()` on success, or `fail()` on error
//! 3. after a [`RetryDecision::Retry`], sleep `delay` then `requeue()`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use minutes_sync_types::{Dataset, OperationId, Timestamp};

/// Priority for user-initiated operations. Never evicted.
pub const PRIORITY_HIGH: u8 = 0;
/// Priority for regular operations.
pub const PRIORITY_DEFAULT: u8 = 5;
/// Priority for background operations.
pub const PRIORITY_LOW: u8 = 10;

/// Default maximum number of queued operations.
pub const DEFAULT_CAPACITY: usize = 100;
/// Default number of executions before an operation is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity and nothing is eligible for eviction.
    #[error("operation queue full (capacity: {capacity})")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },

    /// No operation with this id is queued.
    #[error("unknown operation: {0}")]
    UnknownOperation(OperationId),
}

/// What a queued operation does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Push local data to the remote.
    SyncToCloud,
    /// Pull the remote data and merge it locally.
    SyncFromCloud,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::SyncToCloud => write!(f, "sync_to_cloud"),
            OperationKind::SyncFromCloud => write!(f, "sync_from_cloud"),
        }
    }
}

/// Lifecycle of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be executed.
    Pending,
    /// Currently executing (or waiting out its backoff).
    Processing,
    /// Dropped after exhausting its retries.
    Failed,
    /// Executed successfully.
    Completed,
}

/// One unit of deferred sync work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique id.
    pub id: OperationId,
    /// What to execute.
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Dataset captured at enqueue time, if any.
    #[serde(default)]
    pub data: Option<Dataset>,
    /// Lower runs first.
    pub priority: u8,
    /// Enqueue time, reset when requeued after a failure.
    pub timestamp: Timestamp,
    /// Failed executions so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Executions allowed before the operation is dropped.
    pub max_retries: u32,
    /// Current lifecycle state.
    pub status: OperationStatus,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    /// Id of the new operation.
    pub id: OperationId,
    /// Operation evicted to make room, if the queue was full.
    pub evicted: Option<QueuedOperation>,
}

/// What the drain loop should do after a failed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then requeue the operation.
    Retry {
        /// Backoff before the operation becomes pending again.
        delay: Duration,
        /// Number of failures so far.
        attempt: u32,
    },
    /// Retries exhausted; the operation was removed with status `failed`.
    Exhausted(QueuedOperation),
}

/// Exponential backoff: `2^retry_count` seconds, capped at 30 seconds.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let secs = 2u64.pow(retry_count.min(5)).min(30);
    Duration::from_secs(secs)
}

/// Priority-ordered, capacity-bounded operation queue.
#[derive(Debug, Clone)]
pub struct OperationQueue {
    capacity: usize,
    max_retries: u32,
    operations: Vec<QueuedOperation>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MAX_RETRIES)
    }
}

impl OperationQueue {
    /// Create an empty queue.
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            max_retries: max_retries.max(1),
            operations: Vec::new(),
        }
    }

    /// Restore a queue from persisted operations.
    ///
    /// Operations left `processing` by a crash become `pending` again.
    /// Finished operations are dropped. If the persisted list exceeds the
    /// capacity, the newest entries in priority order are discarded.
    pub fn from_operations(
        operations: Vec<QueuedOperation>,
        capacity: usize,
        max_retries: u32,
    ) -> Self {
        let mut queue = Self::new(capacity, max_retries);
        queue.operations = operations
            .into_iter()
            .filter(|op| {
                matches!(
                    op.status,
                    OperationStatus::Pending | OperationStatus::Processing
                )
            })
            .map(|mut op| {
                op.status = OperationStatus::Pending;
                op
            })
            .collect();
        queue.sort();
        queue.operations.truncate(queue.capacity);
        queue
    }

    /// Add an operation.
    ///
    /// When the queue is full, the pending operation with the lowest
    /// priority (and, among those, the oldest) is evicted, as long as its
    /// priority is [`PRIORITY_DEFAULT`] or lower. High-priority operations
    /// are never evicted; if nothing else is eligible the enqueue fails.
    pub fn enqueue(
        &mut self,
        kind: OperationKind,
        data: Option<Dataset>,
        priority: u8,
        now: Timestamp,
    ) -> Result<Enqueued, QueueError> {
        let evicted = if self.operations.len() >= self.capacity {
            let index = self.eviction_candidate().ok_or(QueueError::Full {
                capacity: self.capacity,
            })?;
            Some(self.operations.remove(index))
        } else {
            None
        };

        let op = QueuedOperation {
            id: OperationId::new(),
            kind,
            data,
            priority,
            timestamp: now,
            retry_count: 0,
            max_retries: self.max_retries,
            status: OperationStatus::Pending,
            last_error: None,
        };
        let id = op.id;
        self.operations.push(op);
        self.sort();

        Ok(Enqueued { id, evicted })
    }

    fn eviction_candidate(&self) -> Option<usize> {
        self.operations
            .iter()
            .enumerate()
            .filter(|(_, op)| {
                op.status == OperationStatus::Pending && op.priority >= PRIORITY_DEFAULT
            })
            .min_by(|(ia, a), (ib, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.timestamp.cmp(&b.timestamp))
                    .then(ia.cmp(ib))
            })
            .map(|(index, _)| index)
    }

    /// Mark the first pending operation `processing` and return a copy.
    pub fn next_pending(&mut self) -> Option<QueuedOperation> {
        let op = self
            .operations
            .iter_mut()
            .find(|op| op.status == OperationStatus::Pending)?;
        op.status = OperationStatus::Processing;
        Some(op.clone())
    }

    /// Remove a successfully executed operation.
    pub fn complete(&mut self, id: OperationId) -> Result<QueuedOperation, QueueError> {
        let mut op = self.take(id)?;
        op.status = OperationStatus::Completed;
        Ok(op)
    }

    /// Record a failed execution.
    ///
    /// The operation is dropped once it has failed `max_retries` times.
    /// Otherwise it stays `processing` until [`OperationQueue::requeue`].
    pub fn fail(
        &mut self,
        id: OperationId,
        error: impl Into<String>,
    ) -> Result<RetryDecision, QueueError> {
        let index = self.position(id)?;
        let op = &mut self.operations[index];
        op.retry_count += 1;
        op.last_error = Some(error.into());

        if op.retry_count >= op.max_retries {
            let mut op = self.operations.remove(index);
            op.status = OperationStatus::Failed;
            return Ok(RetryDecision::Exhausted(op));
        }

        Ok(RetryDecision::Retry {
            delay: backoff_delay(op.retry_count),
            attempt: op.retry_count,
        })
    }

    /// Drop an operation that failed with a non-retryable error.
    pub fn abandon(
        &mut self,
        id: OperationId,
        error: impl Into<String>,
    ) -> Result<QueuedOperation, QueueError> {
        let mut op = self.take(id)?;
        op.status = OperationStatus::Failed;
        op.last_error = Some(error.into());
        Ok(op)
    }

    /// Make a failed operation pending again at the back of its priority tier.
    pub fn requeue(&mut self, id: OperationId, now: Timestamp) -> Result<(), QueueError> {
        let index = self.position(id)?;
        let op = &mut self.operations[index];
        op.status = OperationStatus::Pending;
        op.timestamp = now;
        self.sort();
        Ok(())
    }

    /// Return a `processing` operation to `pending` without counting a failure.
    pub fn release(&mut self, id: OperationId) -> Result<(), QueueError> {
        let index = self.position(id)?;
        self.operations[index].status = OperationStatus::Pending;
        Ok(())
    }

    /// Look up an operation.
    pub fn get(&self, id: OperationId) -> Option<&QueuedOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// All queued operations in execution order.
    pub fn operations(&self) -> &[QueuedOperation] {
        &self.operations
    }

    /// Number of queued operations (any status).
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations waiting to run.
    pub fn pending_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .count()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every operation.
    pub fn clear(&mut self) {
        self.operations.clear();
    }

    fn position(&self, id: OperationId) -> Result<usize, QueueError> {
        self.operations
            .iter()
            .position(|op| op.id == id)
            .ok_or(QueueError::UnknownOperation(id))
    }

    fn take(&mut self, id: OperationId) -> Result<QueuedOperation, QueueError> {
        let index = self.position(id)?;
        Ok(self.operations.remove(index))
    }

    fn sort(&mut self) {
        // Stable: equal (priority, timestamp) keep insertion order.
        self.operations
            .sort_by(|a, b| (a.priority, a.timestamp).cmp(&(b.priority, b.timestamp)));
    }
}
