//! # sync-core
//!
//! Pure reconciliation logic for minutes-sync (no I/O, instant tests).
//!
//! This crate implements the algorithms that reconcile a local dataset with
//! the shared remote copy, without any network or disk I/O, enabling fast
//! unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is always passed in by the caller. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about merges and retries
//!
//! The actual I/O (remote backend, durable storage, timers) is performed by
//! `sync-client`, which drives these components.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod conflict;
pub mod delta;
pub mod merge;
pub mod queue;
pub mod status;
pub mod tombstone;

pub use checksum::{
    build_payload, checksum, data_version, sorted, verify_payload, IntegrityError,
};
pub use conflict::{resolve_conflict, Conflict, ConflictDetector, Resolution, DEFAULT_TOLERANCE};
pub use delta::{apply_delta, compute_delta, CollectionDelta, Delta};
pub use merge::{merge, merge_with_report, MergeReport};
pub use queue::{
    backoff_delay, Enqueued, OperationKind, OperationQueue, OperationStatus, QueueError,
    QueuedOperation, RetryDecision, DEFAULT_CAPACITY, DEFAULT_MAX_RETRIES, PRIORITY_DEFAULT,
    PRIORITY_HIGH, PRIORITY_LOW,
};
pub use status::{StatusEvent, SyncStatus};
pub use tombstone::{TombstoneSet, Verdict};
