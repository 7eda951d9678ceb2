//! Sync status state machine.
//!
//! ```text
//! idle ──started──▶ syncing ──succeeded──▶ success ──settled──▶ idle
//!                      └──────failed─────▶ error   ──settled──▶ idle
//! (any) ──went offline──▶ offline          ──settled──▶ idle
//! ```
//!
//! Pure transitions only; sync-client emits a `status_change` event for
//! every transition that changes the state.

use serde::{Deserialize, Serialize};

/// Current state of the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A sync is in progress.
    Syncing,
    /// The last sync succeeded.
    Success,
    /// The last sync failed.
    Error,
    /// Connectivity was lost.
    Offline,
}

/// Input to the status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A sync began.
    SyncStarted,
    /// The running sync finished successfully.
    SyncSucceeded,
    /// The running sync failed.
    SyncFailed,
    /// Connectivity was lost.
    WentOffline,
    /// A terminal state has been reported; return to idle.
    Settled,
    /// Factory reset.
    Reset,
}

impl SyncStatus {
    /// Process an event and return the new state.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn on_event(self, event: StatusEvent) -> Self {
        match (self, event) {
            (_, StatusEvent::SyncStarted) => Self::Syncing,

            (Self::Syncing, StatusEvent::SyncSucceeded) => Self::Success,
            (Self::Syncing, StatusEvent::SyncFailed) => Self::Error,

            (_, StatusEvent::WentOffline) => Self::Offline,

            (Self::Success | Self::Error | Self::Offline, StatusEvent::Settled) => Self::Idle,

            (_, StatusEvent::Reset) => Self::Idle,

            (state, _) => state,
        }
    }

    /// True while a sync is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Syncing)
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
