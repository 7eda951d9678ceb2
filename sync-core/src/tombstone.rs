//! Tombstone bookkeeping for deletion propagation.
//!
//! A deletion is recorded as a `(type, id) → deletedAt` marker. When the
//! same id shows up again during a merge, the marker and the entity's own
//! modification time decide who wins:
//! - marker newer than (or as new as) the entity → the entity stays deleted
//! - entity newer than the marker → the entity was edited after the
//!   deletion somewhere, the marker is discarded ("resurrection")
//!
//! Two markers for the same `(type, id)` collapse to the newest one.

use std::collections::BTreeMap;

use minutes_sync_types::{Dataset, EntityType, Timestamp, Tombstone};

/// Outcome of checking an entity against the tombstone set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No tombstone for this entity.
    Alive,
    /// A tombstone newer than the entity exists; exclude the entity.
    Deleted,
    /// A tombstone exists but predates the entity; discard the tombstone.
    Resurrected,
}

/// Newest tombstone per `(type, id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TombstoneSet {
    entries: BTreeMap<(EntityType, String), Timestamp>,
}

impl TombstoneSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from tombstone lists, keeping the newest marker per key.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a Tombstone>) -> Self {
        let mut set = Self::new();
        for t in items {
            set.insert(t.clone());
        }
        set
    }

    /// Build the combined set of two datasets.
    pub fn combined(local: &Dataset, remote: &Dataset) -> Self {
        Self::from_items(local.deleted_items.iter().chain(remote.deleted_items.iter()))
    }

    /// Insert a tombstone. Returns true if the set changed.
    ///
    /// An older marker for an existing key is ignored.
    pub fn insert(&mut self, tombstone: Tombstone) -> bool {
        let key = (tombstone.kind, tombstone.id);
        match self.entries.get_mut(&key) {
            Some(existing) if *existing >= tombstone.deleted_at => false,
            Some(existing) => {
                *existing = tombstone.deleted_at;
                true
            }
            None => {
                self.entries.insert(key, tombstone.deleted_at);
                true
            }
        }
    }

    /// Deletion time recorded for `(kind, id)`.
    pub fn get(&self, kind: EntityType, id: &str) -> Option<Timestamp> {
        self.entries.get(&(kind, id.to_string())).copied()
    }

    /// Check whether a tombstone exists for `(kind, id)`.
    pub fn contains(&self, kind: EntityType, id: &str) -> bool {
        self.get(kind, id).is_some()
    }

    /// Decide the fate of an entity last modified at `last_modified`.
    ///
    /// Pure: does not discard the tombstone on resurrection, see
    /// [`TombstoneSet::resolve`].
    pub fn verdict(&self, kind: EntityType, id: &str, last_modified: Timestamp) -> Verdict {
        match self.get(kind, id) {
            None => Verdict::Alive,
            Some(deleted_at) if deleted_at >= last_modified => Verdict::Deleted,
            Some(_) => Verdict::Resurrected,
        }
    }

    /// Like [`TombstoneSet::verdict`], but removes the tombstone when the
    /// entity is resurrected.
    pub fn resolve(&mut self, kind: EntityType, id: &str, last_modified: Timestamp) -> Verdict {
        let verdict = self.verdict(kind, id, last_modified);
        if verdict == Verdict::Resurrected {
            self.remove(kind, id);
        }
        verdict
    }

    /// Remove the tombstone for `(kind, id)`.
    pub fn remove(&mut self, kind: EntityType, id: &str) -> Option<Timestamp> {
        self.entries.remove(&(kind, id.to_string()))
    }

    /// Drop tombstones deleted strictly before `cutoff`.
    ///
    /// Returns the number of tombstones removed.
    pub fn prune_older_than(&mut self, cutoff: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, deleted_at| *deleted_at >= cutoff);
        before - self.entries.len()
    }

    /// Number of tombstones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tombstones sorted by `(type, id)`.
    pub fn to_vec(&self) -> Vec<Tombstone> {
        self.entries
            .iter()
            .map(|((kind, id), deleted_at)| Tombstone::new(*kind, id.clone(), *deleted_at))
            .collect()
    }
}
