//! Delta computation between a synchronized snapshot and the current state.
//!
//! The delta is a bandwidth and bookkeeping optimization only. Applying a
//! delta to its snapshot reproduces the current dataset, and re-sending the
//! full dataset instead converges to the same merged result.

use std::collections::{BTreeMap, BTreeSet};

use minutes_sync_types::{
    Dataset, Entity, EntityType, Meeting, Stakeholder, StakeholderCategory, Timestamp, Tombstone,
};

use crate::checksum::{entity_key, CONTENT_KEY_PREFIX};
use crate::tombstone::TombstoneSet;

/// Changes to one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDelta<T> {
    /// Entities whose key is not in the snapshot.
    pub added: Vec<T>,
    /// Entities present in the snapshot with different content.
    pub updated: Vec<T>,
    /// Keys present in the snapshot but missing from the current state.
    pub deleted: Vec<String>,
}

impl<T> Default for CollectionDelta<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T> CollectionDelta<T> {
    /// True when nothing changed in this collection.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Number of changed entities.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }
}

/// Changes between a snapshot and the current dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// No snapshot existed; every current entity is reported as added.
    pub is_full_sync: bool,
    /// Meeting changes.
    pub meetings: CollectionDelta<Meeting>,
    /// Stakeholder changes.
    pub stakeholders: CollectionDelta<Stakeholder>,
    /// Category changes.
    pub stakeholder_categories: CollectionDelta<StakeholderCategory>,
    /// Current tombstones, passed through unfiltered.
    pub deleted_items: Vec<Tombstone>,
}

impl Delta {
    /// True when no collection changed. Tombstones are not considered.
    pub fn is_empty(&self) -> bool {
        self.meetings.is_empty()
            && self.stakeholders.is_empty()
            && self.stakeholder_categories.is_empty()
    }

    /// Total number of changed entities.
    pub fn change_count(&self) -> usize {
        self.meetings.len() + self.stakeholders.len() + self.stakeholder_categories.len()
    }

    /// Keys removed since the snapshot, tagged with their collection.
    pub fn deleted_keys(&self) -> impl Iterator<Item = (EntityType, &str)> {
        let meetings = self
            .meetings
            .deleted
            .iter()
            .map(|k| (EntityType::Meeting, k.as_str()));
        let stakeholders = self
            .stakeholders
            .deleted
            .iter()
            .map(|k| (EntityType::Stakeholder, k.as_str()));
        let categories = self
            .stakeholder_categories
            .deleted
            .iter()
            .map(|k| (EntityType::Category, k.as_str()));
        meetings.chain(stakeholders).chain(categories)
    }

    /// Tombstones for the removed entities, stamped `deleted_at`.
    ///
    /// Entities keyed by content have no identity another device could
    /// match, so they get no tombstone.
    pub fn deletion_tombstones(&self, deleted_at: Timestamp) -> Vec<Tombstone> {
        self.deleted_keys()
            .filter(|(_, key)| !key.starts_with(CONTENT_KEY_PREFIX))
            .map(|(kind, key)| Tombstone::new(kind, key, deleted_at))
            .collect()
    }
}

/// Compute what changed between `snapshot` and `current`.
///
/// Without a snapshot (first sync ever) the result is a full sync carrying
/// every current entity as `added`.
pub fn compute_delta(snapshot: Option<&Dataset>, current: &Dataset) -> Delta {
    match snapshot {
        None => Delta {
            is_full_sync: true,
            meetings: full_collection(&current.meetings),
            stakeholders: full_collection(&current.stakeholders),
            stakeholder_categories: full_collection(&current.stakeholder_categories),
            deleted_items: current.deleted_items.clone(),
        },
        Some(base) => Delta {
            is_full_sync: false,
            meetings: diff_collection(&base.meetings, &current.meetings),
            stakeholders: diff_collection(&base.stakeholders, &current.stakeholders),
            stakeholder_categories: diff_collection(
                &base.stakeholder_categories,
                &current.stakeholder_categories,
            ),
            deleted_items: current.deleted_items.clone(),
        },
    }
}

/// Rebuild a full dataset from `base` plus `delta`.
///
/// `added` and `updated` entities are upserted by key, `deleted` keys are
/// removed, and tombstones are unioned (newest marker per key). A full-sync
/// delta ignores the base collections.
pub fn apply_delta(base: &Dataset, delta: &Delta) -> Dataset {
    let empty = Dataset::new();
    let collections = if delta.is_full_sync { &empty } else { base };

    let tombstones =
        TombstoneSet::from_items(base.deleted_items.iter().chain(delta.deleted_items.iter()));

    Dataset {
        meetings: apply_collection(&collections.meetings, &delta.meetings),
        stakeholders: apply_collection(&collections.stakeholders, &delta.stakeholders),
        stakeholder_categories: apply_collection(
            &collections.stakeholder_categories,
            &delta.stakeholder_categories,
        ),
        deleted_items: tombstones.to_vec(),
    }
}

fn full_collection<T: Entity>(current: &[T]) -> CollectionDelta<T> {
    CollectionDelta {
        added: current.to_vec(),
        ..CollectionDelta::default()
    }
}

fn diff_collection<T: Entity>(snapshot: &[T], current: &[T]) -> CollectionDelta<T> {
    let before: BTreeMap<String, &T> = snapshot.iter().map(|e| (entity_key(e), e)).collect();
    let mut seen = BTreeSet::new();
    let mut delta = CollectionDelta::default();

    for entity in current {
        let key = entity_key(entity);
        match before.get(&key) {
            None => delta.added.push(entity.clone()),
            Some(previous) if *previous != entity => delta.updated.push(entity.clone()),
            Some(_) => {}
        }
        seen.insert(key);
    }

    delta.deleted = before
        .into_keys()
        .filter(|key| !seen.contains(key))
        .collect();
    delta
}

fn apply_collection<T: Entity>(base: &[T], delta: &CollectionDelta<T>) -> Vec<T> {
    let removed: BTreeSet<&str> = delta.deleted.iter().map(String::as_str).collect();
    let mut out: Vec<T> = base
        .iter()
        .filter(|e| !removed.contains(entity_key(*e).as_str()))
        .cloned()
        .collect();

    for entity in delta.added.iter().chain(delta.updated.iter()) {
        let key = entity_key(entity);
        match out.iter().position(|e| entity_key(e) == key) {
            Some(index) => out[index] = entity.clone(),
            None => out.push(entity.clone()),
        }
    }
    out
}
