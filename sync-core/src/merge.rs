//! Merge of two full datasets.
//!
//! Each collection is merged independently:
//! 1. union both entity lists
//! 2. combine both sides' tombstones, newest marker per `(type, id)`
//! 3. keep the newest copy per key (strict last-writer-wins on
//!    `updatedAt`, then `lastSaved`, then `createdAt`; no field-level merge)
//! 4. drop entities a newer tombstone deleted, discard tombstones an
//!    entity outlived
//!
//! A post-pass clears stakeholder category references that no longer
//! resolve to a merged category. The output is ordered by key so that
//! merging is independent of argument order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use minutes_sync_types::{normalize_key, Dataset, Entity, EntityType, Stakeholder, StakeholderCategory};

use crate::checksum::{canonical_json, entity_key};
use crate::tombstone::{TombstoneSet, Verdict};

/// What a merge did, for logging and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entities excluded because a newer tombstone deleted them.
    pub excluded: usize,
    /// Tombstones discarded because the entity was edited afterwards.
    pub resurrected: Vec<(EntityType, String)>,
    /// Stakeholders whose dangling category reference was cleared.
    pub orphans_cleared: usize,
    /// Keys present on both sides where the remote copy won.
    pub remote_wins: usize,
}

/// Merge `local` and `remote` into one dataset.
///
/// Pure: neither input is modified.
pub fn merge(local: &Dataset, remote: &Dataset) -> Dataset {
    merge_with_report(local, remote).0
}

/// Merge `local` and `remote`, also reporting what the merge decided.
pub fn merge_with_report(local: &Dataset, remote: &Dataset) -> (Dataset, MergeReport) {
    let mut tombstones = TombstoneSet::combined(local, remote);
    let mut report = MergeReport::default();

    let meetings = merge_collection(&local.meetings, &remote.meetings, &mut tombstones, &mut report);
    let mut stakeholders = merge_collection(
        &local.stakeholders,
        &remote.stakeholders,
        &mut tombstones,
        &mut report,
    );
    let categories = merge_collection(
        &local.stakeholder_categories,
        &remote.stakeholder_categories,
        &mut tombstones,
        &mut report,
    );

    report.orphans_cleared = clear_orphaned_categories(&mut stakeholders, &categories);

    let merged = Dataset {
        meetings,
        stakeholders,
        stakeholder_categories: categories,
        deleted_items: tombstones.to_vec(),
    };
    (merged, report)
}

fn merge_collection<T: Entity>(
    local: &[T],
    remote: &[T],
    tombstones: &mut TombstoneSet,
    report: &mut MergeReport,
) -> Vec<T> {
    let mut winners: BTreeMap<String, (T, bool)> = BTreeMap::new();

    for (entity, from_remote) in local
        .iter()
        .map(|e| (e, false))
        .chain(remote.iter().map(|e| (e, true)))
    {
        let key = entity_key(entity);
        match winners.get_mut(&key) {
            None => {
                winners.insert(key, (entity.clone(), from_remote));
            }
            Some(slot) => {
                if newer(entity, &slot.0) == Ordering::Greater {
                    *slot = (entity.clone(), from_remote);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(winners.len());
    for (key, (entity, from_remote)) in winners {
        match tombstones.resolve(T::KIND, &key, entity.last_modified()) {
            Verdict::Deleted => {
                report.excluded += 1;
                continue;
            }
            Verdict::Resurrected => report.resurrected.push((T::KIND, key)),
            Verdict::Alive => {}
        }
        if from_remote && local.iter().any(|e| entity_key(e) == entity_key(&entity)) {
            report.remote_wins += 1;
        }
        out.push(entity);
    }
    out
}

/// Compare two copies of the same entity.
///
/// Later modification time wins. Equal times fall back to comparing the
/// canonical JSON, so the choice never depends on which side a copy came
/// from.
fn newer<T: Entity>(candidate: &T, existing: &T) -> Ordering {
    candidate
        .last_modified()
        .cmp(&existing.last_modified())
        .then_with(|| canonical_json(candidate).cmp(&canonical_json(existing)))
}

fn clear_orphaned_categories(
    stakeholders: &mut [Stakeholder],
    categories: &[StakeholderCategory],
) -> usize {
    let known: BTreeSet<String> = categories
        .iter()
        .flat_map(StakeholderCategory::reference_keys)
        .collect();

    let mut cleared = 0;
    for stakeholder in stakeholders.iter_mut() {
        let dangling = match &stakeholder.category {
            Some(reference) => !known.contains(&normalize_key(reference)),
            None => false,
        };
        if dangling {
            stakeholder.category = None;
            cleared += 1;
        }
    }
    cleared
}
