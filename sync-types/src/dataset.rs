//! Datasets and deletion markers.

use serde::{Deserialize, Serialize};

use crate::{EntityType, Meeting, Stakeholder, StakeholderCategory, Timestamp};

/// A persisted marker recording that an entity was deleted.
///
/// Tombstones outlive the entity they mark so that a deletion reaches
/// devices that still hold a copy of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// Collection of the deleted entity
    #[serde(rename = "type")]
    pub kind: EntityType,
    /// Merge key of the deleted entity
    pub id: String,
    /// When the deletion happened
    pub deleted_at: Timestamp,
}

impl Tombstone {
    /// Create a tombstone.
    pub fn new(kind: EntityType, id: impl Into<String>, deleted_at: Timestamp) -> Self {
        Self {
            kind,
            id: id.into(),
            deleted_at,
        }
    }
}

/// The complete synchronized state: all collections plus tombstones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// Meetings
    #[serde(default)]
    pub meetings: Vec<Meeting>,
    /// Stakeholders
    #[serde(default)]
    pub stakeholders: Vec<Stakeholder>,
    /// Stakeholder categories
    #[serde(default)]
    pub stakeholder_categories: Vec<StakeholderCategory>,
    /// Deletion markers
    #[serde(default)]
    pub deleted_items: Vec<Tombstone>,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no collection holds an entity.
    ///
    /// Tombstones are not counted: a fresh install that has never seen
    /// data and a device whose data was all deleted both look empty here.
    pub fn is_empty(&self) -> bool {
        self.meetings.is_empty()
            && self.stakeholders.is_empty()
            && self.stakeholder_categories.is_empty()
    }

    /// Total number of entities across all collections.
    pub fn entity_count(&self) -> usize {
        self.meetings.len() + self.stakeholders.len() + self.stakeholder_categories.len()
    }

    /// Add a meeting.
    pub fn with_meeting(mut self, meeting: Meeting) -> Self {
        self.meetings.push(meeting);
        self
    }

    /// Add a stakeholder.
    pub fn with_stakeholder(mut self, stakeholder: Stakeholder) -> Self {
        self.stakeholders.push(stakeholder);
        self
    }

    /// Add a category.
    pub fn with_category(mut self, category: StakeholderCategory) -> Self {
        self.stakeholder_categories.push(category);
        self
    }

    /// Add a tombstone.
    pub fn with_tombstone(mut self, tombstone: Tombstone) -> Self {
        self.deleted_items.push(tombstone);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_dataset_parses_from_partial_json() {
        let ds: Dataset = serde_json::from_str(r#"{"meetings": []}"#).unwrap();
        assert!(ds.is_empty());
        assert!(ds.deleted_items.is_empty());
    }

    #[test]
    fn tombstones_do_not_count_as_data() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let ds = Dataset::new().with_tombstone(Tombstone::new(EntityType::Meeting, "m1", now));
        assert!(ds.is_empty());
        assert_eq!(ds.entity_count(), 0);
    }

    #[test]
    fn tombstone_wire_shape() {
        let json = r#"{"type": "meeting", "id": "m1", "deletedAt": "2024-01-01T09:00:00Z"}"#;
        let t: Tombstone = serde_json::from_str(json).unwrap();
        assert_eq!(t.kind, EntityType::Meeting);
        assert_eq!(t.id, "m1");

        let back = serde_json::to_value(&t).unwrap();
        assert_eq!(back["type"], "meeting");
        assert_eq!(back["deletedAt"], "2024-01-01T09:00:00Z");
    }

    #[test]
    fn collections_use_camel_case_keys() {
        let value = serde_json::to_value(Dataset::new()).unwrap();
        assert!(value.get("stakeholderCategories").is_some());
        assert!(value.get("deletedItems").is_some());
    }
}
