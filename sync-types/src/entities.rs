//! Synchronized entity types.
//!
//! Every entity carries a stable identifier and optional modification
//! timestamps. Fields the application does not know about are kept in
//! `extra` so that payloads written by other clients survive a round trip.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// Timestamp type used throughout the data model (RFC 3339 on the wire).
pub type Timestamp = DateTime<Utc>;

/// The Unix epoch, used as the modification time of entities that carry none.
pub fn epoch() -> Timestamp {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Normalize a human-entered key (category name, label) for comparison.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Discriminator for the synchronized collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A meeting record
    Meeting,
    /// A stakeholder (contact) record
    Stakeholder,
    /// A stakeholder category
    Category,
}

impl EntityType {
    /// All entity types, in collection order.
    pub const ALL: [EntityType; 3] = [
        EntityType::Meeting,
        EntityType::Stakeholder,
        EntityType::Category,
    ];

    /// Wire name of this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Meeting => "meeting",
            EntityType::Stakeholder => "stakeholder",
            EntityType::Category => "category",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_key(s).as_str() {
            "meeting" | "meetings" => Ok(EntityType::Meeting),
            "stakeholder" | "stakeholders" => Ok(EntityType::Stakeholder),
            "category" | "categories" | "stakeholdercategory" => Ok(EntityType::Category),
            _ => Err(SyncError::UnknownEntityType(s.to_string())),
        }
    }
}

/// Common behaviour of synchronized entities.
///
/// The merge and delta algorithms are written against this trait so that
/// they treat all three collections uniformly.
pub trait Entity: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned {
    /// Which collection this entity lives in.
    const KIND: EntityType;

    /// The stable identifier, if the entity has a non-empty one.
    fn id(&self) -> Option<&str>;

    /// Key used to match the same entity across datasets.
    ///
    /// Defaults to the stable id.
    fn merge_key(&self) -> Option<String> {
        self.id().map(str::to_string)
    }

    /// Creation timestamp.
    fn created_at(&self) -> Option<Timestamp>;

    /// Last update timestamp.
    fn updated_at(&self) -> Option<Timestamp>;

    /// Last explicit save timestamp (only meetings track this).
    fn last_saved(&self) -> Option<Timestamp> {
        None
    }

    /// Modification time used for last-writer-wins and tombstone checks.
    ///
    /// First present of `updatedAt`, `lastSaved`, `createdAt`, else the epoch.
    fn last_modified(&self) -> Timestamp {
        self.updated_at()
            .or_else(|| self.last_saved())
            .or_else(|| self.created_at())
            .unwrap_or_else(epoch)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// A meeting and its notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    /// Stable identifier
    pub id: String,
    /// Meeting title
    #[serde(default)]
    pub title: String,
    /// Scheduled date, as entered by the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Stakeholders attending the meeting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stakeholder_ids: Vec<String>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Last explicit save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<Timestamp>,
    /// Unrecognized fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meeting {
    /// Create a meeting created and updated at `now`.
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            date: None,
            notes: None,
            stakeholder_ids: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
            last_saved: None,
            extra: Map::new(),
        }
    }

    /// Set the notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl Entity for Meeting {
    const KIND: EntityType = EntityType::Meeting;

    fn id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    fn last_saved(&self) -> Option<Timestamp> {
        self.last_saved
    }
}

/// A person tracked across meetings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stakeholder {
    /// Stable identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Contact email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Organization the stakeholder belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Reference to a category by id, key or name
    #[serde(default, alias = "categoryId", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Unrecognized fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Stakeholder {
    /// Create a stakeholder created and updated at `now`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            organization: None,
            category: None,
            created_at: Some(now),
            updated_at: Some(now),
            extra: Map::new(),
        }
    }

    /// Assign a category reference.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl Entity for Stakeholder {
    const KIND: EntityType = EntityType::Stakeholder;

    fn id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }
}

/// A grouping for stakeholders.
///
/// Categories imported from older clients may lack a stable id; those are
/// matched by their normalized `key`, `name` or `label` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeholderCategory {
    /// Stable identifier, if assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Machine key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Alternative display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Display color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Unrecognized fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StakeholderCategory {
    /// Create a category with a stable id.
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::named(name, now)
        }
    }

    /// Create a category identified only by its name.
    pub fn named(name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: None,
            key: None,
            name: Some(name.into()),
            label: None,
            color: None,
            created_at: Some(now),
            updated_at: Some(now),
            extra: Map::new(),
        }
    }

    /// All normalized values a stakeholder may use to reference this category.
    pub fn reference_keys(&self) -> Vec<String> {
        [&self.id, &self.key, &self.name, &self.label]
            .into_iter()
            .flatten()
            .filter(|v| !v.trim().is_empty())
            .map(|v| normalize_key(v))
            .collect()
    }
}

impl Entity for StakeholderCategory {
    const KIND: EntityType = EntityType::Category;

    fn id(&self) -> Option<&str> {
        self.id.as_deref().and_then(non_empty)
    }

    fn merge_key(&self) -> Option<String> {
        if let Some(id) = self.id() {
            return Some(id.to_string());
        }
        [&self.key, &self.name, &self.label]
            .into_iter()
            .flatten()
            .find(|v| !v.trim().is_empty())
            .map(|v| normalize_key(v))
    }

    fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn entity_type_parses_wire_names() {
        assert_eq!("meeting".parse::<EntityType>().unwrap(), EntityType::Meeting);
        assert_eq!("Stakeholders".parse::<EntityType>().unwrap(), EntityType::Stakeholder);
        assert_eq!("category".parse::<EntityType>().unwrap(), EntityType::Category);
        assert!("invoice".parse::<EntityType>().is_err());
    }

    #[test]
    fn entity_type_serializes_lowercase() {
        let json = serde_json::to_string(&EntityType::Category).unwrap();
        assert_eq!(json, "\"category\"");
    }

    #[test]
    fn last_modified_prefers_updated_at() {
        let mut m = Meeting::new("m1", "Kickoff", at(8));
        m.updated_at = Some(at(10));
        m.last_saved = Some(at(12));
        assert_eq!(m.last_modified(), at(10));
    }

    #[test]
    fn last_modified_falls_back_in_order() {
        let mut m = Meeting::new("m1", "Kickoff", at(8));
        m.updated_at = None;
        m.last_saved = Some(at(9));
        assert_eq!(m.last_modified(), at(9));

        m.last_saved = None;
        assert_eq!(m.last_modified(), at(8));

        m.created_at = None;
        assert_eq!(m.last_modified(), epoch());
    }

    #[test]
    fn meeting_parses_camel_case_and_keeps_unknown_fields() {
        let json = r#"{
            "id": "m1",
            "title": "Weekly",
            "updatedAt": "2024-01-01T10:00:00Z",
            "stakeholderIds": ["s1"],
            "transcript": {"lang": "en"}
        }"#;
        let m: Meeting = serde_json::from_str(json).unwrap();
        assert_eq!(m.updated_at, Some(at(10)));
        assert_eq!(m.stakeholder_ids, vec!["s1".to_string()]);
        assert!(m.extra.contains_key("transcript"));

        let back = serde_json::to_value(&m).unwrap();
        assert_eq!(back["transcript"]["lang"], "en");
        assert_eq!(back["updatedAt"], "2024-01-01T10:00:00Z");
    }

    #[test]
    fn stakeholder_accepts_category_id_alias() {
        let json = r#"{"id": "s1", "name": "Ada", "categoryId": "c1"}"#;
        let s: Stakeholder = serde_json::from_str(json).unwrap();
        assert_eq!(s.category.as_deref(), Some("c1"));
    }

    #[test]
    fn category_without_id_merges_by_normalized_name() {
        let c = StakeholderCategory::named("  Investors ", at(9));
        assert_eq!(c.id(), None);
        assert_eq!(c.merge_key().as_deref(), Some("investors"));
    }

    #[test]
    fn category_with_id_merges_by_id() {
        let c = StakeholderCategory::new("c1", "Investors", at(9));
        assert_eq!(c.merge_key().as_deref(), Some("c1"));
    }

    #[test]
    fn category_reference_keys_cover_all_names() {
        let mut c = StakeholderCategory::new("C1", "Investors", at(9));
        c.label = Some("VCs".into());
        let keys = c.reference_keys();
        assert!(keys.contains(&"c1".to_string()));
        assert!(keys.contains(&"investors".to_string()));
        assert!(keys.contains(&"vcs".to_string()));
    }

    #[test]
    fn blank_id_is_treated_as_missing() {
        let m = Meeting::new("  ", "Untitled", at(1));
        assert_eq!(m.id(), None);
        assert_eq!(m.merge_key(), None);
    }
}
