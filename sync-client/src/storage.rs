//! Local durable key/value store.
//!
//! The application's local database is the system of record; the sync
//! engine only needs `get`/`set`/`remove` of whole string values under a
//! handful of fixed keys. Values are JSON documents and every write
//! replaces the whole value.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use minutes_sync_types::{
    normalize_key, Dataset, Entity, EntityType, Meeting, Stakeholder, StakeholderCategory,
    Timestamp, Tombstone,
};

use crate::error::StorageError;

/// Fixed keys used in the local store.
pub mod keys {
    /// Provider settings.
    pub const SYNC_CONFIG: &str = "sync_config";
    /// Device identity.
    pub const DEVICE_ID: &str = "sync_device_id";
    /// Persisted operation queue.
    pub const OPERATION_QUEUE: &str = "sync_operation_queue";
    /// Dataset as of the last successful sync.
    pub const SNAPSHOT: &str = "sync_snapshot";
    /// Time of the last successful sync.
    pub const LAST_SYNC_TIME: &str = "last_sync_time";
    /// Meetings collection.
    pub const MEETINGS: &str = "meetings";
    /// Stakeholders collection.
    pub const STAKEHOLDERS: &str = "stakeholders";
    /// Stakeholder categories collection.
    pub const STAKEHOLDER_CATEGORIES: &str = "stakeholder_categories";
    /// Tombstones.
    pub const DELETED_ITEMS: &str = "deleted_items";

    /// Keys owned by the sync engine (cleared on reset).
    pub const SYNC_KEYS: [&str; 4] = [SYNC_CONFIG, OPERATION_QUEUE, SNAPSHOT, LAST_SYNC_TIME];
}

/// Persistent string key/value map.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value under `key`.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value under `key`.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete the value under `key`. Missing keys are not an error.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key).await
    }
}

/// Read and decode a JSON value.
pub async fn load_json<T, S>(store: &S, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get_item(key).await? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Encode and write a JSON value.
pub async fn save_json<T, S>(store: &S, key: &str, value: &T) -> Result<(), StorageError>
where
    T: Serialize + ?Sized + Sync,
    S: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set_item(key, &raw).await
}

/// In-memory store. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether `key` holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}

/// Store keeping one `<key>.json` file per key in a directory.
///
/// Writes go through a temp file and a rename, so a crash leaves either
/// the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store in `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Directory holding the values.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The application's dataset as stored locally, one key per collection.
pub struct LocalData<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyValueStore + ?Sized> LocalData<'a, S> {
    /// Wrap a store.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Read all collections. Missing collections are empty.
    pub async fn load(&self) -> Result<Dataset, StorageError> {
        Ok(Dataset {
            meetings: load_json(self.store, keys::MEETINGS).await?.unwrap_or_default(),
            stakeholders: load_json(self.store, keys::STAKEHOLDERS)
                .await?
                .unwrap_or_default(),
            stakeholder_categories: load_json(self.store, keys::STAKEHOLDER_CATEGORIES)
                .await?
                .unwrap_or_default(),
            deleted_items: load_json(self.store, keys::DELETED_ITEMS)
                .await?
                .unwrap_or_default(),
        })
    }

    /// Write all collections.
    pub async fn save(&self, data: &Dataset) -> Result<(), StorageError> {
        save_json(self.store, keys::MEETINGS, &data.meetings).await?;
        save_json(self.store, keys::STAKEHOLDERS, &data.stakeholders).await?;
        save_json(
            self.store,
            keys::STAKEHOLDER_CATEGORIES,
            &data.stakeholder_categories,
        )
        .await?;
        save_json(self.store, keys::DELETED_ITEMS, &data.deleted_items).await
    }

    /// Remove an entity and record a tombstone for it.
    ///
    /// Categories can be addressed by id or by name. The tombstone is
    /// recorded even when nothing matched locally, so the deletion still
    /// reaches devices that have the entity. Returns whether a local
    /// entity was removed.
    pub async fn delete_entity(
        &self,
        kind: EntityType,
        id: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let mut data = self.load().await?;

        let removed_key = match kind {
            EntityType::Meeting => remove_matching(&mut data.meetings, |m: &Meeting| m.id == id),
            EntityType::Stakeholder => {
                remove_matching(&mut data.stakeholders, |s: &Stakeholder| s.id == id)
            }
            EntityType::Category => {
                let wanted = normalize_key(id);
                remove_matching(
                    &mut data.stakeholder_categories,
                    |c: &StakeholderCategory| {
                        c.id.as_deref() == Some(id) || c.reference_keys().contains(&wanted)
                    },
                )
            }
        };

        let removed = removed_key.is_some();
        let tombstone_id = removed_key.unwrap_or_else(|| id.to_string());
        data.deleted_items
            .retain(|t| !(t.kind == kind && t.id == tombstone_id));
        data.deleted_items
            .push(Tombstone::new(kind, tombstone_id, now));

        self.save(&data).await?;
        Ok(removed)
    }
}

fn remove_matching<T: Entity>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> Option<String> {
    let index = items.iter().position(|e| matches(e))?;
    let entity = items.remove(index);
    entity.merge_key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn sample() -> Dataset {
        Dataset::new()
            .with_meeting(Meeting::new("m1", "Kickoff", at(1)))
            .with_stakeholder(Stakeholder::new("s1", "Ada", at(1)))
            .with_category(StakeholderCategory::named("Investors", at(1)))
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_item("k").await.unwrap(), None);

        store.set_item("k", "v").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("v"));

        store.remove_item("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn memory_store_survives_poisoned_lock() {
        let store = MemoryStore::new();
        store.set_item("k", "v").await.unwrap();
        let shared = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.inner.lock().unwrap();
            panic!("writer crashed");
        })
        .join();

        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("v"));
        store.set_item("k2", "v2").await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains("k2"));
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("data")).await.unwrap();

        store.set_item("sync_snapshot", "{\"a\":1}").await.unwrap();
        assert_eq!(
            store.get_item("sync_snapshot").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert!(dir.path().join("data").join("sync_snapshot.json").exists());

        store.remove_item("sync_snapshot").await.unwrap();
        store.remove_item("sync_snapshot").await.unwrap();
        assert_eq!(store.get_item("sync_snapshot").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.set_item("last_sync_time", "\"x\"").await.unwrap();
        }
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.get_item("last_sync_time").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_json_is_reported_with_key() {
        let store = MemoryStore::new();
        store.set_item(keys::MEETINGS, "not json").await.unwrap();

        let err = LocalData::new(&store).load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { ref key, .. } if key == keys::MEETINGS));
    }

    #[tokio::test]
    async fn local_data_roundtrip() {
        let store = MemoryStore::new();
        let local = LocalData::new(&store);

        assert!(local.load().await.unwrap().is_empty());

        local.save(&sample()).await.unwrap();
        assert_eq!(local.load().await.unwrap(), sample());
        assert!(store.contains(keys::STAKEHOLDER_CATEGORIES));
    }

    #[tokio::test]
    async fn delete_entity_records_tombstone() {
        let store = MemoryStore::new();
        let local = LocalData::new(&store);
        local.save(&sample()).await.unwrap();

        assert!(local
            .delete_entity(EntityType::Meeting, "m1", at(5))
            .await
            .unwrap());

        let data = local.load().await.unwrap();
        assert!(data.meetings.is_empty());
        assert_eq!(
            data.deleted_items,
            vec![Tombstone::new(EntityType::Meeting, "m1", at(5))]
        );
    }

    #[tokio::test]
    async fn delete_category_by_name_uses_merge_key() {
        let store = MemoryStore::new();
        let local = LocalData::new(&store);
        local.save(&sample()).await.unwrap();

        assert!(local
            .delete_entity(EntityType::Category, "INVESTORS", at(5))
            .await
            .unwrap());

        let data = local.load().await.unwrap();
        assert!(data.stakeholder_categories.is_empty());
        assert_eq!(data.deleted_items[0].id, "investors");
    }

    #[tokio::test]
    async fn delete_unknown_entity_still_records_tombstone() {
        let store = MemoryStore::new();
        let local = LocalData::new(&store);

        assert!(!local
            .delete_entity(EntityType::Stakeholder, "s9", at(5))
            .await
            .unwrap());
        assert_eq!(local.load().await.unwrap().deleted_items.len(), 1);
    }

    #[tokio::test]
    async fn repeated_delete_keeps_single_tombstone() {
        let store = MemoryStore::new();
        let local = LocalData::new(&store);
        local
            .delete_entity(EntityType::Meeting, "m1", at(5))
            .await
            .unwrap();
        local
            .delete_entity(EntityType::Meeting, "m1", at(6))
            .await
            .unwrap();

        let data = local.load().await.unwrap();
        assert_eq!(
            data.deleted_items,
            vec![Tombstone::new(EntityType::Meeting, "m1", at(6))]
        );
    }
}
