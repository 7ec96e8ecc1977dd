//! Metadata store for update records.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::PendingUpdate;

/// Persistence for [`PendingUpdate`] records.
pub trait UpdateStore: Send + Sync {
    fn create(&self, record: PendingUpdate) -> Result<PendingUpdate, StoreError>;

    fn get(&self, id: Uuid) -> Result<Option<PendingUpdate>, StoreError>;

    /// Replace an existing record.
    fn update(&self, record: &PendingUpdate) -> Result<(), StoreError>;

    /// All records, newest first.
    fn list(&self) -> Result<Vec<PendingUpdate>, StoreError>;

    fn remove(&self, id: Uuid) -> Result<(), StoreError>;
}

fn newest_first(records: &mut [PendingUpdate]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, PendingUpdate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdateStore for MemoryStore {
    fn create(&self, record: PendingUpdate) -> Result<PendingUpdate, StoreError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&self, id: Uuid) -> Result<Option<PendingUpdate>, StoreError> {
        Ok(self.records.lock().get(&id).cloned())
    }

    fn update(&self, record: &PendingUpdate) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    fn list(&self) -> Result<Vec<PendingUpdate>, StoreError> {
        let mut all: Vec<_> = self.records.lock().values().cloned().collect();
        newest_first(&mut all);
        Ok(all)
    }

    fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        self.records
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

/// Store backed by a single JSON document, rewritten on every change.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Vec<PendingUpdate>>,
}

impl JsonFileStore {
    /// Open the document at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to a sibling temp file and rename over the document.
    fn persist(&self, records: &[PendingUpdate]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl UpdateStore for JsonFileStore {
    fn create(&self, record: PendingUpdate) -> Result<PendingUpdate, StoreError> {
        let mut records = self.records.lock();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        let mut next = records.clone();
        next.push(record.clone());
        self.persist(&next)?;
        *records = next;
        Ok(record)
    }

    fn get(&self, id: Uuid) -> Result<Option<PendingUpdate>, StoreError> {
        Ok(self.records.lock().iter().find(|r| r.id == id).cloned())
    }

    fn update(&self, record: &PendingUpdate) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let index = records
            .iter()
            .position(|r| r.id == record.id)
            .ok_or(StoreError::NotFound(record.id))?;
        let mut next = records.clone();
        next[index] = record.clone();
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn list(&self) -> Result<Vec<PendingUpdate>, StoreError> {
        let mut all = self.records.lock().clone();
        newest_first(&mut all);
        Ok(all)
    }

    fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let mut next = records.clone();
        next.remove(index);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{UpdateStatus, UploadedFile};
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(version: &str) -> PendingUpdate {
        let file = UploadedFile {
            path: PathBuf::from("/tmp/site.zip"),
            original_name: "site.zip".into(),
            declared_type: "application/zip".into(),
            size_bytes: 10,
        };
        PendingUpdate::new(&file, Some(version.into()), None)
    }

    fn exercise(store: &dyn UpdateStore) {
        let mut older = record("1");
        older.created_at -= Duration::seconds(60);
        let older = store.create(older).unwrap();
        let newer = store.create(record("2")).unwrap();

        assert!(matches!(store.create(newer.clone()), Err(StoreError::Duplicate(_))));

        let listed: Vec<_> = store.list().unwrap().into_iter().map(|r| r.version).collect();
        assert_eq!(listed, ["2", "1"]);

        let mut changed = older.clone();
        changed.begin_processing().unwrap();
        store.update(&changed).unwrap();
        assert_eq!(store.get(older.id).unwrap().unwrap().status, UpdateStatus::Processing);

        store.remove(newer.id).unwrap();
        assert!(store.get(newer.id).unwrap().is_none());
        assert!(matches!(store.remove(newer.id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.update(&newer), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_json_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("updates.json");
        exercise(&JsonFileStore::open(&path).unwrap());
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_store_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("updates.json");
        let id = {
            let store = JsonFileStore::open(&path).unwrap();
            store.create(record("7")).unwrap().id
        };

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(id).unwrap().unwrap().version, "7");
    }

    #[test]
    fn test_json_store_rejects_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("updates.json");
        std::fs::write(&path, "[{").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Serde(_))));
    }
}
