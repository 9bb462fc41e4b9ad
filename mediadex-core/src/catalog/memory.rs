use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::{ChangeSet, MediaRecord, MetadataStore, dir_of};
use crate::error::{MediaError, Result};
use crate::paths::VirtualPath;

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<BTreeMap<VirtualPath, MediaRecord>>,
    commits: Mutex<u64>,
}

impl fmt::Debug for InMemoryMetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetadataStore")
            .field("records", &self.records.lock().len())
            .field("commits", &*self.commits.lock())
            .finish()
    }
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-empty change sets applied so far.
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn list_records(&self, dir: &VirtualPath) -> Result<Vec<MediaRecord>> {
        let records = self.records.lock();
        Ok(records
            .values()
            .filter(|record| &record.dir_path == dir)
            .cloned()
            .collect())
    }

    async fn get_record(&self, path: &VirtualPath) -> Result<Option<MediaRecord>> {
        Ok(self.records.lock().get(path).cloned())
    }

    async fn commit(&self, changes: &ChangeSet) -> Result<()> {
        // Build the next state off to the side and swap it in, so a failure
        // part way leaves the previous state untouched.
        let mut records = self.records.lock();
        let mut next = records.clone();
        let now = Utc::now();

        for insert in &changes.inserts {
            match next.get_mut(&insert.path) {
                // Lost a race with a concurrent reconcile of the same dir:
                // keep the existing identity, take the newer metadata.
                Some(existing) => {
                    existing.file_modified_at = insert.file_modified_at;
                    existing.file_size = insert.file_size;
                    existing.updated_at = now;
                }
                None => {
                    next.insert(
                        insert.path.clone(),
                        MediaRecord {
                            id: Uuid::now_v7(),
                            path: insert.path.clone(),
                            dir_path: insert.dir_path.clone(),
                            title: insert.title.clone(),
                            file_modified_at: insert.file_modified_at,
                            file_size: insert.file_size,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
            }
        }

        for update in &changes.updates {
            if let Some(existing) = next.get_mut(&update.path) {
                existing.file_modified_at = update.file_modified_at;
                existing.file_size = update.file_size;
                existing.updated_at = now;
            }
        }

        for path in &changes.deletes {
            next.remove(path);
        }

        *records = next;
        *self.commits.lock() += 1;
        Ok(())
    }

    async fn set_title(&self, path: &VirtualPath, title: &str) -> Result<bool> {
        let mut records = self.records.lock();
        match records.get_mut(path) {
            Some(record) => {
                record.title = title.to_string();
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rewrite_prefix(&self, from: &VirtualPath, to: &VirtualPath) -> Result<u64> {
        if from.is_root() || to.is_root() {
            return Err(MediaError::InvalidPath {
                path: from.to_string(),
                reason: "cannot relocate the library root",
            });
        }

        let mut records = self.records.lock();
        let moving: Vec<VirtualPath> = records
            .keys()
            .filter(|path| path.is_within(from))
            .cloned()
            .collect();

        let mut next = records.clone();
        let mut moved = Vec::with_capacity(moving.len());
        for old in &moving {
            if let Some(mut record) = next.remove(old) {
                let Some(new_path) = old.rebase(from, to) else {
                    continue;
                };
                record.dir_path = dir_of(&new_path);
                record.path = new_path;
                record.updated_at = Utc::now();
                moved.push(record);
            }
        }
        for record in moved {
            if next.contains_key(&record.path) {
                return Err(MediaError::Internal(format!(
                    "relocation target already has a record at {}",
                    record.path
                )));
            }
            next.insert(record.path.clone(), record);
        }

        *records = next;
        Ok(moving.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewMediaRecord;

    fn vp(raw: &str) -> VirtualPath {
        VirtualPath::parse(raw).unwrap()
    }

    fn insert(path: &str) -> NewMediaRecord {
        let path = vp(path);
        NewMediaRecord {
            dir_path: dir_of(&path),
            title: path.name().to_string(),
            path,
            file_modified_at: Utc::now(),
            file_size: 1,
        }
    }

    #[tokio::test]
    async fn rewrite_prefix_moves_subtree_and_dir_paths() {
        let store = InMemoryMetadataStore::new();
        let mut changes = ChangeSet::empty(vp("/A"));
        changes.inserts = vec![insert("/A/1.jpg"), insert("/A/sub/2.jpg"), insert("/AB/3.jpg")];
        store.commit(&changes).await.unwrap();

        let moved = store.rewrite_prefix(&vp("/A"), &vp("/Z/A")).await.unwrap();
        assert_eq!(moved, 2);

        let record = store.get_record(&vp("/Z/A/sub/2.jpg")).await.unwrap().unwrap();
        assert_eq!(record.dir_path, vp("/Z/A/sub"));
        assert!(store.get_record(&vp("/AB/3.jpg")).await.unwrap().is_some());
        assert!(store.get_record(&vp("/A/1.jpg")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rewrite_prefix_renames_single_file() {
        let store = InMemoryMetadataStore::new();
        let mut changes = ChangeSet::empty(vp("/A"));
        changes.inserts = vec![insert("/A/1.jpg")];
        store.commit(&changes).await.unwrap();

        store.rewrite_prefix(&vp("/A/1.jpg"), &vp("/B/one.jpg")).await.unwrap();
        let record = store.get_record(&vp("/B/one.jpg")).await.unwrap().unwrap();
        assert_eq!(record.dir_path, vp("/B"));
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_identity() {
        let store = InMemoryMetadataStore::new();
        let mut changes = ChangeSet::empty(vp("/A"));
        changes.inserts = vec![insert("/A/1.jpg")];
        store.commit(&changes).await.unwrap();
        let first = store.get_record(&vp("/A/1.jpg")).await.unwrap().unwrap();

        store.commit(&changes).await.unwrap();
        let second = store.get_record(&vp("/A/1.jpg")).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.len(), 1);
    }
}
