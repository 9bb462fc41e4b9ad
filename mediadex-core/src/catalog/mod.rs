//! Persisted per-file metadata and the store port the reconciler writes through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::paths::VirtualPath;

mod memory;
#[cfg(feature = "database")]
mod postgres;

pub use memory::InMemoryMetadataStore;
#[cfg(feature = "database")]
pub use postgres::PostgresMetadataStore;

/// One row per file under a reconciled directory, keyed by `path`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: Uuid,
    pub path: VirtualPath,
    pub dir_path: VirtualPath,
    pub title: String,
    pub file_modified_at: DateTime<Utc>,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A file first observed on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMediaRecord {
    pub path: VirtualPath,
    pub dir_path: VirtualPath,
    pub title: String,
    pub file_modified_at: DateTime<Utc>,
    pub file_size: u64,
}

/// Metadata refresh for a file whose modification time moved. Titles are
/// not part of the update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub path: VirtualPath,
    pub file_modified_at: DateTime<Utc>,
    pub file_size: u64,
}

/// Everything one reconciliation pass wants to write for one directory.
/// Stores apply it as a single unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub dir_path: VirtualPath,
    pub inserts: Vec<NewMediaRecord>,
    pub updates: Vec<RecordUpdate>,
    pub deletes: Vec<VirtualPath>,
}

impl ChangeSet {
    pub fn empty(dir_path: VirtualPath) -> Self {
        Self {
            dir_path,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Repository for [`MediaRecord`]s.
///
/// Tag and favorite associations belong to other collaborators; deleting a
/// record must cascade to them.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Records whose `dir_path` equals `dir`.
    async fn list_records(&self, dir: &VirtualPath) -> Result<Vec<MediaRecord>>;

    async fn get_record(&self, path: &VirtualPath) -> Result<Option<MediaRecord>>;

    /// Applies inserts, updates and deletes atomically: either all of them
    /// are visible afterwards or none are.
    async fn commit(&self, changes: &ChangeSet) -> Result<()>;

    /// User-facing title edit.
    async fn set_title(&self, path: &VirtualPath, title: &str) -> Result<bool>;

    /// Moves every record at or beneath `from` to the same relative position
    /// beneath `to`. Returns the number of records moved.
    async fn rewrite_prefix(&self, from: &VirtualPath, to: &VirtualPath) -> Result<u64>;
}

/// Directory part a record at `path` lives in.
pub(crate) fn dir_of(path: &VirtualPath) -> VirtualPath {
    path.parent().unwrap_or_else(VirtualPath::root)
}
