//! Filesystem to store synchronization, one directory level at a time.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::catalog::{ChangeSet, MediaRecord, MetadataStore, NewMediaRecord, RecordUpdate};
use crate::error::Result;
use crate::fs::{Filesystem, FsNode, normalize_mtime};
use crate::paths::VirtualPath;

/// What one [`Reconciler::reconcile`] call changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }

    fn from_changes(changes: &ChangeSet) -> Self {
        Self {
            inserted: changes.inserts.len(),
            updated: changes.updates.len(),
            deleted: changes.deletes.len(),
        }
    }
}

/// Makes the store's records for a directory match what is on disk.
///
/// Each call lists exactly one directory level and writes one change set, so
/// calls for different directories never touch the same rows. Calls for the
/// same directory converge on the same result.
#[derive(Clone)]
pub struct Reconciler {
    fs: Arc<dyn Filesystem>,
    store: Arc<dyn MetadataStore>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(fs: Arc<dyn Filesystem>, store: Arc<dyn MetadataStore>) -> Self {
        Self { fs, store }
    }

    #[instrument(skip(self), fields(dir = %dir))]
    pub async fn reconcile(&self, dir: &VirtualPath) -> Result<ReconcileReport> {
        let listing = match self.fs.list_directory(dir).await {
            Ok(listing) => listing,
            Err(err) if err.is_not_found() => {
                debug!("directory is gone, reconciling against an empty listing");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let records = self.store.list_records(dir).await?;
        let changes = plan_changes(dir, &listing, &records);
        let report = ReconcileReport::from_changes(&changes);

        if changes.is_empty() {
            debug!("records already match disk");
            return Ok(report);
        }

        self.store.commit(&changes).await?;
        info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "reconciled directory"
        );
        Ok(report)
    }
}

/// Diffs one directory listing against the records stored for it.
///
/// Only direct file children count. Records are considered current when
/// their modification time equals the listed one; size alone never triggers
/// an update.
pub fn plan_changes(dir: &VirtualPath, listing: &[FsNode], records: &[MediaRecord]) -> ChangeSet {
    let existing: HashMap<&VirtualPath, &MediaRecord> =
        records.iter().map(|record| (&record.path, record)).collect();

    let mut changes = ChangeSet::empty(dir.clone());
    let mut seen: HashSet<&VirtualPath> = HashSet::with_capacity(listing.len());

    for node in listing.iter().filter(|node| !node.is_directory()) {
        seen.insert(&node.path);
        let size = node.size.unwrap_or_default();
        match existing.get(&node.path) {
            None => changes.inserts.push(NewMediaRecord {
                path: node.path.clone(),
                dir_path: dir.clone(),
                title: node.name.clone(),
                file_modified_at: node.modified_at,
                file_size: size,
            }),
            Some(record) if normalize_mtime(record.file_modified_at) != node.modified_at => {
                changes.updates.push(RecordUpdate {
                    path: node.path.clone(),
                    file_modified_at: node.modified_at,
                    file_size: size,
                });
            }
            Some(_) => {}
        }
    }

    changes.deletes = records
        .iter()
        .filter(|record| !seen.contains(&record.path))
        .map(|record| record.path.clone())
        .collect();

    changes
}
