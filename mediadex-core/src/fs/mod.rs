//! Filesystem interface: one-level directory listings as [`FsNode`]s.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::MediaKind;
use crate::error::Result;
use crate::paths::VirtualPath;

mod local;
mod memory;

pub use local::LocalFilesystem;
pub use memory::InMemoryFs;

/// A directory entry observed on one listing. Never persisted as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsNode {
    pub name: String,
    pub path: VirtualPath,
    pub kind: MediaKind,
    /// `None` for directories.
    pub size: Option<u64>,
    pub modified_at: DateTime<Utc>,
}

impl FsNode {
    pub fn directory(path: VirtualPath, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: path.name().to_string(),
            path,
            kind: MediaKind::Directory,
            size: None,
            modified_at: normalize_mtime(modified_at),
        }
    }

    pub fn file(path: VirtualPath, size: u64, modified_at: DateTime<Utc>) -> Self {
        let name = path.name().to_string();
        Self {
            kind: MediaKind::from_file_name(&name),
            name,
            path,
            size: Some(size),
            modified_at: normalize_mtime(modified_at),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == MediaKind::Directory
    }
}

/// Listing and stat over virtual paths.
///
/// Implementations must report a missing path as
/// [`MediaError::NotFound`](crate::error::MediaError::NotFound) and listing a
/// file as [`MediaError::NotADirectory`](crate::error::MediaError::NotADirectory).
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Direct children of `dir`, in natural name order.
    async fn list_directory(&self, dir: &VirtualPath) -> Result<Vec<FsNode>>;

    async fn stat(&self, path: &VirtualPath) -> Result<FsNode>;
}

/// Millisecond precision survives every store we persist to, so equal
/// timestamps keep comparing equal after a round trip.
pub fn normalize_mtime(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}
