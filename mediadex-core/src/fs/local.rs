use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

use super::{Filesystem, FsNode};
use crate::error::{MediaError, Result};
use crate::natural::natural_cmp;
use crate::paths::VirtualPath;

/// Real filesystem backed by `tokio::fs`, rooted at the media root.
#[derive(Clone, Debug)]
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &VirtualPath) -> PathBuf {
        let mut out = self.root.clone();
        for segment in path.segments() {
            out.push(segment);
        }
        out
    }
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    async fn list_directory(&self, dir: &VirtualPath) -> Result<Vec<FsNode>> {
        let real = self.resolve(dir);
        let meta = tokio::fs::metadata(&real)
            .await
            .map_err(|e| MediaError::from_io(e, dir.as_str()))?;
        if !meta.is_dir() {
            return Err(MediaError::NotADirectory(dir.to_string()));
        }

        let mut entries = tokio::fs::read_dir(&real)
            .await
            .map_err(|e| MediaError::from_io(e, dir.as_str()))?;

        let mut nodes = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MediaError::from_io(e, dir.as_str()))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(dir = %dir, name = ?file_name, "skipping entry with non UTF-8 name");
                continue;
            };
            let child = match dir.join(name) {
                Ok(child) => child,
                Err(err) => {
                    warn!(dir = %dir, name, "skipping entry: {err}");
                    continue;
                }
            };

            let is_link = match entry.file_type().await {
                Ok(file_type) => file_type.is_symlink(),
                Err(err) => {
                    warn!(path = %child, "skipping entry, file type failed: {err}");
                    continue;
                }
            };

            // File links resolve to their target. A dangling link or an entry
            // removed mid-listing drops out of this observation.
            let meta = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %child, "entry vanished during listing");
                    continue;
                }
                Err(err) => {
                    warn!(path = %child, "skipping entry, metadata failed: {err}");
                    continue;
                }
            };

            // A linked directory may point at an ancestor; walking it never ends.
            if is_link && meta.is_dir() {
                debug!(path = %child, "skipping symlinked directory");
                continue;
            }

            nodes.push(node_from_metadata(child, &meta));
        }

        nodes.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        Ok(nodes)
    }

    async fn stat(&self, path: &VirtualPath) -> Result<FsNode> {
        let meta = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| MediaError::from_io(e, path.as_str()))?;
        Ok(node_from_metadata(path.clone(), &meta))
    }
}

fn node_from_metadata(path: VirtualPath, meta: &Metadata) -> FsNode {
    let modified: DateTime<Utc> = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH));

    if meta.is_dir() {
        FsNode::directory(path, modified)
    } else {
        FsNode::file(path, meta.len(), modified)
    }
}
