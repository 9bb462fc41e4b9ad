//! Next/previous media-bearing folder resolution.
//!
//! Folders are ordered by a depth-first walk in natural name order. A folder
//! whose direct children include an image, video or audio file is a stop.
//! Below the root, a stop's own subtree is not walked: navigating away from a
//! stop moves to the next sibling branch rather than into its subfolders.
//! The root is always walked. There is no wraparound.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::fs::Filesystem;
use crate::natural::natural_cmp;
use crate::paths::VirtualPath;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Prev,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Next => Direction::Prev,
            Direction::Prev => Direction::Next,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Next => f.write_str("next"),
            Direction::Prev => f.write_str("prev"),
        }
    }
}

/// Administrative or hidden subtrees navigation must behave as if absent.
pub trait PathExclusions: Send + Sync {
    fn is_blocked(&self, path: &VirtualPath) -> bool;
}

/// Blocks configured subtrees and, optionally, any dot-prefixed folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixExclusions {
    prefixes: Vec<VirtualPath>,
    hide_dot_dirs: bool,
}

impl Default for PrefixExclusions {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            hide_dot_dirs: true,
        }
    }
}

impl PrefixExclusions {
    /// The root can never be blocked; a root entry is ignored.
    pub fn new(prefixes: impl IntoIterator<Item = VirtualPath>, hide_dot_dirs: bool) -> Self {
        Self {
            prefixes: prefixes.into_iter().filter(|p| !p.is_root()).collect(),
            hide_dot_dirs,
        }
    }

    /// Nothing blocked, dot folders included.
    pub fn none() -> Self {
        Self::new(Vec::new(), false)
    }

    pub fn prefixes(&self) -> &[VirtualPath] {
        &self.prefixes
    }
}

impl PathExclusions for PrefixExclusions {
    fn is_blocked(&self, path: &VirtualPath) -> bool {
        if self.hide_dot_dirs && path.segments().any(|segment| segment.starts_with('.')) {
            return true;
        }
        self.prefixes.iter().any(|prefix| path.is_within(prefix))
    }
}

/// The part of one listing navigation cares about.
struct FolderScan {
    subdirs: Vec<VirtualPath>,
    has_media: bool,
}

pub struct AdjacentFolderResolver {
    fs: Arc<dyn Filesystem>,
    exclusions: Arc<dyn PathExclusions>,
}

impl fmt::Debug for AdjacentFolderResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdjacentFolderResolver").finish_non_exhaustive()
    }
}

impl AdjacentFolderResolver {
    pub fn new(fs: Arc<dyn Filesystem>, exclusions: Arc<dyn PathExclusions>) -> Self {
        Self { fs, exclusions }
    }

    /// Nearest media-bearing folder from `current` in `direction`, or `None`
    /// when the walk runs off either end of the tree.
    ///
    /// `current` does not have to exist any more; its position among its
    /// siblings is recovered by name.
    #[instrument(skip(self), fields(path = %current, %direction))]
    pub async fn find_adjacent(
        &self,
        current: &VirtualPath,
        direction: Direction,
    ) -> Result<Option<VirtualPath>> {
        let found = match direction {
            Direction::Next => self.find_next(current).await?,
            Direction::Prev => self.find_prev(current).await?,
        };
        debug!(found = ?found.as_ref().map(VirtualPath::as_str), "adjacent folder resolved");
        Ok(found)
    }

    async fn find_next(&self, current: &VirtualPath) -> Result<Option<VirtualPath>> {
        let here = self.scan(current).await?;
        if (current.is_root() || !here.has_media)
            && let Some(hit) = self.first_stop(here.subdirs).await?
        {
            return Ok(Some(hit));
        }

        let mut node = current.clone();
        while let Some(parent) = node.parent() {
            let later: Vec<VirtualPath> = self
                .scan(&parent)
                .await?
                .subdirs
                .into_iter()
                .filter(|sibling| natural_cmp(sibling.name(), node.name()) == Ordering::Greater)
                .collect();
            if let Some(hit) = self.first_stop(later).await? {
                return Ok(Some(hit));
            }
            node = parent;
        }
        Ok(None)
    }

    async fn find_prev(&self, current: &VirtualPath) -> Result<Option<VirtualPath>> {
        let mut node = current.clone();
        while let Some(parent) = node.parent() {
            let scan = self.scan(&parent).await?;
            let earlier: Vec<VirtualPath> = scan
                .subdirs
                .into_iter()
                .filter(|sibling| natural_cmp(sibling.name(), node.name()) == Ordering::Less)
                .collect();
            if let Some(hit) = self.last_stop(earlier).await? {
                return Ok(Some(hit));
            }
            if scan.has_media {
                return Ok(Some(parent));
            }
            node = parent;
        }
        Ok(None)
    }

    /// First stop in the forest rooted at `roots`, walking pre-order.
    async fn first_stop(&self, roots: Vec<VirtualPath>) -> Result<Option<VirtualPath>> {
        let mut stack: Vec<VirtualPath> = roots.into_iter().rev().collect();
        while let Some(dir) = stack.pop() {
            let scan = self.scan(&dir).await?;
            if scan.has_media {
                return Ok(Some(dir));
            }
            stack.extend(scan.subdirs.into_iter().rev());
        }
        Ok(None)
    }

    /// Last stop in the forest rooted at `roots`.
    async fn last_stop(&self, roots: Vec<VirtualPath>) -> Result<Option<VirtualPath>> {
        let mut stack = roots;
        while let Some(dir) = stack.pop() {
            let scan = self.scan(&dir).await?;
            if scan.has_media {
                return Ok(Some(dir));
            }
            stack.extend(scan.subdirs);
        }
        Ok(None)
    }

    /// Lists `dir` once. A folder removed since it was observed counts as
    /// empty.
    async fn scan(&self, dir: &VirtualPath) -> Result<FolderScan> {
        let listing = match self.fs.list_directory(dir).await {
            Ok(listing) => listing,
            Err(err) if err.is_not_found() => {
                return Ok(FolderScan {
                    subdirs: Vec::new(),
                    has_media: false,
                });
            }
            Err(err) => return Err(err),
        };

        let mut subdirs = Vec::new();
        let mut has_media = false;
        for node in listing {
            if node.is_directory() {
                if !self.exclusions.is_blocked(&node.path) {
                    subdirs.push(node.path);
                }
            } else if node.kind.is_media() {
                has_media = true;
            }
        }
        Ok(FolderScan { subdirs, has_media })
    }
}
