use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use super::{Filesystem, FsNode};
use crate::error::{MediaError, Result};
use crate::natural::natural_cmp;
use crate::paths::VirtualPath;

/// In-memory filesystem for tests and fixtures.
///
/// Parent directories are created implicitly. Mutations take `&self` so a
/// shared instance can change between calls the way a real tree does.
#[derive(Default)]
pub struct InMemoryFs {
    nodes: RwLock<HashMap<VirtualPath, Node>>,
}

#[derive(Clone)]
enum Node {
    Dir {
        children: Vec<VirtualPath>,
        modified: DateTime<Utc>,
    },
    File {
        len: u64,
        modified: DateTime<Utc>,
    },
}

impl fmt::Debug for InMemoryFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryFs")
            .field("nodes", &self.nodes.read().len())
            .finish()
    }
}

impl InMemoryFs {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.nodes.write().insert(
            VirtualPath::root(),
            Node::Dir {
                children: Vec::new(),
                modified: Utc::now(),
            },
        );
        fs
    }

    pub fn add_dir(&self, path: &str) -> Result<()> {
        let path = VirtualPath::parse(path)?;
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Ok(());
        }
        Self::ensure_parent_link(&mut nodes, &path)?;
        nodes.insert(
            path,
            Node::Dir {
                children: Vec::new(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn add_file(&self, path: &str, len: u64) -> Result<()> {
        self.add_file_with_mtime(path, len, Utc::now())
    }

    /// Adds or replaces a file.
    pub fn add_file_with_mtime(&self, path: &str, len: u64, modified: DateTime<Utc>) -> Result<()> {
        let path = VirtualPath::parse(path)?;
        let mut nodes = self.nodes.write();
        if let Some(Node::Dir { .. }) = nodes.get(&path) {
            return Err(MediaError::Internal(format!("{path} is a directory")));
        }
        Self::ensure_parent_link(&mut nodes, &path)?;
        nodes.insert(path, Node::File { len, modified });
        Ok(())
    }

    /// Removes a node and, for directories, everything beneath it.
    pub fn remove(&self, path: &str) -> Result<()> {
        let path = VirtualPath::parse(path)?;
        let mut nodes = self.nodes.write();
        if nodes.remove(&path).is_none() {
            return Err(MediaError::NotFound(path.to_string()));
        }
        nodes.retain(|candidate, _| !candidate.is_within(&path));
        if let Some(parent) = path.parent()
            && let Some(Node::Dir { children, .. }) = nodes.get_mut(&parent)
        {
            children.retain(|child| child != &path);
        }
        Ok(())
    }

    fn ensure_parent_link(
        nodes: &mut HashMap<VirtualPath, Node>,
        path: &VirtualPath,
    ) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match nodes.get(&parent) {
            Some(Node::File { .. }) => {
                return Err(MediaError::NotADirectory(parent.to_string()));
            }
            Some(Node::Dir { .. }) => {}
            None => {
                Self::ensure_parent_link(nodes, &parent)?;
                nodes.insert(
                    parent.clone(),
                    Node::Dir {
                        children: Vec::new(),
                        modified: Utc::now(),
                    },
                );
            }
        }
        if let Some(Node::Dir { children, .. }) = nodes.get_mut(&parent)
            && !children.iter().any(|child| child == path)
        {
            children.push(path.clone());
        }
        Ok(())
    }

    fn node_for(path: &VirtualPath, node: &Node) -> FsNode {
        match node {
            Node::Dir { modified, .. } => FsNode::directory(path.clone(), *modified),
            Node::File { len, modified } => FsNode::file(path.clone(), *len, *modified),
        }
    }
}

#[async_trait]
impl Filesystem for InMemoryFs {
    async fn list_directory(&self, dir: &VirtualPath) -> Result<Vec<FsNode>> {
        let nodes = self.nodes.read();
        match nodes.get(dir) {
            Some(Node::Dir { children, .. }) => {
                let mut listing: Vec<FsNode> = children
                    .iter()
                    .filter_map(|child| nodes.get(child).map(|node| Self::node_for(child, node)))
                    .collect();
                listing.sort_by(|a, b| natural_cmp(&a.name, &b.name));
                Ok(listing)
            }
            Some(Node::File { .. }) => Err(MediaError::NotADirectory(dir.to_string())),
            None => Err(MediaError::NotFound(dir.to_string())),
        }
    }

    async fn stat(&self, path: &VirtualPath) -> Result<FsNode> {
        let nodes = self.nodes.read();
        nodes
            .get(path)
            .map(|node| Self::node_for(path, node))
            .ok_or_else(|| MediaError::NotFound(path.to_string()))
    }
}
