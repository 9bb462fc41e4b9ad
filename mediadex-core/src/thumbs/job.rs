use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::paths::VirtualPath;

/// Unique identifier for thumbnail jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ThumbJobId(pub Uuid);

impl Default for ThumbJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbJobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ThumbJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbJobKind {
    /// Every image and video directly inside a directory.
    Batch,
    /// One file.
    Single,
}

impl fmt::Display for ThumbJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThumbJobKind::Batch => write!(f, "batch"),
            ThumbJobKind::Single => write!(f, "single"),
        }
    }
}

/// Deterministic dedupe key for a job target.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey(String);

impl LockKey {
    pub fn for_target(kind: ThumbJobKind, target: &VirtualPath) -> Self {
        Self(format!("thumbs:lock:{kind}:{target}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of lock ownership. Only the holder's token can release a lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LockToken(pub Uuid);

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A queued unit of thumbnail work. Serialized as-is onto shared queues.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThumbJob {
    pub id: ThumbJobId,
    pub kind: ThumbJobKind,
    pub target: VirtualPath,
    pub created_at: DateTime<Utc>,
    pub lock_key: LockKey,
    pub lock_token: LockToken,
}

impl ThumbJob {
    pub fn new(kind: ThumbJobKind, target: VirtualPath) -> Self {
        Self::created_at(kind, target, Utc::now())
    }

    pub fn created_at(kind: ThumbJobKind, target: VirtualPath, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ThumbJobId::new(),
            lock_key: LockKey::for_target(kind, &target),
            lock_token: LockToken::new(),
            kind,
            target,
            created_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
    }

    /// Stale jobs are dropped at dequeue time without doing any work.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) > ttl
    }
}
