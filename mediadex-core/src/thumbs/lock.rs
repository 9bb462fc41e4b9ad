use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::job::{LockKey, LockToken};
use crate::error::Result;

/// Shared "set if absent, with expiry" store backing per-target dedupe.
///
/// Implementations must be atomic across every process sharing the store.
/// A held lock disappears on its own once `ttl` elapses.
#[async_trait]
pub trait TargetLock: Send + Sync {
    /// `false` when another holder currently owns `key`.
    async fn try_acquire(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only while it is still held with `token`.
    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool>;

    async fn is_held(&self, key: &LockKey) -> Result<bool>;
}

/// Process-local lock table.
#[derive(Default)]
pub struct InMemoryTargetLock {
    held: Mutex<HashMap<LockKey, (LockToken, Instant)>>,
}

impl fmt::Debug for InMemoryTargetLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTargetLock")
            .field("held", &self.held.lock().len())
            .finish()
    }
}

impl InMemoryTargetLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TargetLock for InMemoryTargetLock {
    async fn try_acquire(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut held = self.held.lock();
        if let Some((_, expires_at)) = held.get(key)
            && *expires_at > now
        {
            return Ok(false);
        }
        held.insert(key.clone(), (*token, now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool> {
        let mut held = self.held.lock();
        match held.get(key) {
            Some((owner, _)) if owner == token => {
                held.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_held(&self, key: &LockKey) -> Result<bool> {
        let held = self.held.lock();
        Ok(held
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now()))
    }
}

#[cfg(feature = "database")]
pub use redis_lock::RedisTargetLock;

#[cfg(feature = "database")]
mod redis_lock {
    use super::*;
    use redis::Script;
    use redis::aio::ConnectionManager;
    use tracing::debug;

    fn compare_and_delete() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            "#,
        )
    }

    /// `SET NX PX` lock shared by every worker process on the same Redis.
    #[derive(Clone)]
    pub struct RedisTargetLock {
        conn: ConnectionManager,
    }

    impl fmt::Debug for RedisTargetLock {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RedisTargetLock")
                .field("connection", &"ConnectionManager")
                .finish()
        }
    }

    impl RedisTargetLock {
        pub fn new(conn: ConnectionManager) -> Self {
            Self { conn }
        }
    }

    #[async_trait]
    impl TargetLock for RedisTargetLock {
        async fn try_acquire(
            &self,
            key: &LockKey,
            token: &LockToken,
            ttl: Duration,
        ) -> Result<bool> {
            let mut conn = self.conn.clone();
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            let reply: Option<String> = redis::cmd("SET")
                .arg(key.as_str())
                .arg(token.to_string())
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        }

        async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool> {
            let mut conn = self.conn.clone();
            let removed: i64 = compare_and_delete()
                .key(key.as_str())
                .arg(token.to_string())
                .invoke_async(&mut conn)
                .await?;
            if removed == 0 {
                debug!(%key, "lock already expired or taken over");
            }
            Ok(removed > 0)
        }

        async fn is_held(&self, key: &LockKey) -> Result<bool> {
            let mut conn = self.conn.clone();
            let exists: bool = redis::cmd("EXISTS")
                .arg(key.as_str())
                .query_async(&mut conn)
                .await?;
            Ok(exists)
        }
    }
}
