use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;

use super::job::ThumbJob;
use crate::error::Result;

/// FIFO of pending jobs. Each pushed job is handed to exactly one `pop`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: &ThumbJob) -> Result<()>;

    async fn pop(&self) -> Result<Option<ThumbJob>>;

    async fn len(&self) -> Result<usize>;

    /// Parks an idle worker for at most `max_wait`. Backends that can signal
    /// new work return early.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}

#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<ThumbJob>>,
    notify: Notify,
}

impl fmt::Debug for InMemoryJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryJobQueue")
            .field("pending", &self.jobs.lock().len())
            .finish()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, job: &ThumbJob) -> Result<()> {
        self.jobs.lock().push_back(job.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> Result<Option<ThumbJob>> {
        Ok(self.jobs.lock().pop_front())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.jobs.lock().len())
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}

#[cfg(feature = "database")]
pub use redis_queue::RedisJobQueue;

#[cfg(feature = "database")]
mod redis_queue {
    use super::*;
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;

    pub const DEFAULT_QUEUE_KEY: &str = "mediadex:thumbs:jobs";

    /// `LPUSH`/`RPOP` list shared by every worker process.
    ///
    /// Polls rather than blocking so the multiplexed connection stays usable
    /// for lock and publish traffic.
    #[derive(Clone)]
    pub struct RedisJobQueue {
        conn: ConnectionManager,
        key: String,
    }

    impl fmt::Debug for RedisJobQueue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RedisJobQueue")
                .field("key", &self.key)
                .finish()
        }
    }

    impl RedisJobQueue {
        pub fn new(conn: ConnectionManager) -> Self {
            Self::with_key(conn, DEFAULT_QUEUE_KEY)
        }

        pub fn with_key(conn: ConnectionManager, key: impl Into<String>) -> Self {
            Self {
                conn,
                key: key.into(),
            }
        }
    }

    #[async_trait]
    impl JobQueue for RedisJobQueue {
        async fn push(&self, job: &ThumbJob) -> Result<()> {
            let payload = serde_json::to_string(job)?;
            let mut conn = self.conn.clone();
            let _: i64 = conn.lpush(&self.key, payload).await?;
            Ok(())
        }

        async fn pop(&self) -> Result<Option<ThumbJob>> {
            let mut conn = self.conn.clone();
            let payload: Option<String> = redis::cmd("RPOP")
                .arg(&self.key)
                .query_async(&mut conn)
                .await?;
            match payload {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        }

        async fn len(&self) -> Result<usize> {
            let mut conn = self.conn.clone();
            let len: usize = conn.llen(&self.key).await?;
            Ok(len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::VirtualPath;
    use crate::thumbs::job::ThumbJobKind;

    #[tokio::test]
    async fn jobs_come_out_in_push_order() {
        let queue = InMemoryJobQueue::new();
        let a = ThumbJob::new(ThumbJobKind::Batch, VirtualPath::parse("/A").unwrap());
        let b = ThumbJob::new(ThumbJobKind::Batch, VirtualPath::parse("/B").unwrap());
        queue.push(&a).await.unwrap();
        queue.push(&b).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(queue.pop().await.unwrap().unwrap().id, a.id);
        assert_eq!(queue.pop().await.unwrap().unwrap().id, b.id);
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn push_wakes_an_idle_waiter() {
        let queue = std::sync::Arc::new(InMemoryJobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                queue.wait_for_work(Duration::from_secs(30)).await;
                started.elapsed()
            })
        };
        tokio::task::yield_now().await;
        queue
            .push(&ThumbJob::new(ThumbJobKind::Single, VirtualPath::parse("/a.jpg").unwrap()))
            .await
            .unwrap();

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(30));
    }
}
