//! Background thumbnail generation.
//!
//! [`ThumbnailPipeline::enqueue`] takes a per-target lock before queuing a
//! job, so at most one job per target is ever in flight; a second request
//! while the first is pending is coalesced into it. [`ThumbnailWorker`]s
//! pop jobs, drop stale ones, generate missing derivatives chunk by chunk,
//! publish a [`ThumbCompletionEvent`] per file and one per directory, and
//! always release the lock afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::paths::VirtualPath;

pub mod encoder;
pub mod events;
pub mod job;
pub mod lock;
pub mod queue;
pub mod worker;

pub use encoder::{EncoderSettings, StandardEncoder, ThumbnailEncoder};
pub use events::{
    CompletionScope, InProcThumbEventBus, THUMBS_CHANNEL, ThumbCompletionEvent, ThumbEventBus,
    ThumbEventPublisher, ThumbEventStream, ThumbSubscription,
};
pub use job::{LockKey, LockToken, ThumbJob, ThumbJobId, ThumbJobKind};
pub use lock::{InMemoryTargetLock, TargetLock};
pub use queue::{InMemoryJobQueue, JobQueue};
pub use worker::{
    JobOutcome, ThumbnailWorker, ThumbnailWorkerPool, WorkerStats, WorkerStatsSnapshot,
};

#[cfg(feature = "database")]
pub use events::RedisThumbEventBus;
#[cfg(feature = "database")]
pub use lock::RedisTargetLock;
#[cfg(feature = "database")]
pub use queue::RedisJobQueue;

/// Tuning knobs. None of them affect correctness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailSettings {
    pub workers: usize,
    pub chunk_size: usize,
    /// Jobs older than this at dequeue are discarded; also the lock TTL.
    pub job_ttl: Duration,
    pub poll_interval: Duration,
    pub encoder: EncoderSettings,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            chunk_size: 8,
            job_ttl: Duration::from_secs(600),
            poll_interval: Duration::from_millis(500),
            encoder: EncoderSettings::default(),
        }
    }
}

/// The queue, lock and event bus a deployment shares between processes.
#[derive(Clone)]
pub struct PipelineBackends {
    pub queue: Arc<dyn JobQueue>,
    pub lock: Arc<dyn TargetLock>,
    pub events: Arc<dyn ThumbEventBus>,
}

impl fmt::Debug for PipelineBackends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBackends").finish_non_exhaustive()
    }
}

impl PipelineBackends {
    /// Everything in this process; nothing is shared with other workers.
    pub fn in_memory() -> Self {
        Self {
            queue: Arc::new(InMemoryJobQueue::new()),
            lock: Arc::new(InMemoryTargetLock::new()),
            events: Arc::new(InProcThumbEventBus::default()),
        }
    }

    /// Queue, lock and events on one Redis. The event relay stops when
    /// `shutdown` is cancelled.
    #[cfg(feature = "database")]
    pub async fn redis(
        redis_url: &str,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client.clone()).await?;
        let events = RedisThumbEventBus::connect(&client, conn.clone(), shutdown).await?;
        tracing::info!("thumbnail pipeline using redis backends");
        Ok(Self {
            queue: Arc::new(RedisJobQueue::new(conn.clone())),
            lock: Arc::new(RedisTargetLock::new(conn)),
            events: Arc::new(events),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued { job: ThumbJobId },
    /// A job for the same target is already in flight and covers this one.
    Coalesced,
}

/// Producer side of the pipeline.
#[derive(Clone)]
pub struct ThumbnailPipeline {
    backends: PipelineBackends,
    job_ttl: Duration,
}

impl fmt::Debug for ThumbnailPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailPipeline")
            .field("job_ttl", &self.job_ttl)
            .finish_non_exhaustive()
    }
}

impl ThumbnailPipeline {
    pub fn new(backends: PipelineBackends, job_ttl: Duration) -> Self {
        Self { backends, job_ttl }
    }

    pub fn backends(&self) -> &PipelineBackends {
        &self.backends
    }

    #[instrument(skip(self), fields(%kind, %target))]
    pub async fn enqueue(&self, kind: ThumbJobKind, target: VirtualPath) -> Result<EnqueueOutcome> {
        let job = ThumbJob::new(kind, target);
        let acquired = self
            .backends
            .lock
            .try_acquire(&job.lock_key, &job.lock_token, self.job_ttl)
            .await?;
        if !acquired {
            debug!(key = %job.lock_key, "job already in flight, coalescing");
            return Ok(EnqueueOutcome::Coalesced);
        }

        if let Err(err) = self.backends.queue.push(&job).await {
            // The job never reached the queue.
            let released = self.backends.lock.release(&job.lock_key, &job.lock_token).await;
            if let Err(release_err) = released {
                warn!(key = %job.lock_key, "failed to release lock: {release_err}");
            }
            return Err(err);
        }
        debug!(job = %job.id, "thumbnail job queued");
        Ok(EnqueueOutcome::Queued { job: job.id })
    }

    pub fn subscribe(&self) -> ThumbSubscription {
        ThumbSubscription::all(self.backends.events.subscribe())
    }

    pub fn subscribe_directory(&self, dir: VirtualPath) -> ThumbSubscription {
        ThumbSubscription::for_directory(self.backends.events.subscribe(), dir)
    }

    pub fn subscribe_file(&self, path: VirtualPath) -> ThumbSubscription {
        ThumbSubscription::for_file(self.backends.events.subscribe(), path)
    }
}
