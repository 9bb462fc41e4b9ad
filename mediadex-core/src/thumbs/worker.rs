use chrono::{TimeDelta, Utc};
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::encoder::ThumbnailEncoder;
use super::events::ThumbCompletionEvent;
use super::job::{ThumbJob, ThumbJobKind};
use super::{PipelineBackends, ThumbnailSettings};
use crate::classify::MediaKind;
use crate::error::{MediaError, Result};
use crate::fs::{Filesystem, FsNode};
use crate::natural::sort_natural_by_key;
use crate::paths::{StorageLayout, VirtualPath};

/// How one dequeued job ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        generated: usize,
        skipped: usize,
        failed: usize,
    },
    /// Older than the job TTL at dequeue; nothing was done.
    Expired,
    Failed {
        reason: String,
    },
}

/// Counters shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    expired: AtomicU64,
    failed: AtomicU64,
    generated: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub expired: u64,
    pub failed: u64,
    pub generated: u64,
    pub skipped: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &JobOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            JobOutcome::Completed {
                generated, skipped, ..
            } => {
                self.generated.fetch_add(*generated as u64, Ordering::Relaxed);
                self.skipped.fetch_add(*skipped as u64, Ordering::Relaxed);
            }
            JobOutcome::Expired => {
                self.expired.fetch_add(1, Ordering::Relaxed);
            }
            JobOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    generated: usize,
    skipped: usize,
    failed: usize,
}

enum Generation {
    Generated,
    AlreadyPresent,
}

/// Consumes thumbnail jobs one at a time.
#[derive(Clone)]
pub struct ThumbnailWorker {
    id: String,
    fs: Arc<dyn Filesystem>,
    layout: StorageLayout,
    encoder: Arc<dyn ThumbnailEncoder>,
    backends: PipelineBackends,
    chunk_size: usize,
    job_ttl: Duration,
    stats: Arc<WorkerStats>,
}

impl fmt::Debug for ThumbnailWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailWorker")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("chunk_size", &self.chunk_size)
            .field("job_ttl", &self.job_ttl)
            .finish_non_exhaustive()
    }
}

impl ThumbnailWorker {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        layout: StorageLayout,
        encoder: Arc<dyn ThumbnailEncoder>,
        backends: PipelineBackends,
        settings: &ThumbnailSettings,
    ) -> Self {
        Self {
            id: format!("thumbs-{}", std::process::id()),
            fs,
            layout,
            encoder,
            backends,
            chunk_size: settings.chunk_size.max(1),
            job_ttl: settings.job_ttl,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Dequeues and handles at most one job. `None` when the queue is empty.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        match self.backends.queue.pop().await? {
            Some(job) => Ok(Some(self.handle(job).await)),
            None => Ok(None),
        }
    }

    /// Handles jobs until the queue is empty.
    pub async fn drain(&self) -> Result<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    #[instrument(
        skip(self, job),
        fields(worker = %self.id, job = %job.id, kind = %job.kind, target = %job.target)
    )]
    pub async fn handle(&self, job: ThumbJob) -> JobOutcome {
        let ttl = TimeDelta::from_std(self.job_ttl).unwrap_or(TimeDelta::MAX);
        let outcome = if job.is_expired(Utc::now(), ttl) {
            debug!(age_secs = job.age(Utc::now()).num_seconds(), "discarding stale job");
            JobOutcome::Expired
        } else {
            match AssertUnwindSafe(self.process(&job)).catch_unwind().await {
                Ok(Ok(tally)) => JobOutcome::Completed {
                    generated: tally.generated,
                    skipped: tally.skipped,
                    failed: tally.failed,
                },
                Ok(Err(err)) => {
                    warn!("thumbnail job failed: {err}");
                    JobOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
                Err(_) => {
                    error!("thumbnail job panicked");
                    JobOutcome::Failed {
                        reason: "job panicked".to_string(),
                    }
                }
            }
        };

        match self.backends.lock.release(&job.lock_key, &job.lock_token).await {
            Ok(true) => {}
            Ok(false) => debug!(key = %job.lock_key, "lock no longer ours at release"),
            Err(err) => warn!(key = %job.lock_key, "failed to release lock: {err}"),
        }

        self.stats.record(&outcome);
        if let JobOutcome::Completed {
            generated,
            skipped,
            failed,
        } = &outcome
        {
            info!(generated, skipped, failed, "thumbnail job finished");
        }
        outcome
    }

    async fn process(&self, job: &ThumbJob) -> Result<Tally> {
        match job.kind {
            ThumbJobKind::Batch => self.process_batch(&job.target).await,
            ThumbJobKind::Single => self.process_single(&job.target).await,
        }
    }

    async fn process_batch(&self, dir: &VirtualPath) -> Result<Tally> {
        let listing = match self.fs.list_directory(dir).await {
            Ok(listing) => listing,
            Err(err) if err.is_not_found() => {
                debug!("batch directory is gone");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let mut files: Vec<FsNode> = listing
            .into_iter()
            .filter(|node| !node.is_directory() && node.kind.is_thumbnailable())
            .collect();
        sort_natural_by_key(&mut files, |node| node.name.as_str());

        let mut tally = Tally::default();
        for chunk in files.chunks(self.chunk_size) {
            let results = join_all(chunk.iter().map(|node| self.generate(node))).await;
            for (node, result) in chunk.iter().zip(results) {
                match result {
                    Ok(Generation::Generated) => tally.generated += 1,
                    Ok(Generation::AlreadyPresent) => tally.skipped += 1,
                    Err(err) => {
                        tally.failed += 1;
                        warn!(path = %node.path, "thumbnail generation failed: {err}");
                        continue;
                    }
                }
                self.publish(ThumbCompletionEvent::file(node.path.clone())).await;
            }
        }

        self.publish(ThumbCompletionEvent::directory(dir.clone())).await;
        Ok(tally)
    }

    async fn process_single(&self, path: &VirtualPath) -> Result<Tally> {
        let node = self.fs.stat(path).await?;
        if node.is_directory() || !node.kind.is_thumbnailable() {
            debug!(kind = %node.kind, "nothing to generate for this file");
            return Ok(Tally::default());
        }

        let mut tally = Tally::default();
        match self.generate(&node).await? {
            Generation::Generated => tally.generated += 1,
            Generation::AlreadyPresent => tally.skipped += 1,
        }
        self.publish(ThumbCompletionEvent::file(node.path)).await;
        Ok(tally)
    }

    /// Existing derivatives are never regenerated.
    async fn generate(&self, node: &FsNode) -> Result<Generation> {
        let dst = self.layout.thumbnail_path(&node.path);
        if tokio::fs::try_exists(&dst).await? {
            return Ok(Generation::AlreadyPresent);
        }

        let src = self.layout.original_path(&node.path);
        match node.kind {
            MediaKind::Image => self.encoder.encode_image(&src, &dst).await?,
            MediaKind::Video => self.encoder.extract_video_frame(&src, &dst).await?,
            other => {
                return Err(MediaError::encode(
                    node.path.to_string(),
                    format!("{other} files have no thumbnail"),
                ));
            }
        }
        Ok(Generation::Generated)
    }

    async fn publish(&self, event: ThumbCompletionEvent) {
        if let Err(err) = self.backends.events.publish(event.clone()).await {
            warn!(%event, "failed to publish completion event: {err}");
        }
    }
}

/// A fixed number of workers sharing one queue and one shutdown token.
pub struct ThumbnailWorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl fmt::Debug for ThumbnailWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailWorkerPool")
            .field("workers", &self.handles.len())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl ThumbnailWorkerPool {
    /// Starts `count` copies of `worker`. They stop when `shutdown` is
    /// cancelled, finishing the job in hand first.
    pub fn spawn(
        worker: ThumbnailWorker,
        count: usize,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let stats = worker.stats();
        let base_id = worker.id().to_string();
        let handles = (0..count.max(1))
            .map(|i| {
                let worker = worker.clone().with_id(format!("{base_id}-w{i}"));
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker_loop(worker, poll_interval, shutdown).await })
            })
            .collect();

        Self {
            shutdown,
            handles,
            stats,
        }
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn shutdown(self) -> WorkerStatsSnapshot {
        info!(workers = self.handles.len(), "shutting down thumbnail workers");
        self.shutdown.cancel();
        for handle in self.handles {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("thumbnail worker task failed: {e:?}"),
                Err(_) => warn!("thumbnail worker timed out during shutdown"),
            }
        }
        self.stats.snapshot()
    }
}

async fn worker_loop(
    worker: ThumbnailWorker,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    debug!(worker = %worker.id(), "thumbnail worker started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match worker.run_once().await {
            Ok(Some(_)) => continue,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = worker.backends.queue.wait_for_work(poll_interval) => {}
                }
            }
            Err(err) => {
                warn!(worker = %worker.id(), "dequeue failed: {err}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!(worker = %worker.id(), "thumbnail worker stopped");
}
