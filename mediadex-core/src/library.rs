use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::catalog::MetadataStore;
use crate::error::Result;
use crate::fs::Filesystem;
use crate::navigation::{AdjacentFolderResolver, Direction, PathExclusions};
use crate::paths::{StorageLayout, VirtualPath};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::thumbs::{
    EnqueueOutcome, ThumbSubscription, ThumbJobKind, ThumbnailEncoder, ThumbnailPipeline,
    ThumbnailSettings, ThumbnailWorker,
};

/// Result of [`MediaLibrary::open_directory`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryOpened {
    pub report: ReconcileReport,
    /// `None` when the batch could not be queued; the listing is still valid.
    pub thumbnails: Option<EnqueueOutcome>,
}

/// The operations page and API handlers call.
pub struct MediaLibrary {
    layout: StorageLayout,
    fs: Arc<dyn Filesystem>,
    store: Arc<dyn MetadataStore>,
    reconciler: Reconciler,
    resolver: AdjacentFolderResolver,
    pipeline: ThumbnailPipeline,
}

impl fmt::Debug for MediaLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaLibrary")
            .field("layout", &self.layout)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl MediaLibrary {
    pub fn new(
        layout: StorageLayout,
        fs: Arc<dyn Filesystem>,
        store: Arc<dyn MetadataStore>,
        exclusions: Arc<dyn PathExclusions>,
        pipeline: ThumbnailPipeline,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&fs), Arc::clone(&store)),
            resolver: AdjacentFolderResolver::new(Arc::clone(&fs), exclusions),
            layout,
            fs,
            store,
            pipeline,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &ThumbnailPipeline {
        &self.pipeline
    }

    pub async fn reconcile(&self, dir: &VirtualPath) -> Result<ReconcileReport> {
        self.reconciler.reconcile(dir).await
    }

    pub async fn find_adjacent(
        &self,
        current: &VirtualPath,
        direction: Direction,
    ) -> Result<Option<VirtualPath>> {
        self.resolver.find_adjacent(current, direction).await
    }

    pub async fn enqueue(&self, kind: ThumbJobKind, target: VirtualPath) -> Result<EnqueueOutcome> {
        self.pipeline.enqueue(kind, target).await
    }

    pub fn subscribe(&self) -> ThumbSubscription {
        self.pipeline.subscribe()
    }

    pub fn subscribe_directory(&self, dir: VirtualPath) -> ThumbSubscription {
        self.pipeline.subscribe_directory(dir)
    }

    /// Reconciles `dir` and queues its thumbnail batch. Only the reconcile
    /// can fail the call.
    #[instrument(skip(self), fields(dir = %dir))]
    pub async fn open_directory(&self, dir: &VirtualPath) -> Result<DirectoryOpened> {
        let report = self.reconcile(dir).await?;
        let thumbnails = match self.enqueue(ThumbJobKind::Batch, dir.clone()).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!("could not queue thumbnail batch: {err}");
                None
            }
        };
        Ok(DirectoryOpened { report, thumbnails })
    }

    /// Moves stored records after a rename or move on disk.
    pub async fn relocate(&self, from: &VirtualPath, to: &VirtualPath) -> Result<u64> {
        self.store.rewrite_prefix(from, to).await
    }

    /// The derivative for `path`, if one has been generated.
    pub async fn thumbnail_for(&self, path: &VirtualPath) -> Result<Option<PathBuf>> {
        let candidate = self.layout.thumbnail_path(path);
        if tokio::fs::try_exists(&candidate).await? {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }

    /// A worker over this library's tree, storage layout and backends.
    pub fn worker(
        &self,
        encoder: Arc<dyn ThumbnailEncoder>,
        settings: &ThumbnailSettings,
    ) -> ThumbnailWorker {
        ThumbnailWorker::new(
            Arc::clone(&self.fs),
            self.layout.clone(),
            encoder,
            self.pipeline.backends().clone(),
            settings,
        )
    }
}
