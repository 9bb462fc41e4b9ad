use anyhow::Context;
use mediadex_core::catalog::{InMemoryMetadataStore, MetadataStore, PostgresMetadataStore};
use mediadex_core::fs::LocalFilesystem;
use mediadex_core::library::MediaLibrary;
use mediadex_core::thumbs::{
    PipelineBackends, StandardEncoder, ThumbnailPipeline, ThumbnailSettings, ThumbnailWorker,
};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;

const DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Everything one process needs: the library facade plus the settings its
/// workers run with.
pub struct Runtime {
    config: Config,
    settings: ThumbnailSettings,
    library: MediaLibrary,
    shutdown: CancellationToken,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("library", &self.library)
            .field("shared_backends", &self.is_shared())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Connects to PostgreSQL and Redis when configured, falling back to
    /// in-process state otherwise. Migrations run on connect.
    pub async fn build(config: Config, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let settings = config.thumbnail_settings();
        let layout = config.storage_layout();

        let store: Arc<dyn MetadataStore> = match connect_database(&config).await? {
            Some(pg) => Arc::new(pg),
            None => {
                warn!("no database configured; metadata lives in memory for this process");
                Arc::new(InMemoryMetadataStore::new())
            }
        };

        let backends = match &config.redis {
            Some(redis) => PipelineBackends::redis(&redis.url, shutdown.clone())
                .await
                .context("failed to connect to Redis")?,
            None => PipelineBackends::in_memory(),
        };

        let library = MediaLibrary::new(
            layout.clone(),
            Arc::new(LocalFilesystem::new(layout.media_root())),
            store,
            Arc::new(config.exclusions()),
            ThumbnailPipeline::new(backends, settings.job_ttl),
        );

        info!(
            media_root = %layout.media_root().display(),
            thumbnails = %layout.thumbnail_root().display(),
            shared = config.redis.is_some(),
            "runtime ready"
        );

        Ok(Self {
            config,
            settings,
            library,
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn library(&self) -> &MediaLibrary {
        &self.library
    }

    pub fn settings(&self) -> &ThumbnailSettings {
        &self.settings
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// True when the queue and events are visible to other processes.
    pub fn is_shared(&self) -> bool {
        self.config.redis.is_some()
    }

    pub fn worker(&self) -> ThumbnailWorker {
        let encoder = Arc::new(StandardEncoder::new(self.settings.encoder.clone()));
        self.library.worker(encoder, &self.settings)
    }
}

/// Connects and migrates when a database URL is configured.
pub async fn connect_database(config: &Config) -> anyhow::Result<Option<PostgresMetadataStore>> {
    let Some(url) = config.database.url.as_deref() else {
        return Ok(None);
    };
    let store = PostgresMetadataStore::connect(url, DATABASE_MAX_CONNECTIONS)
        .await
        .context("failed to connect to PostgreSQL")?;
    store.migrate().await.context("database migration failed")?;
    Ok(Some(store))
}
