//! Worker configuration: CLI flags over environment over `mediadex.toml`
//! over built-in defaults.

pub mod loader;
pub mod sources;

use mediadex_core::navigation::PrefixExclusions;
use mediadex_core::thumbs::{EncoderSettings, ThumbnailSettings};
use mediadex_core::{StorageLayout, VirtualPath};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

pub use loader::{ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigOverrides};

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub media: MediaConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub thumbnails: ThumbnailConfig,
    pub navigation: NavigationConfig,
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    pub thumbnails: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseConfig {
    /// `None` keeps metadata in memory for the life of the process.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThumbnailConfig {
    pub workers: usize,
    pub chunk_size: usize,
    pub job_ttl_secs: u64,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub poll_interval_ms: u64,
    pub ffmpeg_path: PathBuf,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        let settings = ThumbnailSettings::default();
        Self {
            workers: settings.workers,
            chunk_size: settings.chunk_size,
            job_ttl_secs: settings.job_ttl.as_secs(),
            max_dimension: settings.encoder.max_dimension,
            jpeg_quality: settings.encoder.jpeg_quality,
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
            ffmpeg_path: settings.encoder.ffmpeg_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationConfig {
    pub exclude: Vec<VirtualPath>,
    pub hide_dot_dirs: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            hide_dot_dirs: true,
        }
    }
}

/// Where the values came from, for startup logging.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout::new(&self.media.root, &self.cache.thumbnails)
    }

    pub fn thumbnail_settings(&self) -> ThumbnailSettings {
        let t = &self.thumbnails;
        ThumbnailSettings {
            workers: t.workers,
            chunk_size: t.chunk_size,
            job_ttl: Duration::from_secs(t.job_ttl_secs),
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            encoder: EncoderSettings {
                max_dimension: t.max_dimension,
                jpeg_quality: t.jpeg_quality,
                ffmpeg_path: t.ffmpeg_path.clone(),
                ..EncoderSettings::default()
            },
        }
    }

    pub fn exclusions(&self) -> PrefixExclusions {
        PrefixExclusions::new(
            self.navigation.exclude.iter().cloned(),
            self.navigation.hide_dot_dirs,
        )
    }
}
