use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use super::loader::ConfigLoadError;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub media: FileMediaConfig,
    #[serde(default)]
    pub cache: FileCacheConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub thumbnails: FileThumbnailConfig,
    #[serde(default)]
    pub navigation: FileNavigationConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMediaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnails: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileThumbnailConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dimension: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileNavigationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_dot_dirs: Option<bool>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub cache_thumbnails: Option<PathBuf>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub workers: Option<usize>,
    pub chunk_size: Option<usize>,
    pub job_ttl_secs: Option<u64>,
    pub max_dimension: Option<u32>,
    pub jpeg_quality: Option<u8>,
    pub poll_interval_ms: Option<u64>,
    pub ffmpeg_path: Option<PathBuf>,
    pub navigation_exclude: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads every variable through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Ok(Self {
            config_path: var("MEDIADEX_CONFIG").map(PathBuf::from),
            media_root: var("MEDIA_ROOT").map(PathBuf::from),
            cache_thumbnails: var("THUMBNAIL_CACHE_DIR").map(PathBuf::from),
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            workers: parse_var(&var, "THUMBNAIL_WORKERS")?,
            chunk_size: parse_var(&var, "THUMBNAIL_CHUNK_SIZE")?,
            job_ttl_secs: parse_var(&var, "THUMBNAIL_JOB_TTL_SECS")?,
            max_dimension: parse_var(&var, "THUMBNAIL_MAX_DIMENSION")?,
            jpeg_quality: parse_var(&var, "THUMBNAIL_JPEG_QUALITY")?,
            poll_interval_ms: parse_var(&var, "THUMBNAIL_POLL_INTERVAL_MS")?,
            ffmpeg_path: var("FFMPEG_PATH").map(PathBuf::from),
            navigation_exclude: var("NAVIGATION_EXCLUDE").map(|raw| split_csv(&raw)),
        })
    }
}

fn parse_var<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigLoadError::InvalidEnv { name, value: raw }),
        None => Ok(None),
    }
}

pub(crate) fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
