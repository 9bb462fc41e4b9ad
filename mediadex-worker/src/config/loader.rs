use mediadex_core::{MediaError, VirtualPath};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use super::sources::{EnvConfig, FileConfig};
use super::{
    CacheConfig, Config, ConfigMetadata, DatabaseConfig, MediaConfig, NavigationConfig,
    RedisConfig, ThumbnailConfig,
};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["mediadex.toml", "config/mediadex.toml"];

/// Values given on the command line. They win over every other source.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub media_root: Option<PathBuf>,
    pub thumbnail_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.options.overrides = overrides;
        self
    }

    /// Loads `.env`, then reads the process environment and the config file.
    pub fn load(&self) -> Result<Config, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        self.load_with_env(EnvConfig::gather()?, env_file_loaded)
    }

    /// Like [`ConfigLoader::load`] with an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<Config, ConfigLoadError> {
        let (file, config_path) = self.load_file_config(&env)?;
        let mut config = compose(file.unwrap_or_default(), env, &self.options.overrides)?;
        config.metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        validate(&config)?;
        Ok(config)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // An explicitly named file has to exist; the default locations are optional.
        let path = match (&self.options.config_path, &env.config_path) {
            (Some(explicit), _) | (None, Some(explicit)) => {
                if !explicit.exists() {
                    return Err(ConfigLoadError::MissingConfig {
                        path: explicit.clone(),
                    });
                }
                explicit.clone()
            }
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(found) => found,
                None => return Ok((None, None)),
            },
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok((Some(file_config), Some(path)))
    }
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    cli: &ConfigOverrides,
) -> Result<Config, ConfigLoadError> {
    let defaults = ThumbnailConfig::default();

    let media_root = cli
        .media_root
        .clone()
        .or(env.media_root)
        .or(file.media.root)
        .ok_or(ConfigLoadError::MissingMediaRoot)?;

    let thumbnails_dir = cli
        .thumbnail_dir
        .clone()
        .or(env.cache_thumbnails)
        .or(file.cache.thumbnails)
        .unwrap_or_else(|| PathBuf::from("./cache/thumbnails"));

    let database = DatabaseConfig {
        url: cli
            .database_url
            .clone()
            .or(env.database_url)
            .or(file.database.url.filter(|url| !url.trim().is_empty())),
    };

    let redis = cli
        .redis_url
        .clone()
        .or(env.redis_url)
        .or(file.redis.map(|r| r.url).filter(|url| !url.trim().is_empty()))
        .map(|url| RedisConfig { url });

    let t = file.thumbnails;
    let thumbnails = ThumbnailConfig {
        workers: cli
            .workers
            .or(env.workers)
            .or(t.workers)
            .unwrap_or(defaults.workers),
        chunk_size: env.chunk_size.or(t.chunk_size).unwrap_or(defaults.chunk_size),
        job_ttl_secs: env
            .job_ttl_secs
            .or(t.job_ttl_secs)
            .unwrap_or(defaults.job_ttl_secs),
        max_dimension: env
            .max_dimension
            .or(t.max_dimension)
            .unwrap_or(defaults.max_dimension),
        jpeg_quality: env
            .jpeg_quality
            .or(t.jpeg_quality)
            .unwrap_or(defaults.jpeg_quality),
        poll_interval_ms: env
            .poll_interval_ms
            .or(t.poll_interval_ms)
            .unwrap_or(defaults.poll_interval_ms),
        ffmpeg_path: env
            .ffmpeg_path
            .or(t.ffmpeg_path)
            .unwrap_or(defaults.ffmpeg_path),
    };

    let exclude = env
        .navigation_exclude
        .or(file.navigation.exclude)
        .unwrap_or_default()
        .iter()
        .map(|raw| {
            VirtualPath::parse(raw).map_err(|source| ConfigLoadError::InvalidExclude {
                value: raw.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let navigation = NavigationConfig {
        exclude,
        hide_dot_dirs: file
            .navigation
            .hide_dot_dirs
            .unwrap_or(NavigationConfig::default().hide_dot_dirs),
    };

    Ok(Config {
        media: MediaConfig { root: media_root },
        cache: CacheConfig {
            thumbnails: thumbnails_dir,
        },
        database,
        redis,
        thumbnails,
        navigation,
        metadata: ConfigMetadata::default(),
    })
}

fn validate(config: &Config) -> Result<(), ConfigLoadError> {
    let t = &config.thumbnails;
    let checks: [(&'static str, bool, &'static str); 6] = [
        ("thumbnails.workers", t.workers >= 1, "must be at least 1"),
        ("thumbnails.chunk_size", t.chunk_size >= 1, "must be at least 1"),
        ("thumbnails.job_ttl_secs", t.job_ttl_secs >= 1, "must be at least 1"),
        (
            "thumbnails.jpeg_quality",
            (1..=100).contains(&t.jpeg_quality),
            "must be within 1..=100",
        ),
        ("thumbnails.max_dimension", t.max_dimension >= 1, "must be at least 1"),
        ("thumbnails.poll_interval_ms", t.poll_interval_ms >= 1, "must be at least 1"),
    ];
    match checks.into_iter().find(|(_, ok, _)| !ok) {
        Some((key, _, reason)) => Err(ConfigLoadError::Invalid { key, reason }),
        None => Ok(()),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("media root is not set (media.root, MEDIA_ROOT or --media-root)")]
    MissingMediaRoot,
    #[error("{name} has an invalid value {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid navigation exclude {value:?}")]
    InvalidExclude {
        value: String,
        #[source]
        source: MediaError,
    },
    #[error("{key} {reason}")]
    Invalid {
        key: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> EnvConfig {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        EnvConfig::from_lookup(|name| map.get(name).map(|v| v.to_string())).unwrap()
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const FILE: &str = r#"
[media]
root = "/from/file"

[cache]
thumbnails = "/file/thumbs"

[thumbnails]
workers = 2
chunk_size = 16
jpeg_quality = 90

[navigation]
exclude = ["/admin"]
hide_dot_dirs = false
"#;

    #[test]
    fn defaults_apply_when_only_media_root_is_set() {
        let config = ConfigLoader::new()
            .load_with_env(env(&[("MEDIA_ROOT", "/srv/media")]), false)
            .unwrap();

        assert_eq!(config.media.root, PathBuf::from("/srv/media"));
        assert_eq!(config.cache.thumbnails, PathBuf::from("./cache/thumbnails"));
        assert_eq!(config.thumbnails, ThumbnailConfig::default());
        assert!(config.database.url.is_none());
        assert!(config.redis.is_none());
        assert_eq!(config.navigation, NavigationConfig::default());
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let file = config_file(FILE);
        let overrides = ConfigOverrides {
            workers: Some(7),
            ..ConfigOverrides::default()
        };
        let config = ConfigLoader::new()
            .with_config_path(file.path())
            .with_overrides(overrides)
            .load_with_env(
                env(&[
                    ("MEDIA_ROOT", "/from/env"),
                    ("THUMBNAIL_WORKERS", "3"),
                    ("THUMBNAIL_CHUNK_SIZE", "4"),
                ]),
                false,
            )
            .unwrap();

        assert_eq!(config.media.root, PathBuf::from("/from/env"));
        assert_eq!(config.cache.thumbnails, PathBuf::from("/file/thumbs"));
        assert_eq!(config.thumbnails.workers, 7);
        assert_eq!(config.thumbnails.chunk_size, 4);
        assert_eq!(config.thumbnails.jpeg_quality, 90);
        assert_eq!(config.navigation.exclude, vec![VirtualPath::parse("/admin").unwrap()]);
        assert!(!config.navigation.hide_dot_dirs);
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConfigLoader::new()
            .with_config_path("/definitely/not/here.toml")
            .load_with_env(env(&[("MEDIA_ROOT", "/m")]), false)
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));

        let err = ConfigLoader::new()
            .load_with_env(
                env(&[("MEDIA_ROOT", "/m"), ("MEDIADEX_CONFIG", "/also/missing.toml")]),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn media_root_is_required() {
        let err = ConfigLoader::new()
            .load_with_env(EnvConfig::default(), false)
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingMediaRoot));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (name, value, key) in [
            ("THUMBNAIL_CHUNK_SIZE", "0", "thumbnails.chunk_size"),
            ("THUMBNAIL_WORKERS", "0", "thumbnails.workers"),
            ("THUMBNAIL_JOB_TTL_SECS", "0", "thumbnails.job_ttl_secs"),
            ("THUMBNAIL_JPEG_QUALITY", "101", "thumbnails.jpeg_quality"),
            ("THUMBNAIL_POLL_INTERVAL_MS", "0", "thumbnails.poll_interval_ms"),
        ] {
            let err = ConfigLoader::new()
                .load_with_env(env(&[("MEDIA_ROOT", "/m"), (name, value)]), false)
                .unwrap_err();
            match err {
                ConfigLoadError::Invalid { key: got, .. } => assert_eq!(got, key),
                other => panic!("{name}={value}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn bad_exclude_prefix_is_rejected() {
        let err = ConfigLoader::new()
            .load_with_env(
                env(&[("MEDIA_ROOT", "/m"), ("NAVIGATION_EXCLUDE", "/ok,../escape")]),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::InvalidExclude { .. }));
    }

    #[test]
    fn derived_settings_follow_config() {
        let config = ConfigLoader::new()
            .load_with_env(
                env(&[
                    ("MEDIA_ROOT", "/m"),
                    ("THUMBNAIL_JOB_TTL_SECS", "30"),
                    ("THUMBNAIL_MAX_DIMENSION", "256"),
                    ("NAVIGATION_EXCLUDE", "/private"),
                ]),
                false,
            )
            .unwrap();

        let settings = config.thumbnail_settings();
        assert_eq!(settings.job_ttl.as_secs(), 30);
        assert_eq!(settings.encoder.max_dimension, 256);
        use mediadex_core::navigation::PathExclusions;
        let exclusions = config.exclusions();
        assert!(exclusions.is_blocked(&VirtualPath::parse("/private/x").unwrap()));
        assert!(exclusions.is_blocked(&VirtualPath::parse("/a/.hidden").unwrap()));
    }
}
