use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid virtual path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[cfg(feature = "database")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Thumbnail encode failed for {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// True for the "vanished between listing and stat" condition callers are
    /// expected to treat as an empty observation.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MediaError::NotFound(_))
    }

    pub(crate) fn encode(path: impl Into<String>, reason: impl ToString) -> Self {
        MediaError::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Maps `io::ErrorKind::NotFound` onto [`MediaError::NotFound`] so the
    /// condition stays distinguishable from other IO failures.
    pub(crate) fn from_io(err: std::io::Error, subject: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            MediaError::NotFound(subject.to_string())
        } else {
            MediaError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
