use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single storage tier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierError {
    #[error("not found")]
    NotFound,
    #[error("unreadable: {0}")]
    Unreadable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl From<io::Error> for TierError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => TierError::NotFound,
            io::ErrorKind::PermissionDenied => TierError::PermissionDenied(err.to_string()),
            _ => TierError::Unreadable(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for TierError {
    fn from(err: rusqlite::Error) -> Self {
        TierError::Unreadable(err.to_string())
    }
}

/// Failure of the write pipeline. Only the primary commit can produce one of these;
/// backup and secondary mirroring are best-effort.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to stage {}: {source}", path.display())]
    Stage { path: PathBuf, source: io::Error },
    #[error("commit failed for {}: {reason}", path.display())]
    CommitFailed { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),
    #[error("Tier error: {0}")]
    TierError(#[from] TierError),
    #[error("Write error: {0}")]
    WriteError(#[from] WriteError),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
