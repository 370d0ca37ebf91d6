//! Errors surfaced by the change engine's public API

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("watched root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("failed to watch {root}: {source}")]
    Notify {
        root: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to prepare backup directory: {0:#}")]
    Backup(anyhow::Error),

    #[error("change engine is not running")]
    NotRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
