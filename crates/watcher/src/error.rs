//! Watcher error types

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the watch engine
///
/// Only [`WatchError::Walk`] on the watch root is fatal; everything else is
/// reported through a `watch-error` event while the rest of the tree keeps
/// being watched.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Core(#[from] cpx_core::Error),

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to watch {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to inspect {path}: {source}")]
    Classify {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {src} to {dst}: {source}")]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("watch backend error: {0}")]
    Backend(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("watcher has already been opened")]
    AlreadyOpened,

    #[error("watcher is closed")]
    Closed,
}

impl WatchError {
    /// Path the error is about, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Walk { path, .. }
            | Self::Install { path, .. }
            | Self::Classify { path, .. }
            | Self::Remove { path, .. } => Some(path),
            Self::Copy { src, .. } => Some(src),
            _ => None,
        }
    }
}

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;
