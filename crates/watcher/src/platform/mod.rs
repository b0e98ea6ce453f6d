//! Raw OS watch handles
//!
//! Provides a unified interface ([`WatchBackend`]) over one non-recursive
//! registration per live directory. Backends never interpret what they see:
//! they forward [`RawNotification`]s into the watcher's event loop, where the
//! classifier decides what happened.

pub mod manual;
pub mod native;

use crate::Result;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub use manual::ManualBackend;
pub use native::NotifyBackend;

/// Unclassified signal from a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawNotification {
    /// Something happened at this absolute path (a child of a watched
    /// directory, or a watched directory itself)
    Changed(PathBuf),

    /// Events may have been dropped; every watched directory must be re-listed
    Rescan,

    /// The backend reported an error
    Error {
        path: Option<PathBuf>,
        message: String,
    },
}

/// Sending half used by backends (and tests) to feed the event loop
pub type RawSender = mpsc::UnboundedSender<RawNotification>;

/// Receiving half owned by the event loop
pub type RawReceiver = mpsc::UnboundedReceiver<RawNotification>;

/// Platform-agnostic per-directory watch registrations
pub trait WatchBackend: Send {
    /// Start watching one directory (non-recursively)
    fn watch(&mut self, dir: &Path) -> Result<()>;

    /// Stop watching one directory
    ///
    /// Unwatching a directory the OS already dropped is not an error.
    fn unwatch(&mut self, dir: &Path);

    /// Directories currently registered, sorted
    fn watched(&self) -> Vec<PathBuf>;
}

/// Create the native backend for the current platform
pub fn create_backend(tx: RawSender) -> Result<Box<dyn WatchBackend>> {
    Ok(Box::new(NotifyBackend::new(tx)?))
}
