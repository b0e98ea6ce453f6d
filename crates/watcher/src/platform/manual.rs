//! Backend that records registrations but never reports on its own
//!
//! Notifications are pushed by the embedder through the watcher's raw sender.
//! Useful on filesystems without change notification (network mounts) when
//! paired with an external poller, and for deterministic tests.

use super::WatchBackend;
use crate::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Registration-only backend
#[derive(Debug, Default)]
pub struct ManualBackend {
    watched: BTreeSet<PathBuf>,
}

impl ManualBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchBackend for ManualBackend {
    fn watch(&mut self, dir: &Path) -> Result<()> {
        self.watched.insert(dir.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, dir: &Path) {
        self.watched.remove(dir);
    }

    fn watched(&self) -> Vec<PathBuf> {
        self.watched.iter().cloned().collect()
    }
}
