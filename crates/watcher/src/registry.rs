//! Watch registry: directory → snapshot, plus the backend registration

use crate::platform::WatchBackend;
use crate::walk::DirectorySnapshot;
use crate::{Result, WatchError};
use ahash::AHashMap;
use cpx_core::Normalizer;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Backend slot shared with the watcher handle so `close()` can release every
/// OS registration at once, even while the event loop is busy
pub type SharedBackend = Arc<Mutex<Option<Box<dyn WatchBackend>>>>;

/// Live directories and their last-known snapshots
pub struct WatchRegistry {
    dirs: AHashMap<PathBuf, DirectorySnapshot>,
    backend: SharedBackend,
    normalizer: Normalizer,
}

impl WatchRegistry {
    /// Create an empty registry over a backend
    pub fn new(backend: SharedBackend, normalizer: Normalizer) -> Self {
        Self {
            dirs: AHashMap::new(),
            backend,
            normalizer,
        }
    }

    /// Register directories and their snapshots
    ///
    /// Backend watches are installed on the blocking pool, since a native
    /// backend waits on its own thread for every registration. A directory the
    /// backend refuses stays unregistered and its error is returned; once
    /// `close()` has released the backend every directory fails that way.
    pub async fn install_all(&mut self, dirs: Vec<(PathBuf, DirectorySnapshot)>) -> Vec<WatchError> {
        if dirs.is_empty() {
            return Vec::new();
        }

        let backend = self.backend.clone();
        let targets: Vec<PathBuf> = dirs
            .iter()
            .map(|(dir, _)| self.normalizer.absolute(dir))
            .collect();

        let installed = tokio::task::spawn_blocking(move || {
            let mut guard = backend.lock();
            targets
                .iter()
                .map(|target| match guard.as_mut() {
                    Some(backend) => backend.watch(target),
                    None => Err(WatchError::Closed),
                })
                .collect::<Vec<Result<()>>>()
        })
        .await;

        let results = match installed {
            Ok(results) => results,
            Err(e) => return vec![WatchError::Task(e)],
        };

        let mut errors = Vec::new();
        for ((dir, snapshot), result) in dirs.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    debug!("Watching {} ({} entries)", dir.display(), snapshot.len());
                    self.dirs.insert(dir, snapshot);
                }
                Err(e) => errors.push(e),
            }
        }

        errors
    }

    /// Unregister a directory, returning its last snapshot
    pub fn uninstall(&mut self, dir: &Path) -> Option<DirectorySnapshot> {
        let snapshot = self.dirs.remove(dir)?;

        if let Some(backend) = self.backend.lock().as_mut() {
            backend.unwatch(&self.normalizer.absolute(dir));
        }

        debug!("Stopped watching {}", dir.display());
        Some(snapshot)
    }

    /// Whether a directory is registered
    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.contains_key(dir)
    }

    /// Snapshot of a registered directory
    pub fn snapshot(&self, dir: &Path) -> Option<&DirectorySnapshot> {
        self.dirs.get(dir)
    }

    /// Mutable snapshot of a registered directory
    pub fn snapshot_mut(&mut self, dir: &Path) -> Option<&mut DirectorySnapshot> {
        self.dirs.get_mut(dir)
    }

    /// Registered directories, sorted
    pub fn dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<_> = self.dirs.keys().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Number of registered directories
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Forget every directory (the backend is released separately)
    pub fn clear(&mut self) {
        self.dirs.clear();
    }
}
