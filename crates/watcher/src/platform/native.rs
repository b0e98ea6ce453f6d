//! Native backend built on notify (inotify, FSEvents, ReadDirectoryChangesW)

use super::{RawNotification, RawSender, WatchBackend};
use crate::{Result, WatchError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// One notify watcher with a non-recursive registration per directory
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    watched: BTreeSet<PathBuf>,
}

impl NotifyBackend {
    /// Create a backend forwarding into `tx`
    pub fn new(tx: RawSender) -> Result<Self> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            for raw in translate(res) {
                // Receiver gone means the watcher was closed
                if tx.send(raw).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| WatchError::Backend(e.to_string()))?;

        Ok(Self {
            watcher,
            watched: BTreeSet::new(),
        })
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&mut self, dir: &Path) -> Result<()> {
        if self.watched.contains(dir) {
            return Ok(());
        }

        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Install {
                path: dir.to_path_buf(),
                source,
            })?;

        trace!("Watching {}", dir.display());
        self.watched.insert(dir.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, dir: &Path) {
        if !self.watched.remove(dir) {
            return;
        }

        // The OS drops the registration by itself when the directory is deleted
        if let Err(e) = self.watcher.unwatch(dir) {
            debug!("Unwatch {} ignored: {}", dir.display(), e);
        } else {
            trace!("Unwatched {}", dir.display());
        }
    }

    fn watched(&self) -> Vec<PathBuf> {
        self.watched.iter().cloned().collect()
    }
}

/// Turn a notify callback payload into raw notifications
fn translate(res: notify::Result<Event>) -> Vec<RawNotification> {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            return vec![RawNotification::Error {
                path: e.paths.first().cloned(),
                message: e.to_string(),
            }]
        }
    };

    if event.need_rescan() {
        return vec![RawNotification::Rescan];
    }

    match event.kind {
        // Reads never change what needs mirroring
        EventKind::Access(_) => Vec::new(),
        _ => event.paths.into_iter().map(RawNotification::Changed).collect(),
    }
}
