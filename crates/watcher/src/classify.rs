//! Change classification
//!
//! Turns "something happened at this path" into logical add/change/remove
//! actions by diffing the filesystem against the owning directory's snapshot.
//! Directory appearance and disappearance recurse: a new directory is walked
//! and watched through [`ChangeClassifier::add_directory`] (the same path the
//! initial open takes), and a vanished one is unwatched with a Remove for
//! everything its snapshots still held.

use crate::queue::ActionKind;
use crate::registry::WatchRegistry;
use crate::walk::{self, DirectorySnapshot, EntryMeta};
use crate::{Result, WatchError};
use cpx_core::Normalizer;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// One classified action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// Normalized source path
    pub path: PathBuf,
    pub kind: ActionKind,
    /// Whether the path is (or was) a directory
    pub is_dir: bool,
}

impl Classified {
    fn new(path: PathBuf, kind: ActionKind, is_dir: bool) -> Self {
        Self { path, kind, is_dir }
    }
}

/// Output of one classification pass
///
/// Errors never abort the pass; they are collected and surfaced as
/// `watch-error` events while the rest of the tree keeps being watched.
#[derive(Debug, Default)]
pub struct Classification {
    pub actions: Vec<Classified>,
    pub errors: Vec<WatchError>,
}

impl Classification {
    /// Whether the pass produced nothing
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.errors.is_empty()
    }

    fn push(&mut self, path: PathBuf, kind: ActionKind, is_dir: bool) {
        trace!("Classified {:?} {}", kind, path.display());
        self.actions.push(Classified::new(path, kind, is_dir));
    }
}

/// Diffs notifications against per-directory snapshots
pub struct ChangeClassifier {
    registry: WatchRegistry,
    normalizer: Normalizer,
    root: PathBuf,
    dereference: bool,
}

impl ChangeClassifier {
    /// Create a classifier for the tree under the normalized `root`
    pub fn new(registry: WatchRegistry, normalizer: Normalizer, root: PathBuf, dereference: bool) -> Self {
        Self {
            registry,
            normalizer,
            root,
            dereference,
        }
    }

    /// Watch root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory registrations
    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Forget every registration
    pub fn clear(&mut self) {
        self.registry.clear();
    }

    /// Handle a raw change at an absolute path
    pub async fn notify(&mut self, raw: &Path, out: &mut Classification) {
        let path = self.normalizer.normalize(raw);

        match parent_of(&path) {
            Some(parent) if self.registry.contains(&parent) => {
                self.classify_child(&parent, path, out).await;
            }
            _ if self.registry.contains(&path) => {
                self.reconcile_dir(path, out).await;
            }
            _ => trace!("Ignoring notification outside the watched tree: {}", path.display()),
        }
    }

    /// Handle a backend error, forgetting the directory it names
    pub fn backend_error(&mut self, raw: Option<&Path>, message: String, out: &mut Classification) {
        let path = raw.map(|p| self.normalizer.normalize(p));
        warn!("Watch backend error at {:?}: {}", path, message);

        if let Some(path) = &path {
            if self.registry.uninstall(path).is_some() {
                debug!("Dropped broken watch on {}", path.display());
            }
        }

        out.errors.push(WatchError::Backend(match path {
            Some(path) => format!("{}: {}", path.display(), message),
            None => message,
        }));
    }

    /// Re-list every registered directory (after a backend overflow)
    pub async fn rescan(&mut self, out: &mut Classification) {
        debug!("Rescanning {} watched directories", self.registry.len());

        for dir in self.registry.dirs() {
            // An earlier reconcile may already have dropped it
            if self.registry.contains(&dir) {
                self.reconcile_dir(dir, out).await;
            }
        }
    }

    /// Walk a directory, watch every directory in it and emit an Add for every
    /// entry found
    ///
    /// Directories that are already registered are skipped together with
    /// their listings. A directory the backend refuses to watch stays
    /// unregistered, but its entries are still emitted. Failure to read `dir`
    /// itself is returned; failures deeper down are collected into `out`.
    pub async fn add_directory(&mut self, dir: PathBuf, out: &mut Classification) -> Result<()> {
        if self.registry.contains(&dir) {
            return Ok(());
        }

        let normalizer = self.normalizer.clone();
        let dereference = self.dereference;
        let root = dir.clone();
        let walked = blocking(move || walk::walk(&root, &normalizer, dereference))
            .await
            .map_err(|source| WatchError::Walk {
                path: dir.clone(),
                source,
            })?;

        for (path, source) in walked.errors {
            out.errors.push(WatchError::Walk { path, source });
        }

        let mut fresh = Vec::with_capacity(walked.dirs.len());
        for (path, snapshot) in walked.dirs {
            if self.registry.contains(&path) {
                continue;
            }

            for (child, meta) in snapshot.sorted() {
                out.push(child, ActionKind::Add, meta.is_dir);
            }
            fresh.push((path, snapshot));
        }

        for e in self.registry.install_all(fresh).await {
            warn!("{}", e);
            out.errors.push(e);
        }

        Ok(())
    }

    /// Unwatch a directory and everything below it, emitting a Remove for
    /// every entry its snapshots held
    ///
    /// The contents of a directory are removed before its own record, so
    /// `dir` itself is not emitted; its parent's entry covers it.
    pub fn remove_directory(&mut self, dir: &Path, out: &mut Classification) {
        let Some(snapshot) = self.registry.uninstall(dir) else {
            return;
        };

        for (child, meta) in snapshot.sorted() {
            if meta.is_dir {
                self.remove_directory(&child, out);
            }
            out.push(child, ActionKind::Remove, meta.is_dir);
        }
    }

    /// Classify one child of a registered directory by re-stating it
    pub async fn classify_child(&mut self, parent: &Path, path: PathBuf, out: &mut Classification) {
        let prior = self
            .registry
            .snapshot(parent)
            .and_then(|snapshot| snapshot.get(&path))
            .copied();

        let stated = self.stat(&path).await;
        let current = match stated {
            Ok(current) => current,
            Err(source) => {
                out.errors.push(WatchError::Classify { path, source });
                return;
            }
        };

        self.apply(parent, path, prior, current, false, out).await;
    }

    /// Re-list a registered directory and diff it against its snapshot
    ///
    /// Files present in both are reported changed only when their mtime moved.
    /// A directory that has vanished is handled through its parent, or diffed
    /// against an empty listing when it is the watch root.
    pub async fn reconcile_dir(&mut self, dir: PathBuf, out: &mut Classification) {
        let mut target = dir;

        let listing = loop {
            let scanned = self.scan(&target).await;
            match scanned {
                Ok(Some(listing)) => break listing,
                Ok(None) => {}
                Err(source) => {
                    out.errors.push(WatchError::Classify { path: target, source });
                    return;
                }
            }

            debug!("{} vanished", target.display());
            match parent_of(&target) {
                Some(parent) if target != self.root && self.registry.contains(&parent) => {
                    target = parent;
                }
                _ => {
                    self.remove_directory(&target, out);
                    return;
                }
            }
        };

        let prior = match self.registry.snapshot(&target) {
            Some(snapshot) => snapshot.clone(),
            None => return,
        };

        for (path, meta) in listing.sorted() {
            let before = prior.get(&path).copied();
            self.apply(&target, path, before, Some(meta), true, out).await;
        }

        for (path, meta) in prior.sorted() {
            if listing.get(&path).is_none() {
                self.apply(&target, path, Some(meta), None, true, out).await;
            }
        }
    }

    /// Fold one observed (prior, current) pair into the parent's snapshot
    async fn apply(
        &mut self,
        parent: &Path,
        path: PathBuf,
        prior: Option<EntryMeta>,
        current: Option<EntryMeta>,
        compare_mtime: bool,
        out: &mut Classification,
    ) {
        if let Some(snapshot) = self.registry.snapshot_mut(parent) {
            match current {
                Some(meta) => snapshot.insert(path.clone(), meta),
                None => snapshot.remove(&path),
            };
        }

        match (prior, current) {
            (None, None) => {}
            (None, Some(now)) => self.appeared(path, now, out).await,
            (Some(was), None) => self.vanished(path, was, out),
            (Some(was), Some(now)) if was.is_dir != now.is_dir => {
                self.vanished(path.clone(), was, out);
                self.appeared(path, now, out).await;
            }
            // Directory contents are reported by the directory's own watch
            (Some(_), Some(now)) if now.is_dir => {}
            (Some(was), Some(now)) => {
                if !compare_mtime || was.mtime != now.mtime {
                    out.push(path, ActionKind::Change, false);
                }
            }
        }
    }

    async fn appeared(&mut self, path: PathBuf, meta: EntryMeta, out: &mut Classification) {
        out.push(path.clone(), ActionKind::Add, meta.is_dir);

        if meta.is_dir {
            if let Err(e) = self.add_directory(path, out).await {
                warn!("{}", e);
                out.errors.push(e);
            }
        }
    }

    fn vanished(&mut self, path: PathBuf, meta: EntryMeta, out: &mut Classification) {
        if meta.is_dir {
            self.remove_directory(&path, out);
        }
        out.push(path, ActionKind::Remove, meta.is_dir);
    }

    async fn stat(&self, path: &Path) -> io::Result<Option<EntryMeta>> {
        let normalizer = self.normalizer.clone();
        let dereference = self.dereference;
        let path = path.to_path_buf();
        blocking(move || walk::stat(&path, &normalizer, dereference)).await
    }

    async fn scan(&self, dir: &Path) -> io::Result<Option<DirectorySnapshot>> {
        let normalizer = self.normalizer.clone();
        let dereference = self.dereference;
        let dir = dir.to_path_buf();
        blocking(move || walk::scan_dir(&dir, &normalizer, dereference)).await
    }
}

/// Parent of a normalized path (`.` for top-level relative entries)
fn parent_of(path: &Path) -> Option<PathBuf> {
    if path == Path::new(".") {
        return None;
    }

    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Some(PathBuf::from(".")),
        Some(parent) => Some(parent.to_path_buf()),
        None => None,
    }
}

/// Run filesystem work off the event loop
async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(ErrorKind::Other, e))?
}
