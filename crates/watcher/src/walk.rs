//! Directory tree walking and per-directory snapshots
//!
//! A snapshot records the children of one directory as last observed. The
//! classifier diffs fresh listings against it to tell adds, removes and
//! content changes apart.

use ahash::AHashMap;
use cpx_core::Normalizer;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Metadata kept for each child of a watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    /// Directory that will be descended into (symlinks count only when dereferencing)
    pub is_dir: bool,
    /// Last modification time, if the platform reports one
    pub mtime: Option<SystemTime>,
}

impl EntryMeta {
    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self::with_kind(meta, meta.is_dir())
    }

    fn with_kind(meta: &std::fs::Metadata, is_dir: bool) -> Self {
        Self {
            is_dir,
            mtime: meta.modified().ok(),
        }
    }
}

/// Children of one directory, keyed by normalized path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    entries: AHashMap<PathBuf, EntryMeta>,
}

impl DirectorySnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a child
    pub fn insert(&mut self, path: PathBuf, meta: EntryMeta) -> Option<EntryMeta> {
        self.entries.insert(path, meta)
    }

    /// Forget a child
    pub fn remove(&mut self, path: &Path) -> Option<EntryMeta> {
        self.entries.remove(path)
    }

    /// Look up a child
    pub fn get(&self, path: &Path) -> Option<&EntryMeta> {
        self.entries.get(path)
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory had no children
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Children sorted by path
    pub fn sorted(&self) -> Vec<(PathBuf, EntryMeta)> {
        let mut children: Vec<_> = self
            .entries
            .iter()
            .map(|(path, meta)| (path.clone(), *meta))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }
}

/// Result of walking a directory tree
#[derive(Debug, Default)]
pub struct WalkOutput {
    /// Every directory found, parents before children, with its snapshot
    pub dirs: Vec<(PathBuf, DirectorySnapshot)>,
    /// Sub-directories that could not be read
    pub errors: Vec<(PathBuf, io::Error)>,
}

/// Walk a tree rooted at a normalized path
///
/// A missing root, or a root that is not a directory, yields an empty walk.
/// Failure to read the root itself is returned as an error. Symlinked
/// directories are descended only when `dereference` is set; otherwise they
/// are recorded as leaves.
pub fn walk(root: &Path, normalizer: &Normalizer, dereference: bool) -> io::Result<WalkOutput> {
    let root_abs = normalizer.absolute(root);

    match std::fs::metadata(&root_abs) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            debug!("Walk root {} is not a directory", root.display());
            return Ok(WalkOutput::default());
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Walk root {} does not exist", root.display());
            return Ok(WalkOutput::default());
        }
        Err(e) => return Err(e),
    }

    let mut output = WalkOutput::default();
    let mut index: AHashMap<PathBuf, usize> = AHashMap::new();

    let walker = WalkDir::new(&root_abs)
        .follow_links(dereference)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(|p| normalizer.normalize(p));
                if err.depth() == 0 {
                    return Err(err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(ErrorKind::Other, "walk failed")));
                }
                if err.loop_ancestor().is_some() {
                    debug!("Skipping symlink loop at {:?}", path);
                    continue;
                }
                match (path, err.into_io_error()) {
                    (_, Some(io_err)) if io_err.kind() == ErrorKind::NotFound => {}
                    (Some(path), Some(io_err)) => {
                        warn!("Cannot read {}: {}", path.display(), io_err);
                        output.errors.push((path, io_err));
                    }
                    _ => {}
                }
                continue;
            }
        };

        let path = normalizer.normalize(entry.path());
        let meta = match entry.metadata() {
            Ok(meta) => EntryMeta::with_kind(&meta, entry.file_type().is_dir()),
            // Vanished between listing and stat
            Err(_) => continue,
        };

        if entry.depth() > 0 {
            if let Some(parent) = entry.path().parent() {
                let parent = normalizer.normalize(parent);
                if let Some(&idx) = index.get(&parent) {
                    output.dirs[idx].1.insert(path.clone(), meta);
                }
            }
        }

        if meta.is_dir {
            index.insert(path.clone(), output.dirs.len());
            output.dirs.push((path, DirectorySnapshot::new()));
        }
    }

    Ok(output)
}

/// List the immediate children of a normalized directory
///
/// Returns `None` if the directory no longer exists or is not a directory.
pub fn scan_dir(
    dir: &Path,
    normalizer: &Normalizer,
    dereference: bool,
) -> io::Result<Option<DirectorySnapshot>> {
    let dir_abs = normalizer.absolute(dir);

    let read_dir = match std::fs::read_dir(&dir_abs) {
        Ok(read_dir) => read_dir,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(None)
        }
        Err(e) => return Err(e),
    };

    let mut snapshot = DirectorySnapshot::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let child = normalizer.normalize(&entry.path());
        if let Some(meta) = stat_abs(&entry.path(), dereference)? {
            snapshot.insert(child, meta);
        }
    }

    Ok(Some(snapshot))
}

/// Stat a single normalized path, `None` if it does not exist
pub fn stat(path: &Path, normalizer: &Normalizer, dereference: bool) -> io::Result<Option<EntryMeta>> {
    stat_abs(&normalizer.absolute(path), dereference)
}

fn stat_abs(path: &Path, dereference: bool) -> io::Result<Option<EntryMeta>> {
    let result = if dereference {
        // A dangling link is still a leaf
        std::fs::metadata(path).or_else(|_| std::fs::symlink_metadata(path))
    } else {
        std::fs::symlink_metadata(path)
    };

    match result {
        Ok(meta) => Ok(Some(EntryMeta::from_metadata(&meta))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
