//! Copy/remove collaborators used to mirror files into the destination

use async_trait::async_trait;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Filesystem operations applied to the destination tree
///
/// Implementations receive real (absolute) filesystem paths.
#[async_trait]
pub trait FileOps: Send + Sync {
    /// Copy `src` to `dst`, creating missing parent directories
    ///
    /// A directory source mirrors as a directory.
    async fn copy(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Remove `dst` (a file or an empty directory) and any parents it leaves empty
    async fn remove(&self, dst: &Path) -> io::Result<()>;
}

/// Whether an I/O error is worth retrying
///
/// Covers targets that vanished between classification and execution, and
/// permission errors caused by transient locks (virus scanners, indexers).
pub fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied)
}

/// [`FileOps`] backed by the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFileOps {
    /// Parent cleanup after a remove never climbs above this directory
    dest_root: PathBuf,
    /// Skip copies whose destination is newer than the source
    update: bool,
}

impl LocalFileOps {
    /// Create file ops rooted at the destination directory
    pub fn new(dest_root: impl Into<PathBuf>) -> Self {
        Self {
            dest_root: dest_root.into(),
            update: false,
        }
    }

    /// Enable or disable update mode
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Destination root
    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    /// True when the destination exists and is strictly newer than the source
    async fn destination_is_newer(src: &Path, dst: &Path) -> io::Result<bool> {
        let dst_meta = match tokio::fs::metadata(dst).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let src_meta = tokio::fs::metadata(src).await?;

        Ok(dst_meta.modified()? > src_meta.modified()?)
    }

    /// Remove empty ancestors of `path`, stopping at the destination root
    async fn remove_empty_parents(&self, path: &Path) -> io::Result<()> {
        let mut current = path.parent();

        while let Some(dir) = current {
            if dir == self.dest_root || !dir.starts_with(&self.dest_root) {
                break;
            }

            match tokio::fs::remove_dir(dir).await {
                Ok(()) => trace!("Removed empty directory {}", dir.display()),
                Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }

            current = dir.parent();
        }

        Ok(())
    }
}

#[async_trait]
impl FileOps for LocalFileOps {
    async fn copy(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let meta = tokio::fs::metadata(src).await?;

        if meta.is_dir() {
            tokio::fs::create_dir_all(dst).await?;
            return Ok(());
        }

        if self.update && Self::destination_is_newer(src, dst).await? {
            debug!("Skipping {} (destination is newer)", dst.display());
            return Ok(());
        }

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::copy(src, dst).await?;
        Ok(())
    }

    async fn remove(&self, dst: &Path) -> io::Result<()> {
        let meta = match tokio::fs::symlink_metadata(dst).await {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        match meta {
            Some(meta) if meta.is_dir() => match tokio::fs::remove_dir(dst).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => return Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
            Some(_) => match tokio::fs::remove_file(dst).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
            None => {}
        }

        self.remove_empty_parents(dst).await
    }
}
