//! Path normalization and source → destination translation
//!
//! Every path that reaches the matcher, the walker, the classifier or the
//! translator goes through the same [`Normalizer`]. Mixing normalized and raw
//! paths makes glob matches fail silently, so nothing downstream of the
//! watcher boundary handles raw paths.

use std::path::{Component, Path, PathBuf};

/// Characters that make a glob segment "magic"
const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '!'];

/// Produces the canonical relative-to-cwd form of a path
///
/// Paths inside `cwd` become relative with `.` components removed; paths
/// outside `cwd` stay absolute. `cwd` itself normalizes to `.`.
#[derive(Debug, Clone)]
pub struct Normalizer {
    cwd: PathBuf,
}

impl Normalizer {
    /// Create a normalizer anchored at the given working directory
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: clean(&cwd.into()),
        }
    }

    /// Create a normalizer anchored at the process working directory
    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Working directory this normalizer is anchored at
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Normalize a path (relative paths are resolved against `cwd`)
    pub fn normalize(&self, path: &Path) -> PathBuf {
        let absolute = if path.is_absolute() {
            clean(path)
        } else {
            clean(&self.cwd.join(path))
        };

        match absolute.strip_prefix(&self.cwd) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => absolute,
        }
    }

    /// Map a normalized path back to a real filesystem location
    pub fn absolute(&self, normalized: &Path) -> PathBuf {
        if normalized.is_absolute() {
            normalized.to_path_buf()
        } else if normalized == Path::new(".") {
            self.cwd.clone()
        } else {
            self.cwd.join(normalized)
        }
    }
}

/// Render a normalized path with forward slashes for glob matching
pub fn to_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Lexically clean a path: drop `.` and resolve `..` where possible
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Longest non-magic prefix of a glob pattern
///
/// - `a/**/*.txt` → `a`
/// - `*.txt` → `.`
/// - `a/b/file.txt` (no magic) → `a/b`
pub fn base_dir(glob: &str) -> PathBuf {
    let glob = glob.strip_prefix("./").unwrap_or(glob);
    let segments: Vec<&str> = glob.split('/').collect();

    let kept = match segments.iter().position(|s| s.contains(GLOB_META)) {
        Some(idx) => &segments[..idx],
        None => &segments[..segments.len().saturating_sub(1)],
    };

    let joined = kept.join("/");
    if joined.is_empty() {
        if glob.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        }
    } else {
        PathBuf::from(joined)
    }
}

/// Maps normalized source paths under `base` onto `dest`
///
/// A path outside `base` translates to itself, which the executor treats as
/// "nothing to do".
#[derive(Debug, Clone)]
pub struct Translator {
    base: PathBuf,
    dest: PathBuf,
}

impl Translator {
    /// Both paths must already be normalized
    pub fn new(base: PathBuf, dest: PathBuf) -> Self {
        Self { base, dest }
    }

    /// Base directory (normalized)
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Destination directory (normalized)
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Translate a normalized source path into its destination counterpart
    pub fn translate(&self, src: &Path) -> PathBuf {
        let rel = if self.base == Path::new(".") {
            if src.is_absolute() {
                return src.to_path_buf();
            }
            src
        } else {
            match src.strip_prefix(&self.base) {
                Ok(rel) => rel,
                Err(_) => return src.to_path_buf(),
            }
        };

        if rel.as_os_str().is_empty() {
            self.dest.clone()
        } else if self.dest == Path::new(".") {
            rel.to_path_buf()
        } else {
            self.dest.join(rel)
        }
    }

    /// Whether a normalized path lies inside the base directory
    pub fn contains(&self, path: &Path) -> bool {
        if self.base == Path::new(".") {
            !path.is_absolute()
        } else {
            path.starts_with(&self.base)
        }
    }
}
