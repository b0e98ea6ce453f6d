//! Glob matching over normalized paths

use crate::path::{base_dir, to_slash, Normalizer};
use crate::{Error, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};

/// Compiled glob pattern
///
/// The pattern is rewritten into normalized form at construction (its base is
/// passed through the same [`Normalizer`] as every watched path), so callers
/// only ever feed it normalized paths.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    base: PathBuf,
    matcher: GlobMatcher,
}

impl PathMatcher {
    /// Compile a glob pattern relative to the normalizer's working directory
    pub fn new(glob: &str, normalizer: &Normalizer) -> Result<Self> {
        let trimmed = glob.strip_prefix("./").unwrap_or(glob);
        let raw_base = base_dir(trimmed);
        let base = normalizer.normalize(&raw_base);

        let rest = if raw_base == Path::new(".") {
            trimmed
        } else {
            let raw_base_str = to_slash(&raw_base);
            trimmed
                .strip_prefix(raw_base_str.as_str())
                .unwrap_or(trimmed)
                .trim_start_matches('/')
        };

        let base_str = to_slash(&base);
        let pattern = if base_str == "." {
            rest.to_string()
        } else if base_str.ends_with('/') {
            format!("{}{}", base_str, rest)
        } else {
            format!("{}/{}", base_str, rest)
        };

        let matcher = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|source| Error::InvalidGlob {
                pattern: glob.to_string(),
                source,
            })?
            .compile_matcher();

        Ok(Self {
            pattern,
            base,
            matcher,
        })
    }

    /// Whether a normalized path matches
    pub fn matches(&self, normalized: &Path) -> bool {
        self.matcher.is_match(to_slash(normalized))
    }

    /// Pattern in normalized form
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Normalized base directory of the pattern
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Whether some path strictly below the normalized `dir` could match
    ///
    /// Compares the pattern segment by segment against `dir`. A `**` segment
    /// reached before `dir` runs out matches anything, and a segment that
    /// does not compile on its own (a brace spanning `/`) is assumed to match.
    pub fn could_match_under(&self, dir: &Path) -> bool {
        let dir = to_slash(dir);
        let dir_segments: Vec<&str> = if dir == "." { Vec::new() } else { dir.split('/').collect() };
        let pattern_segments: Vec<&str> = self.pattern.split('/').collect();

        for (i, segment) in dir_segments.iter().enumerate() {
            let Some(&glob) = pattern_segments.get(i) else {
                return false;
            };
            if glob == *segment {
                continue;
            }
            if glob == "**" {
                return true;
            }

            let compiled = GlobBuilder::new(glob)
                .literal_separator(true)
                .backslash_escape(true)
                .build();
            match compiled {
                Ok(compiled) if compiled.compile_matcher().is_match(segment) => {}
                Ok(_) => return false,
                Err(_) => return true,
            }
        }

        pattern_segments.len() > dir_segments.len()
    }
}
