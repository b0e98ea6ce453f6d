//! Mirror configuration
//!
//! Loaded from TOML, every field defaulted:
//!
//! ```toml
//! source = "src/**/*.txt"
//! dest = "out"
//! dereference = false
//! include_empty_dirs = false
//! initial_copy = true
//!
//! [watch]
//! debounce_ms = 100
//! max_retries = 10
//! concurrency = 8
//! update = false
//! ```

use crate::matcher::PathMatcher;
use crate::path::Normalizer;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tuning for the watch engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Quiet period before the pending queue drains (default: 100ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Consecutive transient failures tolerated per path (default: 10)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Copy/remove operations allowed in flight at once (default: 8)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Skip copies whose destination is newer than the source (default: false)
    #[serde(default)]
    pub update: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            update: false,
        }
    }
}

impl WatchConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "debounce_ms must be between 0 and 60000 (got {})",
                self.debounce_ms
            )));
        }
        if self.max_retries > 1_000 {
            return Err(Error::InvalidConfig(format!(
                "max_retries must be between 0 and 1000 (got {})",
                self.max_retries
            )));
        }
        if self.concurrency == 0 || self.concurrency > 256 {
            return Err(Error::InvalidConfig(format!(
                "concurrency must be between 1 and 256 (got {})",
                self.concurrency
            )));
        }
        Ok(())
    }
}

/// What to mirror and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Glob selecting source files
    pub source: String,

    /// Destination directory
    pub dest: PathBuf,

    /// Follow symlinks while walking (default: false)
    #[serde(default)]
    pub dereference: bool,

    /// Mirror matching directories even when empty (default: false)
    #[serde(default)]
    pub include_empty_dirs: bool,

    /// Copy existing matches before reporting ready (default: true)
    #[serde(default = "default_true")]
    pub initial_copy: bool,

    /// Engine tuning
    #[serde(default)]
    pub watch: WatchConfig,
}

impl MirrorConfig {
    /// Minimal config for a glob and destination
    pub fn new(source: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            dereference: false,
            include_empty_dirs: false,
            initial_copy: true,
            watch: WatchConfig::default(),
        }
    }

    /// Parse from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&contents)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the config against the normalizer's working directory
    pub fn validate(&self, normalizer: &Normalizer) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::InvalidConfig("source glob must not be empty".into()));
        }
        if self.dest.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("dest must not be empty".into()));
        }

        let matcher = PathMatcher::new(&self.source, normalizer)?;
        let dest = normalizer.normalize(&self.dest);
        if matcher.could_match_under(&dest) {
            return Err(Error::InvalidConfig(format!(
                "dest {} could receive files matched by {}",
                dest.display(),
                matcher.pattern()
            )));
        }

        self.watch.validate()
    }
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    10
}

fn default_concurrency() -> usize {
    8
}

fn default_true() -> bool {
    true
}
