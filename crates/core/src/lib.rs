//! Core building blocks for cpx
//!
//! This crate provides the pieces the watch engine consumes:
//! - Path normalization, glob base extraction and destination translation
//! - Glob matching over normalized paths
//! - Copy/remove collaborators that mirror files into the destination
//! - TOML configuration

pub mod config;
pub mod error;
pub mod fs_ops;
pub mod matcher;
pub mod path;

// Re-exports
pub use config::{MirrorConfig, WatchConfig};
pub use error::{Error, Result};
pub use fs_ops::{is_transient, FileOps, LocalFileOps};
pub use matcher::PathMatcher;
pub use path::{base_dir, Normalizer, Translator};
