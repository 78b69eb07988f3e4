//! Error types for cluster configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a cluster configuration.
///
/// These are always fatal: they abort before any process is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse configuration file (includes unknown distribution kinds).
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },

    /// Configuration parsed but describes an impossible cluster.
    #[error("invalid cluster configuration: {0}")]
    Invalid(String),
}
