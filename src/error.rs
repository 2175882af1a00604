//! Error types for corral.

use thiserror::Error;

/// Corral error type.
///
/// Rejected admissions, double-releases, and absent-agent updates are
/// ordinary return values, not errors; only conditions that prevent an
/// operation from completing at all show up here.
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence layer failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for corral.
pub type Result<T> = std::result::Result<T, Error>;
