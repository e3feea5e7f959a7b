//! Error types for code generation and output writing.

use std::path::PathBuf;
use thiserror::Error;
use toolsmith_core::{ConfigError, LockError, UnsupportedSource};

/// Errors raised before or during synthesis.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The schema lacks metadata its source type cannot be generated without.
    #[error("{source_type} schema is missing required metadata: {}", keys.join(", "))]
    MissingMetadata {
        source_type: String,
        keys: Vec<String>,
    },

    #[error(transparent)]
    UnsupportedSource(#[from] UnsupportedSource),

    /// The configuration would produce a server that cannot run.
    #[error("invalid generator configuration: {0}")]
    Config(#[from] ConfigError),

    /// Generated source failed to parse. Always a generator bug.
    #[error("generated {artifact} does not parse: {message}")]
    Synthesis { artifact: String, message: String },
}

/// Errors raised while writing generated files.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    /// An artifact failed verification. Nothing was written to the entry
    /// point; a broken tools module is kept at `diagnostic_path` if set.
    #[error("generated {artifact} does not parse: {message}")]
    Synthesis {
        artifact: String,
        message: String,
        diagnostic_path: Option<PathBuf>,
    },

    #[error("invalid entry point file name '{0}': expected a bare `<name>.rs`")]
    InvalidFilename(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}
