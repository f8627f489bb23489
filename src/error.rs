//! Error types for shape-model construction.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ShapePcaError>;

/// A thread-safe boxed error, as returned by the linear algebra backends.
pub type ThreadSafeStdError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building, querying, or persisting a shape model.
#[derive(Debug, Error)]
pub enum ShapePcaError {
    /// The input location is missing or cannot be enumerated.
    #[error("cannot read input directory {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mesh file could not be read or parsed.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A mesh file parsed correctly but its vertex count differs from the reference.
    #[error("{path} has {found} vertices, expected {expected}")]
    TopologyMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    /// No file of the batch was accepted into the observation matrix.
    #[error("no mesh accepted into the observation matrix ({candidates} candidate files)")]
    EmptyBatch { candidates: usize },

    /// A PCA accessor was called in the wrong state.
    #[error("`{operation}` is not valid while the PCA engine is {state}")]
    State {
        operation: &'static str,
        state: &'static str,
    },

    /// Matrix or vector dimensions are empty or inconsistent.
    #[error("dimension error: {0}")]
    Dimension(String),

    /// The linear algebra backend failed.
    #[error("decomposition failed: {0}")]
    Decomposition(String),

    /// The output mesh could not be written.
    #[error("failed to write {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A shape model could not be saved or loaded.
    #[error("model persistence: {0}")]
    ModelPersistence(String),
}

impl ShapePcaError {
    /// True for errors that only affect a single input file.
    #[must_use]
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::TopologyMismatch { .. })
    }
}
