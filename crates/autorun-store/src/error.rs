//! Error types for the state store.

use std::path::PathBuf;

use autorun_core::ValidationError;
use thiserror::Error;

/// Errors raised while reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error on a specific path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be read or written.
    #[error("Invalid JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A project, task set or task does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A task-set file exists but cannot be parsed.
    #[error("Malformed task set '{name}': {reason}")]
    MalformedTaskSet { name: String, reason: String },

    /// A requested change was rejected before anything was written.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
