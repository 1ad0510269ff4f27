//! Engine error types.

use autorun_core::ValidationError;
use autorun_store::StoreError;
use thiserror::Error;

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Task set, filters or configuration rejected before anything ran.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Durable state could not be read or written.
    #[error("Persistence failed: {0}")]
    Persistence(StoreError),

    /// The workspace could not be protected before the run.
    #[error("Git safety check failed: {0}")]
    GitSafety(String),

    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(e) => Self::Validation(e),
            StoreError::MalformedTaskSet { name, reason } => {
                Self::Validation(ValidationError::MalformedTaskSet { name, reason })
            }
            other => Self::Persistence(other),
        }
    }
}

/// A notification could not be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery through {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },

    #[error("Delivery through {0} timed out")]
    Timeout(String),
}
