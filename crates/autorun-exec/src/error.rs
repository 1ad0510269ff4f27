//! Error types for process supervision.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while starting or watching an agent process.
///
/// These never escape a task: the supervisor folds them into a
/// `TaskOutcome` and logs them.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The agent process could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A pseudo-terminal could not be allocated.
    #[error("PTY unavailable: {0}")]
    Pty(String),

    /// A log file could not be opened or written.
    #[error("Log file '{}': {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
