//! Status enums for Tasks and Runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Persisted status of a Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Task has never run, or was reset.
    #[default]
    NotStarted,
    /// Task was dispatched and has not committed an outcome yet.
    InProgress,
    /// Task finished successfully.
    Completed,
    /// Task finished unsuccessfully.
    Failed,
    /// Task was stopped by an operator interrupt.
    Interrupted,
}

impl TaskStatus {
    /// All statuses, in display order.
    pub const ALL: [TaskStatus; 5] = [
        Self::NotStarted,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Interrupted,
    ];

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    /// Statuses selected by a retry-failed filter.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Interrupted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

/// Status of a Run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Run is dispatching tasks.
    #[default]
    Running,
    /// Run reached the end of its task sequence.
    Completed,
    /// Run stopped on an operator interrupt.
    Interrupted,
    /// Run stopped because persisted state could no longer be trusted.
    Aborted,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
