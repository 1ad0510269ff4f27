//! Result of a single task execution.

use crate::TaskStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why an execution did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Still running at the ceiling.
    Timeout,
    /// Exited successfully before the floor.
    TooFast,
    /// Exited with a nonzero code or was killed by a signal.
    NonzeroExit,
    /// The process could not be started.
    SpawnError,
    /// Stopped by an operator interrupt.
    Interrupted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::TooFast => "too-fast",
            Self::NonzeroExit => "nonzero-exit",
            Self::SpawnError => "spawn-error",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Outcome of one task execution, folded into the task status and run
/// counters. Never persisted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// `completed`, `failed` or `interrupted`.
    pub status: TaskStatus,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    pub failure_reason: Option<FailureReason>,
    /// Last non-blank lines of cleaned output.
    pub output_tail: Vec<String>,
}

impl TaskOutcome {
    fn new(status: TaskStatus, elapsed: Duration) -> Self {
        Self {
            status,
            elapsed,
            exit_code: None,
            failure_reason: None,
            output_tail: Vec::new(),
        }
    }

    /// Successful completion.
    pub fn completed(elapsed: Duration) -> Self {
        let mut outcome = Self::new(TaskStatus::Completed, elapsed);
        outcome.exit_code = Some(0);
        outcome
    }

    /// Failed execution.
    pub fn failed(reason: FailureReason, elapsed: Duration, exit_code: Option<i32>) -> Self {
        let mut outcome = Self::new(TaskStatus::Failed, elapsed);
        outcome.failure_reason = Some(reason);
        outcome.exit_code = exit_code;
        outcome
    }

    /// The process could not be started.
    pub fn spawn_error() -> Self {
        Self::failed(FailureReason::SpawnError, Duration::ZERO, None)
    }

    /// Stopped by an operator interrupt.
    pub fn interrupted(elapsed: Duration) -> Self {
        let mut outcome = Self::new(TaskStatus::Interrupted, elapsed);
        outcome.failure_reason = Some(FailureReason::Interrupted);
        outcome
    }

    /// Classify a process that exited on its own.
    ///
    /// `exit_code` is `None` when the process was killed by a signal.
    pub fn from_exit(exit_code: Option<i32>, elapsed: Duration, floor: Duration) -> Self {
        match exit_code {
            Some(0) if elapsed < floor => Self::failed(FailureReason::TooFast, elapsed, Some(0)),
            Some(0) => Self::completed(elapsed),
            code => Self::failed(FailureReason::NonzeroExit, elapsed, code),
        }
    }

    /// Builder method to attach the output tail.
    pub fn with_output_tail(mut self, tail: Vec<String>) -> Self {
        self.output_tail = tail;
        self
    }

    /// Elapsed seconds rounded to one decimal.
    pub fn elapsed_seconds(&self) -> f64 {
        (self.elapsed.as_secs_f64() * 10.0).round() / 10.0
    }

    /// Returns true if the task completed.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Short description of the failure, e.g. `nonzero-exit:3`.
    pub fn describe_failure(&self) -> Option<String> {
        self.failure_reason.map(|reason| match (reason, self.exit_code) {
            (FailureReason::NonzeroExit, Some(code)) => format!("{}:{}", reason, code),
            (FailureReason::NonzeroExit, None) => format!("{}:signal", reason),
            _ => reason.to_string(),
        })
    }
}
