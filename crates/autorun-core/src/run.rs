//! Run bookkeeping: counters, per-task results and the run summary.

use crate::{FailureReason, RunId, RunStatus, TaskId, TaskOutcome, TaskStatus};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Counters mutated as each task of a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl RunCounters {
    /// Fold an outcome into the counters.
    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.attempted += 1;
        match outcome.status {
            TaskStatus::Completed => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            _ => {}
        }
    }

    /// Count a task that was not dispatched.
    pub fn skip(&mut self) {
        self.skipped += 1;
    }
}

/// One line of the run summary per executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// Raw log path relative to the run directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl TaskResult {
    /// Derive a result line from an outcome.
    pub fn from_outcome(task_id: TaskId, outcome: &TaskOutcome, log_file: Option<String>) -> Self {
        Self {
            task_id,
            status: outcome.status,
            duration_seconds: outcome.elapsed_seconds(),
            exit_code: outcome.exit_code,
            failure_reason: outcome.failure_reason,
            log_file,
        }
    }
}

/// Summary of one run, written to `summary.json` when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub task_set_name: String,
    pub started_at: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Local>>,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counters: RunCounters,
    #[serde(default)]
    pub results: Vec<TaskResult>,
}

impl RunSummary {
    /// Start a new summary in `running` state.
    pub fn new(run_id: RunId, task_set_name: impl Into<String>, started_at: DateTime<Local>) -> Self {
        Self {
            run_id,
            task_set_name: task_set_name.into(),
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            counters: RunCounters::default(),
            results: Vec::new(),
        }
    }

    /// Record the outcome of one task.
    pub fn record(&mut self, result: TaskResult, outcome: &TaskOutcome) {
        self.counters.record(outcome);
        self.results.push(result);
    }

    /// Mark the run as finished.
    pub fn finish(&mut self, status: RunStatus, at: DateTime<Local>) {
        self.status = status;
        self.finished_at = Some(at);
    }

    /// Seconds between start and finish (or now, while running).
    pub fn duration_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Local::now);
        let millis = (end - self.started_at).num_milliseconds().max(0);
        (millis as f64 / 100.0).round() / 10.0
    }

    /// Entry appended to the project's run history.
    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            run_id: self.run_id.clone(),
            task_set_name: self.task_set_name.clone(),
            run_at: self.started_at,
            stop_at: self.finished_at.unwrap_or_else(Local::now),
            cumulated_minutes: (self.duration_seconds() / 60.0 * 100.0).round() / 100.0,
            status: self.status,
            tasks_attempted: self.counters.attempted,
            tasks_succeeded: self.counters.succeeded,
            tasks_failed: self.counters.failed,
            tasks_skipped: self.counters.skipped,
        }
    }
}

/// One entry of a project's run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub task_set_name: String,
    pub run_at: DateTime<Local>,
    pub stop_at: DateTime<Local>,
    pub cumulated_minutes: f64,
    pub status: RunStatus,
    pub tasks_attempted: u32,
    pub tasks_succeeded: u32,
    pub tasks_failed: u32,
    #[serde(default)]
    pub tasks_skipped: u32,
}
