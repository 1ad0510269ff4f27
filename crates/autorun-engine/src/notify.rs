//! Outbound notifications.
//!
//! Delivery is best effort: the controller logs failures and moves on.

use async_trait::async_trait;
use autorun_core::{RunStatus, RunSummary, TaskId, TaskOutcome};
use autorun_exec::format_elapsed;
use tracing::{info, warn};

use crate::NotifyError;

/// Lines of agent output included in a failure message.
const FAILURE_TAIL_LINES: usize = 10;

/// Something worth telling the operator about.
#[derive(Debug, Clone)]
pub enum Notification {
    TaskFailed {
        task_set: String,
        task: TaskId,
        name: String,
        tool: String,
        model: Option<String>,
        outcome: TaskOutcome,
        log_file: String,
    },
    TaskCompleted {
        task_set: String,
        task: TaskId,
        name: String,
        outcome: TaskOutcome,
        done: usize,
        total: usize,
    },
    Interrupted {
        task_set: String,
        task: Option<TaskId>,
        done: usize,
        total: usize,
    },
    RunFinished {
        summary: RunSummary,
        total: usize,
    },
}

impl Notification {
    /// Short title line.
    pub fn title(&self) -> String {
        match self {
            Self::TaskFailed { task, .. } => format!("Task {} failed", task),
            Self::TaskCompleted { task, .. } => format!("Task {} completed", task),
            Self::Interrupted { .. } => "Run interrupted".to_string(),
            Self::RunFinished { summary, .. } => match summary.status {
                RunStatus::Interrupted => "Run interrupted".to_string(),
                _ if summary.counters.failed > 0 => "Run finished with failures".to_string(),
                _ => "Run finished".to_string(),
            },
        }
    }

    /// Markdown body suitable for chat webhooks.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![format!("## {}", self.title())];
        match self {
            Self::TaskFailed {
                task_set,
                task,
                name,
                tool,
                model,
                outcome,
                log_file,
            } => {
                lines.push(format!("**Task set:** {}", task_set));
                lines.push(format!("**Task:** {} {}", task, name));
                lines.push(format!("**Tool:** {}", tool));
                if let Some(model) = model {
                    lines.push(format!("**Model:** {}", model));
                }
                if let Some(code) = outcome.exit_code {
                    lines.push(format!("**Exit code:** {}", code));
                }
                if let Some(reason) = outcome.describe_failure() {
                    lines.push(format!("**Reason:** {}", reason));
                }
                lines.push(format!("**Elapsed:** {}", format_elapsed(outcome.elapsed)));
                lines.push(format!("**Log:** {}", log_file));
                let tail = &outcome.output_tail;
                if !tail.is_empty() {
                    let start = tail.len().saturating_sub(FAILURE_TAIL_LINES);
                    lines.push("```".to_string());
                    lines.extend(tail[start..].iter().cloned());
                    lines.push("```".to_string());
                }
            }
            Self::TaskCompleted {
                task_set,
                task,
                name,
                outcome,
                done,
                total,
            } => {
                lines.push(format!("**Task set:** {}", task_set));
                lines.push(format!("**Task:** {} {}", task, name));
                lines.push(format!("**Elapsed:** {}", format_elapsed(outcome.elapsed)));
                lines.push(format!("**Progress:** {}/{}", done, total));
            }
            Self::Interrupted {
                task_set,
                task,
                done,
                total,
            } => {
                lines.push(format!("**Task set:** {}", task_set));
                if let Some(task) = task {
                    lines.push(format!("**Current task:** {}", task));
                }
                lines.push(format!("**Done:** {}/{}", done, total));
            }
            Self::RunFinished { summary, total } => {
                lines.push(format!("**Task set:** {}", summary.task_set_name));
                lines.push(format!("**Run:** {}", summary.run_id));
                lines.push(format!("**Status:** {}", summary.status));
                lines.push(format!(
                    "**Succeeded:** {} | **Failed:** {} | **Skipped:** {} | **Total:** {}",
                    summary.counters.succeeded, summary.counters.failed, summary.counters.skipped, total
                ));
                for result in &summary.results {
                    if let Some(reason) = result.failure_reason {
                        lines.push(format!(
                            "- **{}** {} ({:.1}s)",
                            result.task_id, reason, result.duration_seconds
                        ));
                    }
                }
            }
        }
        lines.join("\n")
    }
}

/// A notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Records notifications in the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::TaskFailed { .. } | Notification::Interrupted { .. } => {
                warn!(title = %notification.title(), "Notification\n{}", notification.to_markdown());
            }
            _ => {
                info!(title = %notification.title(), "Notification\n{}", notification.to_markdown());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autorun_core::{FailureReason, RunId, TaskResult};
    use chrono::Local;
    use std::time::Duration;

    #[test]
    fn test_failure_message() {
        let outcome = TaskOutcome::failed(FailureReason::NonzeroExit, Duration::from_secs(75), Some(2))
            .with_output_tail((0..15).map(|i| format!("line {}", i)).collect());
        let note = Notification::TaskFailed {
            task_set: "fixes".to_string(),
            task: TaskId::new("F-2"),
            name: "Fix logout".to_string(),
            tool: "copilot".to_string(),
            model: Some("claude-opus-4.6".to_string()),
            outcome,
            log_file: "logs/F-2.log".to_string(),
        };
        let text = note.to_markdown();
        assert!(text.starts_with("## Task F-2 failed"));
        assert!(text.contains("**Reason:** nonzero-exit:2"));
        assert!(text.contains("**Elapsed:** 1m15s"));
        assert!(text.contains("line 14"));
        assert!(!text.lines().any(|l| l == "line 4"));
    }

    #[test]
    fn test_run_summary_message() {
        let mut summary = RunSummary::new(RunId::new("2026-01-01_00-00-00"), "fixes", Local::now());
        let ok = TaskOutcome::completed(Duration::from_secs(20));
        let bad = TaskOutcome::failed(FailureReason::TooFast, Duration::from_secs(2), Some(0));
        summary.record(TaskResult::from_outcome(TaskId::new("A"), &ok, None), &ok);
        summary.record(TaskResult::from_outcome(TaskId::new("B"), &bad, None), &bad);
        summary.finish(RunStatus::Completed, Local::now());

        let note = Notification::RunFinished { summary, total: 3 };
        assert_eq!(note.title(), "Run finished with failures");
        let text = note.to_markdown();
        assert!(text.contains("**Succeeded:** 1 | **Failed:** 1"));
        assert!(text.contains("- **B** too-fast (2.0s)"));
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let note = Notification::Interrupted {
            task_set: "fixes".to_string(),
            task: None,
            done: 0,
            total: 1,
        };
        assert!(LogNotifier.send(&note).await.is_ok());
        assert_eq!(LogNotifier.name(), "log");
    }
}
