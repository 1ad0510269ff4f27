//! Task and TaskSet types.

use crate::{computed_order, TaskId, TaskStatus, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

fn default_batch() -> u32 {
    1
}

fn default_priority() -> i32 {
    50
}

/// Per-task tool and model override, stored as `cli: { tool, model }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCli {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TaskCli {
    /// Returns true if neither tool nor model is set.
    pub fn is_empty(&self) -> bool {
        self.tool.is_none() && self.model.is_none()
    }
}

/// A Task is one unit of work dispatched to an agent.
///
/// Keys the engine does not know are kept in `extra` and written back
/// unchanged, so task files can carry arbitrary payload for templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the task set.
    #[serde(rename = "task_no", alias = "id")]
    pub id: TaskId,

    /// Human-readable name.
    #[serde(rename = "task_name", alias = "name", default)]
    pub name: String,

    /// Batch number; lower batches run first.
    #[serde(default = "default_batch")]
    pub batch: u32,

    /// Free text description.
    #[serde(default)]
    pub description: String,

    /// Smaller runs first within a batch.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Last known status.
    #[serde(default)]
    pub status: TaskStatus,

    /// Template path override, relative to the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Tool and model override.
    #[serde(default, skip_serializing_if = "TaskCli::is_empty")]
    pub cli: TaskCli,

    /// Id of the task that must be scheduled before this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<TaskId>,

    /// Seconds spent in the last execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,

    /// RFC 3339 timestamp of the last execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,

    /// Opaque payload fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Create a new Task with default batch, priority and status.
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            batch: default_batch(),
            description: String::new(),
            priority: default_priority(),
            status: TaskStatus::default(),
            prompt: None,
            cli: TaskCli::default(),
            depends_on: None,
            elapsed_seconds: None,
            last_run_at: None,
            extra: Map::new(),
        }
    }

    /// Builder method to set the batch.
    pub fn with_batch(mut self, batch: u32) -> Self {
        self.batch = batch;
        self
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder method to set the dependency.
    pub fn with_depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.depends_on = Some(id.into());
        self
    }

    /// Clear everything a previous execution recorded.
    pub fn reset(&mut self) {
        self.status = TaskStatus::NotStarted;
        self.elapsed_seconds = None;
        self.last_run_at = None;
    }
}

/// Which tasks a reset applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetSelector {
    /// Select every task.
    pub all: bool,
    /// Select tasks in any of these statuses.
    pub statuses: Vec<TaskStatus>,
    /// Select this task and everything after it in the computed order.
    pub from: Option<TaskId>,
    /// Restrict the selection to one batch.
    pub batch: Option<u32>,
}

impl ResetSelector {
    /// Select every task.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        !self.all && self.statuses.is_empty() && self.from.is_none()
    }
}

/// Per-status counts for a task set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub not_started: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub interrupted: usize,
}

/// A collection of tasks loaded from a `<name>.tasks.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSet {
    /// Name derived from the file name, never stored in the file.
    #[serde(skip)]
    pub name: String,

    /// Default template path for every task in the set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Tasks in declaration order.
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Extra top-level keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskSet {
    /// Create an empty task set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: None,
            tasks: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Builder method to add a task.
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Parse a task set from the contents of its file.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, ValidationError> {
        let name = name.into();
        let mut set: TaskSet =
            serde_json::from_str(json).map_err(|e| ValidationError::MalformedTaskSet {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        set.name = name;
        Ok(set)
    }

    /// Get a task by id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Get a mutable task by id.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// Last known status of every task.
    pub fn statuses(&self) -> HashMap<TaskId, TaskStatus> {
        self.tasks
            .iter()
            .map(|t| (t.id.clone(), t.status))
            .collect()
    }

    /// Count tasks by status.
    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::NotStarted => stats.not_started += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Interrupted => stats.interrupted += 1,
            }
        }
        stats
    }

    /// Reset the selected tasks to `not-started`.
    ///
    /// Returns the ids that were reset, in computed order.
    pub fn reset(&mut self, selector: &ResetSelector) -> Result<Vec<TaskId>, ValidationError> {
        if selector.is_empty() {
            return Err(ValidationError::EmptySelection);
        }

        let order = computed_order(&self.tasks);
        let start = match &selector.from {
            Some(from) => order
                .iter()
                .position(|t| &t.id == from)
                .ok_or_else(|| ValidationError::UnknownStartTask(from.clone()))?,
            None => 0,
        };

        let selected: Vec<TaskId> = order[start..]
            .iter()
            .filter(|t| selector.batch.map_or(true, |b| t.batch == b))
            .filter(|t| selector.statuses.is_empty() || selector.statuses.contains(&t.status))
            .map(|t| t.id.clone())
            .collect();

        for id in &selected {
            if let Some(task) = self.get_mut(id) {
                task.reset();
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "template": "templates/fix.md",
        "owner": "platform",
        "tasks": [
            {
                "task_no": "A-1",
                "task_name": "Fix auth",
                "batch": 2,
                "priority": 10,
                "status": "failed",
                "cli": { "tool": "claude" },
                "files": ["src/auth.rs"]
            },
            { "id": "A-2", "name": "Docs" }
        ]
    }"#;

    #[test]
    fn test_parse_accepts_aliases_and_defaults() {
        let set = TaskSet::from_json("fixes", SAMPLE).unwrap();
        assert_eq!(set.name, "fixes");
        assert_eq!(set.template.as_deref(), Some("templates/fix.md"));

        let a1 = set.get(&TaskId::new("A-1")).unwrap();
        assert_eq!(a1.batch, 2);
        assert_eq!(a1.status, TaskStatus::Failed);
        assert_eq!(a1.cli.tool.as_deref(), Some("claude"));

        let a2 = set.get(&TaskId::new("A-2")).unwrap();
        assert_eq!(a2.name, "Docs");
        assert_eq!(a2.batch, 1);
        assert_eq!(a2.priority, 50);
        assert_eq!(a2.status, TaskStatus::NotStarted);
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let set = TaskSet::from_json("fixes", SAMPLE).unwrap();
        let value = serde_json::to_value(&set).unwrap();

        assert_eq!(value["owner"], "platform");
        assert_eq!(value["tasks"][0]["files"][0], "src/auth.rs");
        assert_eq!(value["tasks"][0]["task_no"], "A-1");
        assert!(value["tasks"][1].get("cli").is_none());
    }

    #[test]
    fn test_malformed_task_set() {
        let err = TaskSet::from_json("broken", "{ \"tasks\": 3 }").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedTaskSet { .. }));
    }

    #[test]
    fn test_stats() {
        let set = TaskSet::from_json("fixes", SAMPLE).unwrap();
        let stats = set.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.not_started, 1);
    }

    fn history() -> TaskSet {
        let mut done = Task::new("B-1", "one").with_status(TaskStatus::Completed);
        done.elapsed_seconds = Some(42.0);
        done.last_run_at = Some("2026-01-01T10:00:00+00:00".to_string());
        TaskSet::new("history")
            .with_task(done)
            .with_task(Task::new("B-2", "two").with_status(TaskStatus::Failed))
            .with_task(
                Task::new("B-3", "three")
                    .with_batch(2)
                    .with_status(TaskStatus::Completed),
            )
    }

    #[test]
    fn test_reset_by_status() {
        let mut set = history();
        let selector = ResetSelector {
            statuses: vec![TaskStatus::Completed],
            batch: Some(1),
            ..Default::default()
        };
        let reset = set.reset(&selector).unwrap();

        assert_eq!(reset, vec![TaskId::new("B-1")]);
        let b1 = set.get(&TaskId::new("B-1")).unwrap();
        assert_eq!(b1.status, TaskStatus::NotStarted);
        assert!(b1.elapsed_seconds.is_none());
        assert!(b1.last_run_at.is_none());
        assert_eq!(
            set.get(&TaskId::new("B-3")).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_reset_from() {
        let mut set = history();
        let selector = ResetSelector {
            from: Some(TaskId::new("B-2")),
            ..Default::default()
        };
        let reset = set.reset(&selector).unwrap();
        assert_eq!(reset, vec![TaskId::new("B-2"), TaskId::new("B-3")]);
        assert_eq!(
            set.get(&TaskId::new("B-1")).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_reset_requires_selection() {
        let mut set = history();
        assert_eq!(
            set.reset(&ResetSelector::default()),
            Err(ValidationError::EmptySelection)
        );

        let selector = ResetSelector {
            from: Some(TaskId::new("nope")),
            ..Default::default()
        };
        assert_eq!(
            set.reset(&selector),
            Err(ValidationError::UnknownStartTask(TaskId::new("nope")))
        );
    }
}
