//! Validation errors.

use thiserror::Error;

use crate::TaskId;

/// Errors detected before any task executes.
///
/// Any of these aborts the whole run without touching persisted state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Two tasks share the same id.
    #[error("Duplicate task id: '{0}'")]
    DuplicateId(TaskId),

    /// A task depends on an id that is not in the set.
    #[error("Task '{task}' depends on '{dependency}' which doesn't exist")]
    DanglingDependency { task: TaskId, dependency: TaskId },

    /// A task names itself as its dependency.
    #[error("Task '{0}' depends on itself")]
    SelfDependency(TaskId),

    /// A dependency is scheduled after its dependent.
    #[error("Task '{task}' depends on '{dependency}', but '{dependency}' is scheduled after it")]
    OrderingViolation { task: TaskId, dependency: TaskId },

    /// The start task is not part of the computed order.
    #[error("Start task '{0}' not found in task set")]
    UnknownStartTask(TaskId),

    /// The task-set file could not be parsed.
    #[error("Malformed task set '{name}': {reason}")]
    MalformedTaskSet { name: String, reason: String },

    /// A tool name is not known to the registry.
    #[error("Unknown tool '{tool}'. Available: {available}")]
    UnknownTool { tool: String, available: String },

    /// A status string could not be parsed.
    #[error("Unknown task status '{0}'")]
    UnknownStatus(String),

    /// A reset was requested without selecting anything.
    #[error("Nothing selected: use all, a status, or a start task")]
    EmptySelection,
}
