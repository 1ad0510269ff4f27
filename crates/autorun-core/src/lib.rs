//! autorun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Process spawning
//! - Filesystem layout
//! - Async runtime specifics
//!
//! Everything the engine decides before a process is spawned lives here:
//! task sets, statuses, outcomes, tool descriptions and the execution order.

pub mod error;
pub mod ids;
pub mod order;
pub mod outcome;
pub mod run;
pub mod status;
pub mod task;
pub mod tool;

// Re-export commonly used types
pub use error::ValidationError;
pub use ids::{RunId, TaskId};
pub use order::{build, computed_order, OrderFilter};
pub use outcome::{FailureReason, TaskOutcome};
pub use run::{RunCounters, RunRecord, RunSummary, TaskResult};
pub use status::{RunStatus, TaskStatus};
pub use task::{ResetSelector, Task, TaskCli, TaskSet, TaskStats};
pub use tool::{ToolRegistry, ToolSpec, DEFAULT_TOOL};
