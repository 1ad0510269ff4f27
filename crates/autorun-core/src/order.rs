//! Execution order: sorting, dependency validation and filtering.

use crate::{Task, TaskId, TaskStatus, ValidationError};
use std::collections::{HashMap, HashSet};

/// Filters applied to the computed order. All are optional and combine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    /// Keep only this batch.
    pub batch: Option<u32>,
    /// Drop every task before this one in the computed order.
    pub start_from: Option<TaskId>,
    /// Keep tasks whose last status is `failed` or `interrupted`.
    pub retry_failed: bool,
    /// Keep tasks in any of these statuses.
    pub statuses: Vec<TaskStatus>,
    /// Keep tasks with `priority <= max_priority`.
    pub max_priority: Option<i32>,
}

impl OrderFilter {
    /// Returns true if the status predicate keeps `status`.
    ///
    /// With neither `retry_failed` nor explicit statuses every status is kept.
    pub fn accepts_status(&self, status: TaskStatus) -> bool {
        if !self.retry_failed && self.statuses.is_empty() {
            return true;
        }
        (self.retry_failed && status.is_retryable()) || self.statuses.contains(&status)
    }

    /// Returns true if the explicit status list names `status`.
    pub fn names_status(&self, status: TaskStatus) -> bool {
        self.statuses.contains(&status)
    }
}

/// Sort by `(batch, priority)`, keeping declaration order for ties.
pub fn computed_order(tasks: &[Task]) -> Vec<&Task> {
    let mut order: Vec<&Task> = tasks.iter().collect();
    order.sort_by_key(|t| (t.batch, t.priority));
    order
}

/// Validate ids and dependencies against the unfiltered order.
pub fn validate(tasks: &[Task]) -> Result<Vec<&Task>, ValidationError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(&task.id) {
            return Err(ValidationError::DuplicateId(task.id.clone()));
        }
    }

    let order = computed_order(tasks);
    let positions: HashMap<&TaskId, usize> =
        order.iter().enumerate().map(|(i, t)| (&t.id, i)).collect();

    for (pos, task) in order.iter().enumerate() {
        let Some(dep) = &task.depends_on else {
            continue;
        };
        if dep == &task.id {
            return Err(ValidationError::SelfDependency(task.id.clone()));
        }
        match positions.get(dep) {
            None => {
                return Err(ValidationError::DanglingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })
            }
            Some(&dep_pos) if dep_pos > pos => {
                return Err(ValidationError::OrderingViolation {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })
            }
            Some(_) => {}
        }
    }

    Ok(order)
}

/// Build the execution sequence for `tasks` under `filter`.
///
/// Validation runs on the full set first; filters are applied afterwards in
/// the order start, batch, priority, status.
pub fn build<'a>(tasks: &'a [Task], filter: &OrderFilter) -> Result<Vec<&'a Task>, ValidationError> {
    let order = validate(tasks)?;

    let start = match &filter.start_from {
        Some(id) => order
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| ValidationError::UnknownStartTask(id.clone()))?,
        None => 0,
    };

    Ok(order
        .into_iter()
        .skip(start)
        .filter(|t| filter.batch.map_or(true, |b| t.batch == b))
        .filter(|t| filter.max_priority.map_or(true, |p| t.priority <= p))
        .filter(|t| filter.accepts_status(t.status))
        .collect())
}
