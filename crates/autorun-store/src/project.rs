//! Project record (`__init__.json`).

use autorun_core::RunRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

fn default_status() -> String {
    "planned".to_string()
}

/// Project metadata and run history.
///
/// History entries are kept as raw JSON so records written by older
/// versions survive a rewrite untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project: String,

    #[serde(default)]
    pub description: String,

    /// Directory the agents work in.
    #[serde(default)]
    pub workspace: String,

    #[serde(default = "default_status")]
    pub status: String,

    #[serde(default)]
    pub created_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Append-only run history.
    #[serde(default)]
    pub run_record: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectRecord {
    /// Create a record for a project that has none yet.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            description: String::new(),
            workspace: String::new(),
            status: default_status(),
            created_at: chrono::Local::now().to_rfc3339(),
            default_tool: None,
            default_model: None,
            tags: Vec::new(),
            run_record: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Append a run to the history.
    pub fn push_run(&mut self, record: &RunRecord) -> Result<(), serde_json::Error> {
        self.run_record.push(serde_json::to_value(record)?);
        Ok(())
    }

    /// History entries that parse as run records, oldest first.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.run_record
            .iter()
            .filter_map(|v| match serde_json::from_value(v.clone()) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable run record");
                    None
                }
            })
            .collect()
    }

    /// Total minutes across the whole history.
    pub fn cumulated_minutes(&self) -> f64 {
        self.run_record
            .iter()
            .filter_map(|v| v.get("cumulated_minutes").and_then(Value::as_f64))
            .sum()
    }
}
