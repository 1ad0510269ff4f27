//! Project-scoped state store.
//!
//! Layout under a project directory:
//!
//! ```text
//! __init__.json                  project record
//! <set>.tasks.json               task sets
//! templates/__init__.md          default prompt template
//! runtime/runs/<run_id>__<set>/  run.json, summary.json, live.json, prompts/, logs/
//! runtime/backups/               task-set copies taken before each run
//! runtime/latest                 link to the newest run directory
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use autorun_core::{
    ResetSelector, RunCounters, RunId, RunSummary, TaskId, TaskOutcome, TaskSet, TaskStatus,
    ValidationError,
};
use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atomic::{atomic_write, write_json};
use crate::error::{Result, StoreError};
use crate::ProjectRecord;

const PROJECT_FILE: &str = "__init__.json";
const TASK_SET_SUFFIX: &str = ".tasks.json";

/// Metadata written to `run.json` when a run begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub task_set_name: String,
    pub started_at: DateTime<Local>,
    pub tool: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub workspace: String,
    /// Filters the order was built with.
    #[serde(default)]
    pub filters: serde_json::Value,
    pub total_tasks: usize,
    /// Ids in execution order.
    #[serde(default)]
    pub tasks_to_execute: Vec<TaskId>,
    #[serde(default)]
    pub dry_run: bool,
}

/// An open run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: RunId,
    pub task_set_name: String,
    pub dir: PathBuf,
    pub dry_run: bool,
}

impl RunHandle {
    pub fn prompts_dir(&self) -> PathBuf {
        self.dir.join("prompts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }
}

/// Log files of one task inside a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub raw: PathBuf,
    pub clean: PathBuf,
    /// Raw log path relative to the run directory.
    pub relative: String,
}

/// Snapshot written to `live.json` for external dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub run_id: RunId,
    pub task_set_name: String,
    #[serde(default)]
    pub current_task: Option<TaskId>,
    /// 1-based position of the current task.
    pub position: usize,
    pub total: usize,
    pub counters: RunCounters,
    pub updated_at: DateTime<Local>,
}

/// A run found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub dir: PathBuf,
    pub metadata: RunMetadata,
    pub summary: Option<RunSummary>,
}

fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| StoreError::io(path, e))
}

/// Sole writer of a project's durable files.
#[derive(Debug, Clone)]
pub struct StateStore {
    project: String,
    project_dir: PathBuf,
}

impl StateStore {
    /// Open the project `project` under `projects_root`.
    pub fn open(projects_root: &Path, project: &str) -> Result<Self> {
        let project_dir = projects_root.join(project);
        if !project_dir.is_dir() {
            return Err(StoreError::NotFound(format!(
                "project '{}' in {}",
                project,
                projects_root.display()
            )));
        }
        Ok(Self {
            project: project.to_string(),
            project_dir,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn runtime_dir(&self) -> PathBuf {
        self.project_dir.join("runtime")
    }

    // ---- Project record ----

    /// Load `__init__.json`, or a fresh record if the project has none.
    pub fn load_project(&self) -> Result<ProjectRecord> {
        let path = self.project_dir.join(PROJECT_FILE);
        if !path.exists() {
            debug!(project = %self.project, "No project record, using defaults");
            return Ok(ProjectRecord::new(&self.project));
        }
        read_json(&path)
    }

    pub fn save_project(&self, project: &ProjectRecord) -> Result<()> {
        write_json(&self.project_dir.join(PROJECT_FILE), project)
    }

    // ---- Templates ----

    /// Resolve a template path relative to the project directory.
    pub fn template_path(&self, relative: &str) -> PathBuf {
        self.project_dir.join(relative)
    }

    /// The project's default template, if present.
    pub fn default_template(&self) -> Option<PathBuf> {
        let path = self.project_dir.join("templates").join("__init__.md");
        path.is_file().then_some(path)
    }

    pub fn read_template(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| StoreError::io(path, e))
    }

    // ---- Task sets ----

    fn task_set_path(&self, name: &str) -> PathBuf {
        self.project_dir.join(format!("{}{}", name, TASK_SET_SUFFIX))
    }

    /// Names of all task sets in the project, sorted.
    pub fn list_task_sets(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.project_dir).map_err(|e| StoreError::io(&self.project_dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(TASK_SET_SUFFIX).map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Load a task set with its last known statuses.
    pub fn load_task_set(&self, name: &str) -> Result<TaskSet> {
        let path = self.task_set_path(name);
        if !path.is_file() {
            return Err(StoreError::NotFound(format!("task set '{}'", name)));
        }
        let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        TaskSet::from_json(name, &text).map_err(|e| match e {
            ValidationError::MalformedTaskSet { name, reason } => {
                StoreError::MalformedTaskSet { name, reason }
            }
            other => StoreError::Invalid(other),
        })
    }

    /// Durably replace the task-set file.
    pub fn save_task_set(&self, set: &TaskSet) -> Result<()> {
        write_json(&self.task_set_path(&set.name), set)
    }

    /// Record that `id` is being dispatched. Durable before return.
    pub fn mark_in_progress(&self, set: &mut TaskSet, id: &TaskId) -> Result<()> {
        let task = set
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task '{}'", id)))?;
        task.status = TaskStatus::InProgress;
        self.save_task_set(set)
    }

    /// Fold an outcome into the task and persist it. Durable before return.
    pub fn commit_task_status(&self, set: &mut TaskSet, id: &TaskId, outcome: &TaskOutcome) -> Result<()> {
        let task = set
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task '{}'", id)))?;
        task.status = outcome.status;
        task.elapsed_seconds = Some(outcome.elapsed_seconds());
        task.last_run_at = Some(timestamp());
        self.save_task_set(set)?;
        debug!(task = %id, status = %outcome.status, "Task status committed");
        Ok(())
    }

    /// Reset the selected tasks and persist the result.
    pub fn reset_tasks(&self, set: &mut TaskSet, selector: &ResetSelector) -> Result<Vec<TaskId>> {
        let reset = set.reset(selector)?;
        if !reset.is_empty() {
            self.save_task_set(set)?;
        }
        info!(task_set = %set.name, count = reset.len(), "Tasks reset");
        Ok(reset)
    }

    // ---- Runs ----

    /// Create the run directory and write `run.json`.
    ///
    /// A real run also backs up the task-set file and repoints `latest`;
    /// a dry run does neither.
    pub fn begin_run(&self, set: &TaskSet, metadata: &RunMetadata) -> Result<RunHandle> {
        let dir_name = format!("{}__{}", metadata.run_id, set.name);
        let dir = self.runtime_dir().join("runs").join(&dir_name);
        create_dir(&dir.join("prompts"))?;
        create_dir(&dir.join("logs"))?;
        write_json(&dir.join("run.json"), metadata)?;

        if !metadata.dry_run {
            self.backup_task_set(&set.name, &metadata.run_id)?;
            if let Err(e) = self.point_latest(&dir_name) {
                warn!(error = %e, "Failed to update latest run pointer");
            }
        }

        info!(run_id = %metadata.run_id, dir = %dir.display(), dry_run = metadata.dry_run, "Run started");
        Ok(RunHandle {
            run_id: metadata.run_id.clone(),
            task_set_name: set.name.clone(),
            dir,
            dry_run: metadata.dry_run,
        })
    }

    fn backup_task_set(&self, name: &str, run_id: &RunId) -> Result<()> {
        let src = self.task_set_path(name);
        if !src.is_file() {
            return Ok(());
        }
        let backups = self.runtime_dir().join("backups");
        create_dir(&backups)?;
        let dst = backups.join(format!("{}_{}{}", name, run_id, TASK_SET_SUFFIX));
        let contents = fs::read(&src).map_err(|e| StoreError::io(&src, e))?;
        atomic_write(&dst, &contents)?;
        debug!(backup = %dst.display(), "Task set backed up");
        Ok(())
    }

    /// Swap `runtime/latest` to reference `runs/<dir_name>`.
    #[cfg(unix)]
    fn point_latest(&self, dir_name: &str) -> Result<()> {
        let runtime = self.runtime_dir();
        let latest = runtime.join("latest");
        let temp = runtime.join(format!(".latest.{}.tmp", uuid::Uuid::new_v4().simple()));
        let target = Path::new("runs").join(dir_name);

        std::os::unix::fs::symlink(&target, &temp).map_err(|e| StoreError::io(&temp, e))?;
        if let Err(e) = fs::rename(&temp, &latest) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::io(&latest, e));
        }
        Ok(())
    }

    /// Pointer file holding `runs/<dir_name>` where symlinks are unavailable.
    #[cfg(not(unix))]
    fn point_latest(&self, dir_name: &str) -> Result<()> {
        let latest = self.runtime_dir().join("latest");
        atomic_write(&latest, format!("runs/{}\n", dir_name).as_bytes())
    }

    /// The run directory `latest` refers to.
    pub fn latest_run_dir(&self) -> Option<PathBuf> {
        let runtime = self.runtime_dir();
        let latest = runtime.join("latest");
        let target = match fs::read_link(&latest) {
            Ok(target) => target,
            Err(_) => PathBuf::from(fs::read_to_string(&latest).ok()?.trim()),
        };
        let dir = runtime.join(target);
        dir.is_dir().then_some(dir)
    }

    /// Write the rendered prompt for `id`; returns its path.
    pub fn write_prompt(&self, handle: &RunHandle, id: &TaskId, text: &str) -> Result<PathBuf> {
        let path = handle
            .prompts_dir()
            .join(format!("{}_task.md", id.file_stem()));
        atomic_write(&path, text.as_bytes())?;
        Ok(path)
    }

    /// Raw and clean log paths for `id`.
    pub fn log_paths(&self, handle: &RunHandle, id: &TaskId) -> LogPaths {
        let stem = id.file_stem();
        LogPaths {
            raw: handle.logs_dir().join(format!("{}.log", stem)),
            clean: handle.logs_dir().join(format!("{}.clean.log", stem)),
            relative: format!("logs/{}.log", stem),
        }
    }

    /// Replace `live.json`.
    pub fn write_live_status(&self, handle: &RunHandle, status: &LiveStatus) -> Result<()> {
        write_json(&handle.dir.join("live.json"), status)
    }

    /// Write `summary.json` and, for real runs, append to the project history.
    pub fn finalize_run(&self, handle: &RunHandle, summary: &RunSummary) -> Result<()> {
        write_json(&handle.dir.join("summary.json"), summary)?;

        if !handle.dry_run {
            let mut project = self.load_project()?;
            let path = self.project_dir.join(PROJECT_FILE);
            project
                .push_run(&summary.to_record())
                .map_err(|source| StoreError::Json { path, source })?;
            self.save_project(&project)?;
        }

        info!(
            run_id = %handle.run_id,
            status = %summary.status,
            attempted = summary.counters.attempted,
            succeeded = summary.counters.succeeded,
            failed = summary.counters.failed,
            "Run finalized"
        );
        Ok(())
    }

    /// Runs with readable metadata, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        let runs_dir = self.runtime_dir().join("runs");
        if !runs_dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&runs_dir).map_err(|e| StoreError::io(&runs_dir, e))?;
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        dirs.reverse();

        let mut runs = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let metadata = match read_json::<RunMetadata>(&dir.join("run.json")) {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable run");
                    continue;
                }
            };
            let summary_path = dir.join("summary.json");
            let summary = if summary_path.exists() {
                read_json(&summary_path).ok()
            } else {
                None
            };
            runs.push(RunInfo {
                dir,
                metadata,
                summary,
            });
        }
        Ok(runs)
    }
}
