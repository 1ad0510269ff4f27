//! Session controller: drives one task set from order to finalized run.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use autorun_core::{
    build, ResetSelector, RunId, RunStatus, RunSummary, Task, TaskId, TaskOutcome, TaskResult,
    TaskSet, TaskStatus, ToolRegistry, DEFAULT_TOOL,
};
use autorun_exec::{find_program, ExecJob, Interrupt, Supervisor};
use autorun_store::{LiveStatus, RunHandle, RunMetadata, StateStore, StoreError};
use chrono::{DateTime, Local};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, ResolvedTool, Resolver, RunOverrides};
use crate::notify::{LogNotifier, Notification, Notifier};
use crate::render::{PromptRenderer, TemplateRenderer};
use crate::{EngineError, GitGuard, NotifyError};

/// One task of the plan with everything resolved.
#[derive(Debug, Clone)]
struct PlannedTask {
    id: TaskId,
    resolved: ResolvedTool,
    template: Option<PathBuf>,
    /// Cleared when the task's own tool is not installed.
    available: bool,
}

/// Validated, resolved work for one invocation.
#[derive(Debug)]
struct Plan {
    set: TaskSet,
    tasks: Vec<PlannedTask>,
    templates: HashMap<PathBuf, String>,
    workspace: Option<PathBuf>,
    tool: String,
    model: Option<String>,
    filters: serde_json::Value,
    /// Ambiguous `in-progress` tasks were asked for explicitly.
    run_in_progress: bool,
}

impl Plan {
    fn metadata(&self, run_id: RunId, started_at: DateTime<Local>, dry_run: bool) -> RunMetadata {
        RunMetadata {
            run_id,
            task_set_name: self.set.name.clone(),
            started_at,
            tool: self.tool.clone(),
            model: self.model.clone(),
            workspace: self
                .workspace
                .as_ref()
                .map(|w| w.display().to_string())
                .unwrap_or_default(),
            filters: self.filters.clone(),
            total_tasks: self.set.tasks.len(),
            tasks_to_execute: self.tasks.iter().map(|t| t.id.clone()).collect(),
            dry_run,
        }
    }

    fn template_text(&self, planned: &PlannedTask) -> Option<&str> {
        planned
            .template
            .as_ref()
            .and_then(|path| self.templates.get(path))
            .map(String::as_str)
    }

    /// Why a task in the order will not be dispatched, if it won't.
    fn skip_reason(&self, task: &Task) -> Option<&'static str> {
        match task.status {
            TaskStatus::Completed => Some("already completed"),
            TaskStatus::InProgress if !self.run_in_progress => {
                Some("left in-progress by an earlier run")
            }
            _ => None,
        }
    }
}

/// Prompt written by a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunEntry {
    pub task_id: TaskId,
    pub tool: String,
    pub model: Option<String>,
    pub prompt_file: PathBuf,
    pub command: String,
}

/// Result of a dry run.
#[derive(Debug, Clone, Default)]
pub struct DryRunReport {
    /// Run directory holding the prompts, `None` when nothing matched.
    pub run_dir: Option<PathBuf>,
    pub entries: Vec<DryRunEntry>,
    pub skipped: Vec<(TaskId, &'static str)>,
}

/// Orders, dispatches and records the tasks of a project.
pub struct SessionController {
    store: StateStore,
    config: EngineConfig,
    registry: ToolRegistry,
    supervisor: Box<dyn Supervisor>,
    renderer: Box<dyn PromptRenderer>,
    notifier: Box<dyn Notifier>,
    interrupt: Arc<Interrupt>,
}

impl SessionController {
    pub fn new(
        store: StateStore,
        config: EngineConfig,
        supervisor: Box<dyn Supervisor>,
        interrupt: Arc<Interrupt>,
    ) -> Self {
        Self {
            store,
            config,
            registry: ToolRegistry::builtin(),
            supervisor,
            renderer: Box::new(TemplateRenderer),
            notifier: Box::new(LogNotifier),
            interrupt,
        }
    }

    /// Builder method to replace the tool registry.
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Builder method to replace the prompt renderer.
    pub fn with_renderer(mut self, renderer: Box<dyn PromptRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Builder method to replace the notifier.
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Execute the task set.
    ///
    /// Validation, template, missing-tool and git-safety failures return
    /// before anything is written. Once the run has begun, only a persistence failure
    /// returns an error; the run is then finalized as `aborted`.
    pub async fn run(&self, task_set: &str, overrides: &RunOverrides) -> Result<RunSummary, EngineError> {
        let mut plan = self.plan(task_set, overrides)?;
        let started_at = Local::now();
        let run_id = RunId::from_time(started_at);

        if plan.tasks.is_empty() {
            info!(task_set = %task_set, "No tasks match the filters, nothing to run");
            let mut summary = RunSummary::new(run_id, task_set, started_at);
            summary.finish(RunStatus::Completed, Local::now());
            return Ok(summary);
        }

        if self.config.check_tools {
            self.check_tools(&mut plan)?;
        }

        if self.config.git_safety {
            let workspace = plan.workspace.clone().unwrap_or_else(|| PathBuf::from("."));
            GitGuard::new(workspace).protect().await?;
        }

        let handle = self
            .store
            .begin_run(&plan.set, &plan.metadata(run_id.clone(), started_at, false))?;
        let mut summary = RunSummary::new(run_id, task_set, started_at);

        info!(
            run_id = %handle.run_id,
            task_set = %task_set,
            tasks = plan.tasks.len(),
            tool = %plan.tool,
            supervisor = self.supervisor.name(),
            "Starting run"
        );

        if let Err(e) = self.execute_plan(&mut plan, &handle, &mut summary).await {
            error!(run_id = %handle.run_id, error = %e, "Persistence failed, aborting run");
            summary.finish(RunStatus::Aborted, Local::now());
            if let Err(e) = self.store.finalize_run(&handle, &summary) {
                warn!(error = %e, "Failed to finalize aborted run");
            }
            return Err(EngineError::Persistence(e));
        }

        let status = if self.interrupt.is_requested() {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        summary.finish(status, Local::now());
        self.store.finalize_run(&handle, &summary)?;

        self.notify(Notification::RunFinished {
            summary: summary.clone(),
            total: plan.tasks.len(),
        })
        .await;
        Ok(summary)
    }

    async fn execute_plan(
        &self,
        plan: &mut Plan,
        handle: &RunHandle,
        summary: &mut RunSummary,
    ) -> Result<(), StoreError> {
        let total = plan.tasks.len();

        for (index, planned) in plan.tasks.iter().enumerate() {
            if self.interrupt.is_requested() {
                info!("Interrupt requested, no further tasks will be dispatched");
                break;
            }

            let Some(task) = plan.set.get(&planned.id).cloned() else {
                continue;
            };
            if let Some(reason) = plan.skip_reason(&task) {
                if task.status == TaskStatus::InProgress {
                    warn!(task = %task.id, "Skipping task {}; reset it or select in-progress to run it", reason);
                } else {
                    info!(task = %task.id, "Skipping task, {}", reason);
                }
                summary.counters.skip();
                continue;
            }

            if !planned.available {
                warn!(
                    task = %planned.id,
                    tool = %planned.resolved.tool.name,
                    program = %planned.resolved.tool.program,
                    "Agent program not found, failing task"
                );
                let outcome = TaskOutcome::spawn_error();
                self.store.commit_task_status(&mut plan.set, &planned.id, &outcome)?;
                summary.record(TaskResult::from_outcome(planned.id.clone(), &outcome, None), &outcome);
                continue;
            }

            self.publish_live(handle, summary, Some(&planned.id), index + 1, total);
            self.store.mark_in_progress(&mut plan.set, &planned.id)?;

            let prompt = self.renderer.render(plan.template_text(planned), &task);
            let prompt_file = self.store.write_prompt(handle, &planned.id, &prompt)?;
            let logs = self.store.log_paths(handle, &planned.id);
            let resolved = &planned.resolved;

            let args = resolved.tool.command_args(
                resolved.model.as_deref(),
                &prompt,
                &prompt_file.to_string_lossy(),
            );
            let mut job = ExecJob::new(
                planned.id.clone(),
                resolved.tool.program.clone(),
                logs.raw.clone(),
                logs.clean.clone(),
            )
            .with_args(args)
            .with_proxy(resolved.use_proxy);
            if let Some(workspace) = &plan.workspace {
                job = job.with_working_dir(workspace);
            }

            info!(
                task = %planned.id,
                name = %task.name,
                position = index + 1,
                total,
                tool = %resolved.tool.name,
                model = ?resolved.model,
                proxy = resolved.use_proxy,
                "Dispatching task"
            );
            let outcome = self.supervisor.execute(&job).await;

            self.store.commit_task_status(&mut plan.set, &planned.id, &outcome)?;
            summary.record(
                TaskResult::from_outcome(planned.id.clone(), &outcome, Some(logs.relative.clone())),
                &outcome,
            );
            self.publish_live(handle, summary, None, index + 1, total);

            let stats = plan.set.stats();
            match outcome.status {
                TaskStatus::Interrupted => {
                    self.notify(Notification::Interrupted {
                        task_set: plan.set.name.clone(),
                        task: Some(planned.id.clone()),
                        done: stats.completed,
                        total: stats.total,
                    })
                    .await;
                    break;
                }
                TaskStatus::Completed => {
                    if self.config.notify_each {
                        self.notify(Notification::TaskCompleted {
                            task_set: plan.set.name.clone(),
                            task: planned.id.clone(),
                            name: task.name.clone(),
                            outcome: outcome.clone(),
                            done: stats.completed,
                            total: stats.total,
                        })
                        .await;
                    }
                }
                _ => {
                    self.notify(Notification::TaskFailed {
                        task_set: plan.set.name.clone(),
                        task: planned.id.clone(),
                        name: task.name.clone(),
                        tool: resolved.tool.name.clone(),
                        model: resolved.model.clone(),
                        outcome: outcome.clone(),
                        log_file: logs.raw.display().to_string(),
                    })
                    .await;
                }
            }

            if index + 1 < total && outcome.is_success() {
                self.pause().await;
            }
        }
        Ok(())
    }

    /// Render and write every prompt without executing or changing any status.
    pub fn dry_run(&self, task_set: &str, overrides: &RunOverrides) -> Result<DryRunReport, EngineError> {
        let plan = self.plan(task_set, overrides)?;
        if plan.tasks.is_empty() {
            info!(task_set = %task_set, "No tasks match the filters");
            return Ok(DryRunReport::default());
        }

        let started_at = Local::now();
        let run_id = RunId::from_time(started_at);
        let handle = self
            .store
            .begin_run(&plan.set, &plan.metadata(run_id.clone(), started_at, true))?;

        let mut report = DryRunReport {
            run_dir: Some(handle.dir.clone()),
            ..Default::default()
        };
        for planned in &plan.tasks {
            let Some(task) = plan.set.get(&planned.id) else {
                continue;
            };
            if let Some(reason) = plan.skip_reason(task) {
                report.skipped.push((planned.id.clone(), reason));
                continue;
            }

            let prompt = self.renderer.render(plan.template_text(planned), task);
            let prompt_file = self.store.write_prompt(&handle, &planned.id, &prompt)?;
            let resolved = &planned.resolved;
            let args = resolved.tool.command_args(
                resolved.model.as_deref(),
                &prompt,
                &prompt_file.to_string_lossy(),
            );
            let logs = self.store.log_paths(&handle, &planned.id);
            let command = ExecJob::new(planned.id.clone(), resolved.tool.program.clone(), logs.raw, logs.clean)
                .with_args(args)
                .display_command();

            debug!(task = %planned.id, prompt_file = %prompt_file.display(), "Prompt written");
            report.entries.push(DryRunEntry {
                task_id: planned.id.clone(),
                tool: resolved.tool.name.clone(),
                model: resolved.model.clone(),
                prompt_file,
                command,
            });
        }

        let mut summary = RunSummary::new(run_id, task_set, started_at);
        summary.finish(RunStatus::Completed, Local::now());
        self.store.finalize_run(&handle, &summary)?;

        info!(
            task_set = %task_set,
            prompts = report.entries.len(),
            skipped = report.skipped.len(),
            dir = %handle.dir.display(),
            "Dry run finished"
        );
        Ok(report)
    }

    /// Reset the selected tasks to `not-started`; returns their ids.
    pub fn reset(&self, task_set: &str, selector: &ResetSelector) -> Result<Vec<TaskId>, EngineError> {
        let mut set = self.store.load_task_set(task_set)?;
        Ok(self.store.reset_tasks(&mut set, selector)?)
    }

    fn plan(&self, task_set: &str, overrides: &RunOverrides) -> Result<Plan, EngineError> {
        let project = self.store.load_project()?;
        let set = self.store.load_task_set(task_set)?;
        let resolver = Resolver::new(
            &self.registry,
            overrides,
            project.default_tool.as_deref(),
            project.default_model.as_deref(),
            self.config.proxy,
        )?;

        let order = build(&set.tasks, &overrides.filter)?;
        let mut templates = HashMap::new();
        let mut tasks = Vec::with_capacity(order.len());
        for task in order {
            let template = task
                .prompt
                .as_deref()
                .or(overrides.template.as_deref())
                .or(set.template.as_deref())
                .map(|path| self.store.template_path(path))
                .or_else(|| self.store.default_template());

            if let Some(path) = &template {
                if let Entry::Vacant(slot) = templates.entry(path.clone()) {
                    slot.insert(self.store.read_template(path)?);
                }
            }

            tasks.push(PlannedTask {
                id: task.id.clone(),
                resolved: resolver.resolve(task)?,
                template,
                available: true,
            });
        }

        let workspace = overrides.workspace.clone().or_else(|| {
            (!project.workspace.is_empty()).then(|| PathBuf::from(&project.workspace))
        });
        let filter = &overrides.filter;

        Ok(Plan {
            tool: overrides
                .tool
                .clone()
                .or_else(|| project.default_tool.clone())
                .unwrap_or_else(|| DEFAULT_TOOL.to_string()),
            model: overrides.model.clone().or_else(|| project.default_model.clone()),
            filters: json!({
                "batch": filter.batch,
                "start_from": filter.start_from,
                "retry_failed": filter.retry_failed,
                "statuses": filter.statuses,
                "max_priority": filter.max_priority,
            }),
            run_in_progress: filter.names_status(TaskStatus::InProgress),
            set,
            tasks,
            templates,
            workspace,
        })
    }

    /// The session tool must be installed; a task that overrides it with a
    /// missing tool is only marked unavailable.
    fn check_tools(&self, plan: &mut Plan) -> Result<(), EngineError> {
        let session = self.registry.require(&plan.tool)?;
        if find_program(&session.program).is_none() {
            return Err(EngineError::Config(format!(
                "tool '{}' is not installed: '{}' not found on PATH",
                session.name, session.program
            )));
        }

        for planned in plan.tasks.iter_mut() {
            if planned.resolved.tool.name == plan.tool {
                continue;
            }
            planned.available = find_program(&planned.resolved.tool.program).is_some();
            if !planned.available {
                warn!(
                    task = %planned.id,
                    tool = %planned.resolved.tool.name,
                    "Tool for this task is not installed, it will be marked failed"
                );
            }
        }
        Ok(())
    }

    fn publish_live(
        &self,
        handle: &RunHandle,
        summary: &RunSummary,
        current: Option<&TaskId>,
        position: usize,
        total: usize,
    ) {
        let status = LiveStatus {
            run_id: handle.run_id.clone(),
            task_set_name: handle.task_set_name.clone(),
            current_task: current.cloned(),
            position,
            total,
            counters: summary.counters,
            updated_at: Local::now(),
        };
        if let Err(e) = self.store.write_live_status(handle, &status) {
            warn!(error = %e, "Failed to update live status");
        }
    }

    /// Inter-task delay; returns early on interrupt.
    async fn pause(&self) {
        let delay = self.config.delay.sample();
        if delay.is_zero() {
            return;
        }
        info!(delay_secs = delay.as_secs(), "Waiting before next task");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.interrupt.wait() => debug!("Delay cut short by interrupt"),
        }
    }

    async fn notify(&self, notification: Notification) {
        let channel = self.notifier.name().to_string();
        let sent = tokio::time::timeout(self.config.notify_timeout, self.notifier.send(&notification))
            .await
            .unwrap_or(Err(NotifyError::Timeout(channel)));
        if let Err(e) = sent {
            warn!(error = %e, "Notification not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayPolicy;
    use async_trait::async_trait;
    use autorun_core::{FailureReason, TaskOutcome};
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns scripted outcomes and records every job it was handed.
    #[derive(Default)]
    struct ScriptedSupervisor {
        outcomes: Mutex<VecDeque<TaskOutcome>>,
        jobs: Arc<Mutex<Vec<ExecJob>>>,
        /// Signal this interrupt while executing.
        interrupt: Option<Arc<Interrupt>>,
        /// Replace this file with a directory while executing, so the next
        /// save over it fails.
        block_file: Option<PathBuf>,
    }

    #[async_trait]
    impl Supervisor for ScriptedSupervisor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, job: &ExecJob) -> TaskOutcome {
            self.jobs.lock().unwrap().push(job.clone());
            if let Some(interrupt) = &self.interrupt {
                interrupt.signal();
            }
            if let Some(path) = self.block_file.as_ref().filter(|p| p.is_file()) {
                fs::remove_file(path).unwrap();
                fs::create_dir(path).unwrap();
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| TaskOutcome::completed(Duration::from_secs(30)))
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        dir: PathBuf,
        jobs: Arc<Mutex<Vec<ExecJob>>>,
        interrupt: Arc<Interrupt>,
        controller: SessionController,
    }

    impl Fixture {
        fn job_ids(&self) -> Vec<String> {
            self.jobs
                .lock()
                .unwrap()
                .iter()
                .map(|j| j.task_id.to_string())
                .collect()
        }

        fn statuses(&self) -> Vec<(String, TaskStatus)> {
            let set = self.controller.store().load_task_set("fixes").unwrap();
            set.tasks
                .iter()
                .map(|t| (t.id.to_string(), t.status))
                .collect()
        }
    }

    fn fixture(tasks: &str, outcomes: Vec<TaskOutcome>, interrupt_during_task: bool) -> Fixture {
        fixture_with(tasks, outcomes, interrupt_during_task, EngineConfig {
            delay: DelayPolicy::None,
            check_tools: false,
            ..Default::default()
        })
    }

    fn fixture_with(
        tasks: &str,
        outcomes: Vec<TaskOutcome>,
        interrupt_during_task: bool,
        config: EngineConfig,
    ) -> Fixture {
        fixture_full(tasks, outcomes, interrupt_during_task, config, ToolRegistry::builtin(), false)
    }

    fn fixture_full(
        tasks: &str,
        outcomes: Vec<TaskOutcome>,
        interrupt_during_task: bool,
        config: EngineConfig,
        registry: ToolRegistry,
        block_task_set: bool,
    ) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("demo");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("__init__.json"), r#"{ "project": "demo", "default_tool": "kimi" }"#).unwrap();
        fs::write(dir.join("fixes.tasks.json"), format!(r#"{{ "tasks": {} }}"#, tasks)).unwrap();

        let interrupt = Arc::new(Interrupt::new());
        let jobs = Arc::new(Mutex::new(Vec::new()));
        let supervisor = ScriptedSupervisor {
            outcomes: Mutex::new(outcomes.into()),
            jobs: jobs.clone(),
            interrupt: interrupt_during_task.then(|| interrupt.clone()),
            block_file: block_task_set.then(|| dir.join("fixes.tasks.json")),
        };
        let store = StateStore::open(root.path(), "demo").unwrap();
        let controller = SessionController::new(store, config, Box::new(supervisor), interrupt.clone())
            .with_registry(registry);

        Fixture {
            _root: root,
            dir,
            jobs,
            interrupt,
            controller,
        }
    }

    const THREE: &str = r#"[
        { "task_no": "A", "task_name": "first", "priority": 50 },
        { "task_no": "B", "task_name": "second", "priority": 10 },
        { "task_no": "C", "task_name": "third", "batch": 2 }
    ]"#;

    #[tokio::test]
    async fn test_run_executes_in_order() {
        let fx = fixture(THREE, vec![], false);
        let summary = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap();

        assert_eq!(fx.job_ids(), ["B", "A", "C"]);
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.counters.attempted, 3);
        assert_eq!(summary.counters.succeeded, 3);
        assert!(fx.statuses().iter().all(|(_, s)| *s == TaskStatus::Completed));

        let jobs = fx.jobs.lock().unwrap();
        assert_eq!(jobs[0].program, "kimi");
        assert!(!jobs[0].use_proxy);
        assert!(jobs[0].raw_log.ends_with("logs/B.log"));

        let runs = fx.controller.store().list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].dir.join("prompts/A_task.md").is_file());
        assert!(runs[0].dir.join("live.json").is_file());
        assert_eq!(runs[0].metadata.tasks_to_execute.len(), 3);

        let project = fx.controller.store().load_project().unwrap();
        assert_eq!(project.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_completed() {
        let tasks = r#"[
            { "task_no": "A", "status": "completed" },
            { "task_no": "B", "status": "failed" },
            { "task_no": "C" }
        ]"#;
        let fx = fixture(tasks, vec![], false);
        let summary = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap();

        assert_eq!(fx.job_ids(), ["B", "C"]);
        assert_eq!(summary.counters.skipped, 1);
        assert_eq!(summary.counters.attempted, 2);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_run_continues() {
        let outcomes = vec![TaskOutcome::failed(
            FailureReason::NonzeroExit,
            Duration::from_secs(40),
            Some(2),
        )];
        let fx = fixture(THREE, outcomes, false);
        let summary = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.counters.failed, 1);
        assert_eq!(summary.results[0].failure_reason, Some(FailureReason::NonzeroExit));
        assert_eq!(
            fx.statuses(),
            [
                ("A".to_string(), TaskStatus::Completed),
                ("B".to_string(), TaskStatus::Failed),
                ("C".to_string(), TaskStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_interrupt_stops_dispatch() {
        let outcomes = vec![TaskOutcome::interrupted(Duration::from_secs(3))];
        let fx = fixture(THREE, outcomes, true);
        let summary = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap();

        assert_eq!(fx.job_ids(), ["B"]);
        assert_eq!(summary.status, RunStatus::Interrupted);
        let statuses = fx.statuses();
        assert_eq!(statuses[0].1, TaskStatus::NotStarted);
        assert_eq!(statuses[1].1, TaskStatus::Interrupted);

        let project = fx.controller.store().load_project().unwrap();
        assert_eq!(project.runs()[0].status, RunStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_delay_wakes_on_interrupt() {
        let config = EngineConfig {
            delay: DelayPolicy::Fixed(Duration::from_secs(3600)),
            check_tools: false,
            ..Default::default()
        };
        let fx = fixture_with(THREE, vec![], false, config);
        let interrupt = fx.interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            interrupt.signal();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            fx.controller.run("fixes", &RunOverrides::default()),
        )
        .await
        .expect("delay was cut short")
        .unwrap();

        assert_eq!(fx.job_ids(), ["B"]);
        assert_eq!(summary.status, RunStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_in_progress_needs_explicit_selection() {
        let tasks = r#"[
            { "task_no": "A", "status": "in-progress" },
            { "task_no": "B" }
        ]"#;
        let fx = fixture(tasks, vec![], false);
        fx.controller.run("fixes", &RunOverrides::default()).await.unwrap();
        assert_eq!(fx.job_ids(), ["B"]);
        assert_eq!(fx.statuses()[0].1, TaskStatus::InProgress);

        let overrides = RunOverrides {
            filter: autorun_core::OrderFilter {
                statuses: vec![TaskStatus::InProgress],
                ..Default::default()
            },
            ..Default::default()
        };
        fx.controller.run("fixes", &overrides).await.unwrap();
        assert_eq!(fx.job_ids(), ["B", "A"]);
    }

    #[tokio::test]
    async fn test_validation_failure_has_no_side_effects() {
        let tasks = r#"[
            { "task_no": "A", "depends_on": "B" },
            { "task_no": "B" }
        ]"#;
        let fx = fixture(tasks, vec![], false);
        let err = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert!(fx.job_ids().is_empty());
        assert!(!fx.dir.join("runtime").exists());
    }

    #[tokio::test]
    async fn test_unknown_cli_tool_rejected() {
        let fx = fixture(THREE, vec![], false);
        let overrides = RunOverrides {
            tool: Some("gemini".to_string()),
            ..Default::default()
        };
        let err = fx.controller.run("fixes", &overrides).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_git_safety_failure_has_no_side_effects() {
        let config = EngineConfig {
            git_safety: true,
            delay: DelayPolicy::None,
            check_tools: false,
            ..Default::default()
        };
        let fx = fixture_with(THREE, vec![], false, config);
        let workspace = tempfile::tempdir().unwrap();
        let overrides = RunOverrides {
            workspace: Some(workspace.path().to_path_buf()),
            ..Default::default()
        };

        let err = fx.controller.run("fixes", &overrides).await.unwrap_err();
        assert!(matches!(err, EngineError::GitSafety(_)));
        assert!(fx.job_ids().is_empty());
        assert!(!fx.dir.join("runtime").exists());
    }

    #[tokio::test]
    async fn test_commit_failure_aborts_run() {
        let config = EngineConfig {
            delay: DelayPolicy::None,
            check_tools: false,
            ..Default::default()
        };
        let fx = fixture_full(THREE, vec![], false, config, ToolRegistry::builtin(), true);
        let err = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap_err();

        assert!(matches!(err, EngineError::Persistence(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(fx.job_ids(), ["B"]);

        let run_dir = fx.controller.store().latest_run_dir().unwrap();
        let summary = fs::read_to_string(run_dir.join("summary.json")).unwrap();
        assert!(summary.contains("\"aborted\""));

        let runs = fx.controller.store().list_runs().unwrap();
        assert_eq!(runs[0].summary.as_ref().unwrap().status, RunStatus::Aborted);
        let project = fx.controller.store().load_project().unwrap();
        assert_eq!(project.runs()[0].status, RunStatus::Aborted);
    }

    #[cfg(unix)]
    fn registry_with(tools: &[(&str, &str)]) -> ToolRegistry {
        use autorun_core::ToolSpec;
        tools.iter().fold(ToolRegistry::builtin(), |registry, (name, program)| {
            registry.with_tool(ToolSpec::new(*name, *program).with_args(["-c", "true"]))
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_session_tool_fails_before_run() {
        let config = EngineConfig {
            delay: DelayPolicy::None,
            ..Default::default()
        };
        let registry = registry_with(&[("kimi", "/nonexistent/bin/kimi")]);
        let fx = fixture_full(THREE, vec![], false, config, registry, false);

        let err = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(err.exit_code(), 1);
        assert!(fx.job_ids().is_empty());
        assert!(!fx.dir.join("runtime").exists());
        assert!(fx.statuses().iter().all(|(_, s)| *s == TaskStatus::NotStarted));

        let report = fx.controller.dry_run("fixes", &RunOverrides::default()).unwrap();
        assert_eq!(report.entries.len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_task_tool_fails_only_that_task() {
        let tasks = r#"[
            { "task_no": "A", "cli": { "tool": "ghost" } },
            { "task_no": "B" }
        ]"#;
        let config = EngineConfig {
            delay: DelayPolicy::None,
            ..Default::default()
        };
        let registry = registry_with(&[("kimi", "/bin/sh"), ("ghost", "/nonexistent/bin/ghost")]);
        let fx = fixture_full(tasks, vec![], false, config, registry, false);

        let summary = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap();
        assert_eq!(fx.job_ids(), ["B"]);
        assert_eq!(summary.counters.failed, 1);
        assert_eq!(summary.counters.succeeded, 1);
        assert_eq!(summary.results[0].failure_reason, Some(FailureReason::SpawnError));
        assert_eq!(
            fx.statuses(),
            [
                ("A".to_string(), TaskStatus::Failed),
                ("B".to_string(), TaskStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_template_resolution() {
        let tasks = r#"[
            { "task_no": "A", "task_name": "alpha", "prompt": "templates/special.md" },
            { "task_no": "B", "task_name": "beta" }
        ]"#;
        let fx = fixture(tasks, vec![], false);
        fs::create_dir_all(fx.dir.join("templates")).unwrap();
        fs::write(fx.dir.join("templates/special.md"), "special {{task_name}}").unwrap();
        fs::write(fx.dir.join("templates/__init__.md"), "default {{task_no}}").unwrap();

        let report = fx.controller.dry_run("fixes", &RunOverrides::default()).unwrap();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(fs::read_to_string(&report.entries[0].prompt_file).unwrap(), "special alpha");
        assert_eq!(fs::read_to_string(&report.entries[1].prompt_file).unwrap(), "default B");
        assert!(report.entries[0].command.starts_with("kimi --quiet --yolo -p special alpha"));
    }

    #[tokio::test]
    async fn test_missing_template_fails_before_run() {
        let tasks = r#"[{ "task_no": "A", "prompt": "templates/missing.md" }]"#;
        let fx = fixture(tasks, vec![], false);
        let err = fx.controller.run("fixes", &RunOverrides::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert!(!fx.dir.join("runtime").exists());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let tasks = r#"[
            { "task_no": "A", "status": "completed" },
            { "task_no": "B" }
        ]"#;
        let fx = fixture(tasks, vec![], false);
        let report = fx.controller.dry_run("fixes", &RunOverrides::default()).unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.skipped, [(TaskId::new("A"), "already completed")]);
        assert!(report.run_dir.unwrap().join("summary.json").is_file());
        assert!(fx.job_ids().is_empty());
        assert_eq!(fx.statuses()[1].1, TaskStatus::NotStarted);
        assert!(fx.controller.store().load_project().unwrap().run_record.is_empty());
        assert!(fx.controller.store().latest_run_dir().is_none());
    }

    #[tokio::test]
    async fn test_reset_then_rerun() {
        let tasks = r#"[
            { "task_no": "A", "status": "completed" },
            { "task_no": "B", "status": "completed" }
        ]"#;
        let fx = fixture(tasks, vec![], false);

        let reset = fx
            .controller
            .reset("fixes", &ResetSelector {
                from: Some(TaskId::new("B")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(reset, [TaskId::new("B")]);

        fx.controller.run("fixes", &RunOverrides::default()).await.unwrap();
        assert_eq!(fx.job_ids(), ["B"]);

        let err = fx
            .controller
            .reset("fixes", &ResetSelector {
                from: Some(TaskId::new("Z")),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_empty_selection_is_a_no_op() {
        let tasks = r#"[{ "task_no": "A", "status": "completed" }]"#;
        let fx = fixture(tasks, vec![], false);
        let overrides = RunOverrides {
            filter: autorun_core::OrderFilter {
                retry_failed: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let summary = fx.controller.run("fixes", &overrides).await.unwrap();
        assert_eq!(summary.counters.attempted, 0);
        assert!(!fx.dir.join("runtime").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_end_to_end_with_shell_agent() {
        use autorun_core::ToolSpec;
        use autorun_exec::{ExecPolicy, PipeSupervisor};

        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("demo");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("fixes.tasks.json"),
            r#"{ "tasks": [{ "task_no": "S-1", "task_name": "say hello", "cli": { "tool": "sh" } }] }"#,
        )
        .unwrap();

        let config = EngineConfig {
            exec: ExecPolicy::default().with_floor(Duration::ZERO).quiet(),
            delay: DelayPolicy::None,
            ..Default::default()
        };
        let interrupt = Arc::new(Interrupt::new());
        let supervisor = PipeSupervisor::new(config.exec.clone(), interrupt.clone());
        let registry = ToolRegistry::builtin()
            .with_tool(ToolSpec::new("sh", "/bin/sh").with_args(["-c", "cat \"$0\"", "{prompt_file}"]));
        let store = StateStore::open(root.path(), "demo").unwrap();
        let controller = SessionController::new(store, config, Box::new(supervisor), interrupt)
            .with_registry(registry);

        let overrides = RunOverrides {
            tool: Some("sh".to_string()),
            ..Default::default()
        };
        let summary = controller.run("fixes", &overrides).await.unwrap();
        assert_eq!(summary.counters.succeeded, 1);

        let run_dir = controller.store().latest_run_dir().unwrap();
        let clean = fs::read_to_string(run_dir.join("logs/S-1.clean.log")).unwrap();
        assert!(clean.contains("\"task_name\": \"say hello\""));
    }
}
