//! autorun CLI - batch-drive command-line AI agents over a task set.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use autorun_core::{OrderFilter, ResetSelector, RunStatus, TaskId, TaskStatus};
use autorun_engine::{
    DelayPolicy, EngineConfig, EngineError, ProxyMode, RunOverrides, SessionController,
};
use autorun_exec::{
    format_elapsed, select_supervisor, ExecPolicy, Interrupt, InterruptLevel, PipeSupervisor,
    Supervisor,
};
use autorun_store::StateStore;

/// Exit status when a run stopped on an interrupt.
const EXIT_INTERRUPTED: u8 = 130;

/// autorun - run AI agent CLIs over a task set, one task at a time
#[derive(Parser)]
#[command(name = "autorun")]
#[command(about = "Run command-line AI agents over a task set", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding one subdirectory per project
    #[arg(long, env = "AUTORUN_PROJECTS_ROOT", default_value = "projects", global = true)]
    projects_root: PathBuf,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the tasks of a task set
    Run(RunArgs),

    /// Render and save every prompt without executing anything
    #[command(name = "dry-run")]
    DryRun(RunArgs),

    /// Reset tasks to not-started
    Reset(ResetArgs),

    /// Show task sets, tasks and recent runs of a project
    List {
        /// Project name
        project: String,

        /// Show the tasks of this set
        task_set: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Project name
    project: String,

    /// Task set name (file `<name>.tasks.json`)
    task_set: String,

    /// Agent tool (kimi, agent, copilot, claude)
    #[arg(long)]
    tool: Option<String>,

    /// Model passed to the tool
    #[arg(long)]
    model: Option<String>,

    /// Prompt template, relative to the project directory
    #[arg(long)]
    template: Option<String>,

    /// Only run this batch
    #[arg(long)]
    batch: Option<u32>,

    /// Start from this task id
    #[arg(long)]
    start: Option<String>,

    /// Only run failed and interrupted tasks
    #[arg(long)]
    retry_failed: bool,

    /// Only run tasks in this status (repeatable)
    #[arg(long = "status", value_parser = parse_status)]
    statuses: Vec<TaskStatus>,

    /// Only run tasks with priority at most this
    #[arg(long)]
    max_priority: Option<i32>,

    /// Delay between tasks in seconds: N, MIN-MAX or 0
    #[arg(long, default_value = "60-120")]
    delay: String,

    /// Per-task time limit in seconds
    #[arg(long, default_value = "2400")]
    timeout: u64,

    /// Successful exits faster than this many seconds count as failures
    #[arg(long, default_value = "10")]
    min_duration: u64,

    /// Seconds between heartbeat log lines, 0 to disable
    #[arg(long, default_value = "60")]
    heartbeat: u64,

    /// Require a git workspace and tag it before running
    #[arg(long)]
    git_safety: bool,

    /// Keep proxy variables for every tool
    #[arg(long, conflicts_with = "no_proxy")]
    proxy: bool,

    /// Strip proxy variables for every tool
    #[arg(long)]
    no_proxy: bool,

    /// Directory the agents run in (defaults to the project's workspace)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Do not echo agent output or set the terminal title
    #[arg(long, short)]
    quiet: bool,

    /// Notify after every successful task
    #[arg(long)]
    notify_each: bool,
}

impl RunArgs {
    fn engine_config(&self) -> Result<EngineConfig, EngineError> {
        let mut exec = ExecPolicy::default()
            .with_floor(Duration::from_secs(self.min_duration))
            .with_ceiling(Duration::from_secs(self.timeout))
            .with_heartbeat(Duration::from_secs(self.heartbeat));
        if self.quiet {
            exec = exec.quiet();
        }

        let proxy = if self.proxy {
            ProxyMode::ForceOn
        } else if self.no_proxy {
            ProxyMode::ForceOff
        } else {
            ProxyMode::Auto
        };

        Ok(EngineConfig {
            exec,
            delay: self.delay.parse::<DelayPolicy>()?,
            proxy,
            git_safety: self.git_safety,
            notify_each: self.notify_each,
            ..Default::default()
        })
    }

    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            tool: self.tool.clone(),
            model: self.model.clone(),
            template: self.template.clone(),
            workspace: self.workspace.clone(),
            filter: OrderFilter {
                batch: self.batch,
                start_from: self.start.clone().map(TaskId::new),
                retry_failed: self.retry_failed,
                statuses: self.statuses.clone(),
                max_priority: self.max_priority,
            },
        }
    }
}

#[derive(Args, Debug)]
struct ResetArgs {
    /// Project name
    project: String,

    /// Task set name
    task_set: String,

    /// Reset every task
    #[arg(long)]
    all: bool,

    /// Reset tasks in this status (repeatable)
    #[arg(long = "status", value_parser = parse_status)]
    statuses: Vec<TaskStatus>,

    /// Reset this task and every task after it
    #[arg(long)]
    from: Option<String>,

    /// Restrict the reset to one batch
    #[arg(long)]
    batch: Option<u32>,
}

impl ResetArgs {
    fn selector(&self) -> ResetSelector {
        ResetSelector {
            all: self.all,
            statuses: self.statuses.clone(),
            from: self.from.clone().map(TaskId::new),
            batch: self.batch,
        }
    }
}

fn parse_status(value: &str) -> Result<TaskStatus, String> {
    value.parse().map_err(|e: autorun_core::ValidationError| {
        let known: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
        format!("{} (expected one of: {})", e, known.join(", "))
    })
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// First Ctrl-C stops the current task gracefully; the second kills the
/// agent and exits immediately.
fn install_interrupt_handler(interrupt: Arc<Interrupt>) {
    let result = ctrlc::set_handler(move || match interrupt.signal() {
        InterruptLevel::Requested => {
            eprintln!("\nautorun: interrupt received, stopping the current task (Ctrl-C again to force quit)");
        }
        InterruptLevel::Forced => {
            interrupt.kill_tracked_child();
            eprintln!("\nautorun: force quit");
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });
    if let Err(e) = result {
        warn!(error = %e, "Failed to install interrupt handler");
    }
}

fn controller(
    root: &Path,
    project: &str,
    config: EngineConfig,
    supervisor: Box<dyn Supervisor>,
    interrupt: Arc<Interrupt>,
) -> Result<SessionController, EngineError> {
    let store = StateStore::open(root, project)?;
    Ok(SessionController::new(store, config, supervisor, interrupt))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "autorun failed");
            eprintln!("autorun: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode, EngineError> {
    let interrupt = Arc::new(Interrupt::new());

    match cli.command {
        Commands::Run(args) => {
            let config = args.engine_config()?;
            install_interrupt_handler(interrupt.clone());
            let supervisor = select_supervisor(config.exec.clone(), interrupt.clone());
            let controller = controller(&cli.projects_root, &args.project, config, supervisor, interrupt)?;

            let summary = controller.run(&args.task_set, &args.overrides()).await?;
            println!(
                "Run {} {}: {} attempted, {} succeeded, {} failed, {} skipped ({})",
                summary.run_id,
                summary.status,
                summary.counters.attempted,
                summary.counters.succeeded,
                summary.counters.failed,
                summary.counters.skipped,
                format_elapsed(Duration::from_secs_f64(summary.duration_seconds())),
            );
            if summary.status == RunStatus::Interrupted {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
        }

        Commands::DryRun(args) => {
            let config = args.engine_config()?;
            let supervisor = Box::new(PipeSupervisor::new(config.exec.clone(), interrupt.clone()));
            let controller = controller(&cli.projects_root, &args.project, config, supervisor, interrupt)?;

            let report = controller.dry_run(&args.task_set, &args.overrides())?;
            for entry in &report.entries {
                println!(
                    "{:<16}  {:<8}  {:<20}  {}",
                    entry.task_id.as_str(),
                    entry.tool,
                    entry.model.as_deref().unwrap_or("-"),
                    entry.prompt_file.display()
                );
            }
            for (id, reason) in &report.skipped {
                println!("{:<16}  skipped: {}", id.as_str(), reason);
            }
            match &report.run_dir {
                Some(dir) => println!("{} prompt(s) written to {}", report.entries.len(), dir.display()),
                None => println!("No tasks match the filters"),
            }
        }

        Commands::Reset(args) => {
            let supervisor = Box::new(PipeSupervisor::new(ExecPolicy::default(), interrupt.clone()));
            let controller = controller(
                &cli.projects_root,
                &args.project,
                EngineConfig::default(),
                supervisor,
                interrupt,
            )?;

            let reset = controller.reset(&args.task_set, &args.selector())?;
            println!("Reset {} task(s) in {}", reset.len(), args.task_set);
            for id in reset {
                println!("  {}", id);
            }
        }

        Commands::List { project, task_set } => {
            let store = StateStore::open(&cli.projects_root, &project)?;
            match task_set {
                Some(name) => list_tasks(&store, &name)?,
                None => list_project(&store)?,
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn list_project(store: &StateStore) -> Result<(), EngineError> {
    let sets = store.list_task_sets()?;
    println!("Task sets ({}):", sets.len());
    println!(
        "{:<24}  {:>5}  {:>9}  {:>6}  {:>11}  {:>11}",
        "NAME", "TOTAL", "COMPLETED", "FAILED", "INTERRUPTED", "IN-PROGRESS"
    );
    println!("{}", "-".repeat(76));
    for name in sets {
        match store.load_task_set(&name) {
            Ok(set) => {
                let stats = set.stats();
                println!(
                    "{:<24}  {:>5}  {:>9}  {:>6}  {:>11}  {:>11}",
                    name, stats.total, stats.completed, stats.failed, stats.interrupted, stats.in_progress
                );
            }
            Err(e) => println!("{:<24}  unreadable: {}", name, e),
        }
    }

    let runs = store.list_runs()?;
    println!();
    println!("Recent runs ({}):", runs.len());
    println!(
        "{:<20}  {:<20}  {:<12}  {:>9}  {:>9}  {:>6}",
        "RUN", "TASK SET", "STATUS", "ATTEMPTED", "SUCCEEDED", "FAILED"
    );
    println!("{}", "-".repeat(86));
    for run in runs.iter().take(10) {
        let (status, attempted, succeeded, failed) = match &run.summary {
            Some(s) => (
                s.status.to_string(),
                s.counters.attempted,
                s.counters.succeeded,
                s.counters.failed,
            ),
            None => ("unfinished".to_string(), 0, 0, 0),
        };
        let status = if run.metadata.dry_run {
            format!("{} (dry)", status)
        } else {
            status
        };
        println!(
            "{:<20}  {:<20}  {:<12}  {:>9}  {:>9}  {:>6}",
            run.metadata.run_id.as_str(), run.metadata.task_set_name, status, attempted, succeeded, failed
        );
    }
    Ok(())
}

fn list_tasks(store: &StateStore, name: &str) -> Result<(), EngineError> {
    let set = store.load_task_set(name)?;
    println!("Tasks in {} ({}):", name, set.tasks.len());
    println!(
        "{:<16}  {:>5}  {:>8}  {:<12}  {:>8}  {}",
        "ID", "BATCH", "PRIORITY", "STATUS", "ELAPSED", "NAME"
    );
    println!("{}", "-".repeat(80));
    for task in autorun_core::computed_order(&set.tasks) {
        let elapsed = task
            .elapsed_seconds
            .map(|s| format_elapsed(Duration::from_secs_f64(s.max(0.0))))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16}  {:>5}  {:>8}  {:<12}  {:>8}  {}",
            task.id.as_str(), task.batch, task.priority, task.status.as_str(), elapsed, task.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_map_to_config() {
        let cli = Cli::try_parse_from([
            "autorun", "run", "demo", "fixes", "--tool", "claude", "--status", "failed",
            "--status", "not-started", "--start", "F-3", "--delay", "0", "--timeout", "60",
            "--min-duration", "0", "--no-proxy", "--quiet",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let config = args.engine_config().unwrap();
        assert_eq!(config.delay, DelayPolicy::None);
        assert_eq!(config.exec.ceiling, Duration::from_secs(60));
        assert_eq!(config.exec.floor, Duration::ZERO);
        assert_eq!(config.proxy, ProxyMode::ForceOff);
        assert!(!config.exec.echo);

        let overrides = args.overrides();
        assert_eq!(overrides.tool.as_deref(), Some("claude"));
        assert_eq!(overrides.filter.statuses, [TaskStatus::Failed, TaskStatus::NotStarted]);
        assert_eq!(overrides.filter.start_from, Some(TaskId::new("F-3")));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["autorun", "run", "demo", "fixes", "--status", "done"]).is_err());
        assert!(Cli::try_parse_from(["autorun", "run", "demo", "fixes", "--proxy", "--no-proxy"]).is_err());

        let cli = Cli::try_parse_from(["autorun", "run", "demo", "fixes", "--delay", "soon"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(matches!(args.engine_config(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_reset_selector() {
        let cli = Cli::try_parse_from([
            "autorun", "reset", "demo", "fixes", "--from", "B", "--batch", "2",
        ])
        .unwrap();
        let Commands::Reset(args) = cli.command else {
            panic!("expected reset");
        };
        let selector = args.selector();
        assert_eq!(selector.from, Some(TaskId::new("B")));
        assert_eq!(selector.batch, Some(2));
        assert!(!selector.all);
    }
}
