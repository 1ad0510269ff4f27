//! Supervisor trait and the watch loop shared by both strategies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use autorun_core::{FailureReason, TaskId, TaskOutcome};
use portable_pty::{native_pty_system, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::heartbeat::{Heartbeat, ProgressProbe};
use crate::process::{self, ChildProcess};
use crate::{ExecPolicy, Interrupt, LogSink, PipeSupervisor, PtySupervisor};

/// Size of the read buffer for child output.
pub(crate) const READ_CHUNK: usize = 8192;

/// Everything needed to run one task's agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecJob {
    /// Task being executed.
    pub task_id: TaskId,

    /// Executable to launch.
    pub program: String,

    /// Fully expanded arguments.
    pub args: Vec<String>,

    /// Working directory of the agent, inherited when `None`.
    pub working_dir: Option<PathBuf>,

    /// Keep proxy variables in the child environment.
    pub use_proxy: bool,

    /// Verbatim output log.
    pub raw_log: PathBuf,

    /// Cleaned output log.
    pub clean_log: PathBuf,
}

impl ExecJob {
    /// Create a job with no arguments, proxy kept.
    pub fn new(
        task_id: TaskId,
        program: impl Into<String>,
        raw_log: impl Into<PathBuf>,
        clean_log: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id,
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            use_proxy: true,
            raw_log: raw_log.into(),
            clean_log: clean_log.into(),
        }
    }

    /// Builder method to set the arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Builder method to set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Builder method to set the proxy decision.
    pub fn with_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = use_proxy;
        self
    }

    /// Command line for log messages, with long arguments shortened.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            if arg.chars().count() > 60 {
                let head: String = arg.chars().take(57).collect();
                parts.push(format!("{}...", head));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Strategy that runs one agent process to completion.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Short name of the strategy, for logs.
    fn name(&self) -> &'static str;

    /// Run the job and classify how it ended. Never fails: problems are
    /// reported through the outcome.
    async fn execute(&self, job: &ExecJob) -> TaskOutcome;
}

/// Probe PTY support once and pick the matching strategy.
pub fn select_supervisor(policy: ExecPolicy, interrupt: Arc<Interrupt>) -> Box<dyn Supervisor> {
    let probe = native_pty_system().openpty(PtySize {
        rows: 40,
        cols: 120,
        pixel_width: 0,
        pixel_height: 0,
    });

    match probe {
        Ok(_pair) => {
            info!("PTY available, agents will run under a pseudo-terminal");
            Box::new(PtySupervisor::new(policy, interrupt))
        }
        Err(e) => {
            degradation_notice(&e.to_string());
            Box::new(PipeSupervisor::new(policy, interrupt))
        }
    }
}

/// Tell the operator that output will go through plain pipes.
pub(crate) fn degradation_notice(reason: &str) {
    warn!(reason = %reason, "PTY unavailable, falling back to pipe mode");
    eprintln!(
        "autorun: PTY unavailable ({}), running agents through pipes; colours and interactive output may be lost",
        reason
    );
}

/// How the watch loop ended.
enum Ending {
    Exited(Option<i32>),
    TimedOut,
    Interrupted,
}

/// Watch a spawned child until it exits, times out or is interrupted.
///
/// `rx` carries raw output chunks from the reader side; `started` is the
/// spawn instant the floor and ceiling are measured from.
pub(crate) async fn watch<C: ChildProcess>(
    mut child: C,
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut sink: LogSink,
    job: &ExecJob,
    policy: &ExecPolicy,
    interrupt: &Interrupt,
    started: Instant,
) -> TaskOutcome {
    let pid = child.pid();
    if let Some(pid) = pid {
        interrupt.track_child(pid);
    }
    info!(task = %job.task_id, pid = ?pid, command = %job.display_command(), "Agent started");

    let probe = Arc::new(ProgressProbe::new());
    let heartbeat = Heartbeat::start(
        job.task_id.clone(),
        probe.clone(),
        policy.heartbeat,
        policy.terminal_title,
    );

    let mut reader_open = true;
    let ending = loop {
        if interrupt.is_requested() {
            info!(task = %job.task_id, "Interrupt requested, stopping agent");
            terminate(&mut child, policy.grace).await;
            break Ending::Interrupted;
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.ceiling {
            warn!(
                task = %job.task_id,
                ceiling_secs = policy.ceiling.as_secs(),
                "Task exceeded its time limit, terminating"
            );
            terminate(&mut child, policy.grace).await;
            break Ending::TimedOut;
        }

        let wait = policy.poll_interval.min(policy.ceiling - elapsed);
        if reader_open {
            tokio::select! {
                next = tokio::time::timeout(wait, rx.recv()) => match next {
                    Ok(Some(chunk)) => {
                        probe.record(chunk.len());
                        sink.write(&chunk).await;
                    }
                    Ok(None) => reader_open = false,
                    Err(_) => {}
                },
                _ = interrupt.wait() => continue,
            }
        } else {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = interrupt.wait() => continue,
            }
        }

        match child.poll_exit() {
            Ok(Some(code)) => break Ending::Exited(code),
            Ok(None) => {}
            Err(e) => {
                warn!(task = %job.task_id, error = %e, "Failed to poll agent status");
            }
        }
    };

    let elapsed = started.elapsed();
    drain(&mut rx, &mut sink, &probe, policy).await;
    heartbeat.stop().await;
    interrupt.clear_child();
    let tail = sink.finish().await;

    let outcome = match ending {
        Ending::Exited(code) => TaskOutcome::from_exit(code, elapsed, policy.floor),
        Ending::TimedOut => TaskOutcome::failed(FailureReason::Timeout, elapsed, None),
        Ending::Interrupted => TaskOutcome::interrupted(elapsed),
    };

    info!(
        task = %job.task_id,
        status = %outcome.status,
        exit_code = ?outcome.exit_code,
        elapsed_secs = outcome.elapsed_seconds(),
        "Agent finished"
    );
    outcome.with_output_tail(tail)
}

/// Read whatever output is still buffered, stopping at the first idle wait.
async fn drain(
    rx: &mut mpsc::Receiver<Vec<u8>>,
    sink: &mut LogSink,
    probe: &ProgressProbe,
    policy: &ExecPolicy,
) {
    for _ in 0..policy.drain_attempts {
        match tokio::time::timeout(policy.drain_wait, rx.recv()).await {
            Ok(Some(chunk)) => {
                probe.record(chunk.len());
                sink.write(&chunk).await;
            }
            Ok(None) | Err(_) => break,
        }
    }
}

/// Graceful termination of the child's group, escalating to a kill after
/// `grace`.
async fn terminate<C: ChildProcess>(child: &mut C, grace: Duration) {
    let pid = child.pid();
    let signalled = pid.is_some_and(process::terminate_group);
    if !signalled {
        let _ = child.kill();
    }

    if wait_exit(child, grace).await {
        return;
    }

    warn!(pid = ?pid, grace_secs = grace.as_secs(), "Agent ignored termination, killing");
    if let Some(pid) = pid {
        process::kill_group(pid);
    }
    if let Err(e) = child.kill() {
        debug!(error = %e, "Kill after group kill failed");
    }
    if !wait_exit(child, Duration::from_secs(5)).await {
        warn!(pid = ?pid, "Agent did not exit after kill");
    }
}

/// Poll for exit every 100ms up to `limit`.
async fn wait_exit<C: ChildProcess>(child: &mut C, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if matches!(child.poll_exit(), Ok(Some(_))) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
