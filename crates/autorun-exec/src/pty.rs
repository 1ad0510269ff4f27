//! PTY strategy: the agent sees a real terminal, so coloured and
//! interactive output is captured byte-for-byte.

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use autorun_core::TaskOutcome;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize};
use tokio::sync::mpsc;
use tracing::error;

use crate::env::proxy_keys_to_strip;
use crate::process::ChildProcess;
use crate::supervisor::{degradation_notice, watch, READ_CHUNK};
use crate::{ExecJob, ExecPolicy, Interrupt, LogSink, PipeSupervisor, Supervisor, SupervisorError};

/// A PTY child together with the master side that keeps its terminal open.
struct PtyChild {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    _master: Box<dyn MasterPty + Send>,
}

impl ChildProcess for PtyChild {
    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn poll_exit(&mut self) -> std::io::Result<Option<Option<i32>>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| Some(status.exit_code() as i32)))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }
}

/// Runs agents under a pseudo-terminal, falling back to pipes for a task
/// whose terminal cannot be allocated.
#[derive(Debug, Clone)]
pub struct PtySupervisor {
    policy: ExecPolicy,
    interrupt: Arc<Interrupt>,
    fallback: PipeSupervisor,
}

impl PtySupervisor {
    pub fn new(policy: ExecPolicy, interrupt: Arc<Interrupt>) -> Self {
        let fallback = PipeSupervisor::new(policy.clone(), interrupt.clone());
        Self {
            policy,
            interrupt,
            fallback,
        }
    }

    fn open(&self) -> Result<PtyPair, SupervisorError> {
        native_pty_system()
            .openpty(pty_size(parent_terminal_size()))
            .map_err(|e| SupervisorError::Pty(e.to_string()))
    }

    fn spawn(&self, pair: PtyPair, job: &ExecJob) -> Result<(PtyChild, mpsc::Receiver<Vec<u8>>), SupervisorError> {
        let mut cmd = command(job);
        if let Some(dir) = &job.working_dir {
            cmd.cwd(dir);
        }
        if !job.use_proxy {
            for key in proxy_keys_to_strip() {
                cmd.env_remove(key);
            }
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SupervisorError::Spawn {
                program: job.program.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SupervisorError::Pty(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok((
            PtyChild {
                child,
                _master: pair.master,
            },
            rx,
        ))
    }
}

/// Size used when our own stdout is not a terminal.
const DEFAULT_ROWS: u16 = 50;
const DEFAULT_COLS: u16 = 120;

fn pty_size(parent: Option<(u16, u16)>) -> PtySize {
    let (rows, cols) = parent.unwrap_or((DEFAULT_ROWS, DEFAULT_COLS));
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Rows and columns of the terminal on our stdout, if it is one.
#[cfg(unix)]
fn parent_terminal_size() -> Option<(u16, u16)> {
    use std::io::IsTerminal;
    use std::os::fd::AsRawFd;

    let stdout = std::io::stdout();
    if !stdout.is_terminal() {
        return None;
    }
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ only writes into the winsize we pass.
    let rc = unsafe { libc::ioctl(stdout.as_raw_fd(), libc::TIOCGWINSZ, &mut size) };
    (rc == 0 && size.ws_row > 0 && size.ws_col > 0).then_some((size.ws_row, size.ws_col))
}

#[cfg(not(unix))]
fn parent_terminal_size() -> Option<(u16, u16)> {
    None
}

/// The agent writes to the terminal but reads its input from `/dev/null`,
/// so a confirmation prompt sees EOF instead of waiting for the ceiling.
#[cfg(unix)]
fn command(job: &ExecJob) -> CommandBuilder {
    let mut cmd = CommandBuilder::new("/bin/sh");
    cmd.arg("-c");
    cmd.arg("exec \"$@\" < /dev/null");
    cmd.arg("autorun-agent");
    cmd.arg(&job.program);
    cmd.args(&job.args);
    cmd
}

#[cfg(not(unix))]
fn command(job: &ExecJob) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(&job.program);
    cmd.args(&job.args);
    cmd
}

#[async_trait]
impl Supervisor for PtySupervisor {
    fn name(&self) -> &'static str {
        "pty"
    }

    async fn execute(&self, job: &ExecJob) -> TaskOutcome {
        let pair = match self.open() {
            Ok(pair) => pair,
            Err(e) => {
                degradation_notice(&e.to_string());
                return self.fallback.execute(job).await;
            }
        };

        let sink = match LogSink::create(&job.raw_log, &job.clean_log, self.policy.echo).await {
            Ok(sink) => sink,
            Err(e) => {
                error!(task = %job.task_id, error = %e, "Cannot open task logs");
                return TaskOutcome::spawn_error();
            }
        };

        let started = Instant::now();
        match self.spawn(pair, job) {
            Ok((child, rx)) => {
                watch(child, rx, sink, job, &self.policy, &self.interrupt, started).await
            }
            Err(e) => {
                error!(task = %job.task_id, error = %e, "Failed to start agent");
                let tail = sink.finish().await;
                TaskOutcome::spawn_error().with_output_tail(tail)
            }
        }
    }
}
