//! Pipe strategy: stdout and stderr captured through plain pipes.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use autorun_core::TaskOutcome;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::error;

use crate::env::proxy_keys_to_strip;
use crate::process::ChildProcess;
use crate::supervisor::{watch, READ_CHUNK};
use crate::{ExecJob, ExecPolicy, Interrupt, LogSink, Supervisor, SupervisorError};

impl ChildProcess for Child {
    fn pid(&self) -> Option<u32> {
        self.id()
    }

    fn poll_exit(&mut self) -> std::io::Result<Option<Option<i32>>> {
        Ok(self.try_wait()?.map(|status| status.code()))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.start_kill()
    }
}

/// Runs agents with stdout and stderr merged into one captured stream.
#[derive(Debug, Clone)]
pub struct PipeSupervisor {
    policy: ExecPolicy,
    interrupt: Arc<Interrupt>,
}

impl PipeSupervisor {
    pub fn new(policy: ExecPolicy, interrupt: Arc<Interrupt>) -> Self {
        Self { policy, interrupt }
    }

    fn spawn(&self, job: &ExecJob) -> Result<(Child, mpsc::Receiver<Vec<u8>>), SupervisorError> {
        let mut cmd = Command::new(&job.program);
        cmd.args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &job.working_dir {
            cmd.current_dir(dir);
        }
        if !job.use_proxy {
            for key in proxy_keys_to_strip() {
                cmd.env_remove(key);
            }
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: job.program.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(64);
        if let Some(stdout) = child.stdout.take() {
            forward(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward(stderr, tx);
        }
        Ok((child, rx))
    }
}

/// Copy a child stream into the output channel until EOF.
fn forward<R>(mut stream: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[async_trait]
impl Supervisor for PipeSupervisor {
    fn name(&self) -> &'static str {
        "pipe"
    }

    async fn execute(&self, job: &ExecJob) -> TaskOutcome {
        let sink = match LogSink::create(&job.raw_log, &job.clean_log, self.policy.echo).await {
            Ok(sink) => sink,
            Err(e) => {
                error!(task = %job.task_id, error = %e, "Cannot open task logs");
                return TaskOutcome::spawn_error();
            }
        };

        let started = Instant::now();
        match self.spawn(job) {
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
