//! Heartbeat ticker for a running task.
//!
//! Runs beside the watch loop and only reads the shared [`ProgressProbe`].

use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use autorun_core::TaskId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Counters the watch loop updates and the heartbeat reads.
#[derive(Debug)]
pub struct ProgressProbe {
    started: Instant,
    bytes: AtomicU64,
}

impl ProgressProbe {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            bytes: AtomicU64::new(0),
        }
    }

    /// Record `n` bytes of output.
    pub fn record(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ProgressProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a duration as `4m05s` or `1h02m03s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, mins, secs) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if hours > 0 {
        format!("{}h{:02}m{:02}s", hours, mins, secs)
    } else {
        format!("{}m{:02}s", mins, secs)
    }
}

fn set_terminal_title(text: &str) {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\x1b]0;{}\x07", text);
    let _ = stderr.flush();
}

/// Handle to a running heartbeat.
pub struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Start ticking once per second.
    ///
    /// Every tick refreshes the terminal title (when `title` is set and stderr
    /// is a terminal); every `interval` a progress line is logged.
    pub fn start(task_id: TaskId, probe: Arc<ProgressProbe>, interval: Duration, title: bool) -> Self {
        let token = CancellationToken::new();
        let title = title && std::io::stderr().is_terminal();
        let every = interval.as_secs();

        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                let period = Duration::from_secs(1);
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                let mut tick: u64 = 0;

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            tick += 1;
                            let elapsed = format_elapsed(probe.elapsed());
                            if title {
                                let spinner = SPINNER[tick as usize % SPINNER.len()];
                                set_terminal_title(&format!("{} {} | Task {} | autorun", spinner, elapsed, task_id));
                            }
                            if every > 0 && tick % every == 0 {
                                info!(task = %task_id, elapsed = %elapsed, output_bytes = probe.bytes(), "Task still running");
                            }
                        }
                    }
                }

                if title {
                    set_terminal_title("");
                }
            }
        });

        Self { token, handle }
    }

    /// Stop the ticker and wait for it to finish.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
