//! Duration and polling policy for a supervised process.

use std::time::Duration;

/// How long a task may and must run, and how the watch loop paces itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPolicy {
    /// Successful exits before this are treated as failures.
    pub floor: Duration,

    /// Processes still alive after this are terminated.
    pub ceiling: Duration,

    /// Time between the graceful signal and the forced kill.
    pub grace: Duration,

    /// Upper bound on a single wait for output.
    pub poll_interval: Duration,

    /// Interval between heartbeat log lines. Zero disables them.
    pub heartbeat: Duration,

    /// Number of short waits used to drain output after exit.
    pub drain_attempts: u32,

    /// Length of each drain wait.
    pub drain_wait: Duration,

    /// Forward child output to our stdout.
    pub echo: bool,

    /// Show progress in the terminal title.
    pub terminal_title: bool,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(10),
            ceiling: Duration::from_secs(2400),
            grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            heartbeat: Duration::from_secs(60),
            drain_attempts: 100,
            drain_wait: Duration::from_millis(100),
            echo: true,
            terminal_title: true,
        }
    }
}

impl ExecPolicy {
    /// Builder method to set the floor.
    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.floor = floor;
        self
    }

    /// Builder method to set the ceiling.
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Builder method to set the grace window.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Builder method to set the heartbeat interval.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Builder method to disable console echo and the terminal title.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self.terminal_title = false;
        self
    }
}
