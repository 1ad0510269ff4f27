//! Process-group signalling.
//!
//! Agents run as leaders of their own process group (pipe mode) or session
//! (PTY mode), so the group id equals the child pid and every helper the
//! agent starts receives the same signals.

use std::io;

/// Minimal view of a running child used by the watch loop.
pub(crate) trait ChildProcess: Send {
    /// Pid of the child, which is also its process-group id.
    fn pid(&self) -> Option<u32>;

    /// `Some(code)` once the child exited; the code is `None` for a
    /// signal death.
    fn poll_exit(&mut self) -> io::Result<Option<Option<i32>>>;

    /// Forcefully kill the child itself.
    fn kill(&mut self) -> io::Result<()>;
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> bool {
    // SAFETY: killpg takes plain integers and has no memory preconditions.
    unsafe { libc::killpg(pgid as libc::pid_t, signal) == 0 }
}

/// Ask the whole group to terminate.
pub(crate) fn terminate_group(pgid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pgid, libc::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        false
    }
}

/// Kill the whole group.
pub(crate) fn kill_group(pgid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pgid, libc::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        false
    }
}
