//! Operator interrupt state shared between the signal handler, the watch
//! loop and the session controller.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Notify;
use tracing::warn;

use crate::process;

/// What a delivered interrupt amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptLevel {
    /// First interrupt: stop the current task gracefully, dispatch nothing more.
    Requested,
    /// Any further interrupt: kill everything and quit.
    Forced,
}

/// Level-triggered interrupt flags.
///
/// Flags are only ever set, never cleared, for the lifetime of a session.
#[derive(Debug, Default)]
pub struct Interrupt {
    requested: AtomicBool,
    forced: AtomicBool,
    /// Process group of the running agent, 0 when none.
    child_pgid: AtomicU32,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interrupt and return its level.
    pub fn signal(&self) -> InterruptLevel {
        if self.requested.swap(true, Ordering::SeqCst) {
            self.forced.store(true, Ordering::SeqCst);
            InterruptLevel::Forced
        } else {
            self.notify.notify_waiters();
            InterruptLevel::Requested
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn is_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }

    /// Resolves once an interrupt has been requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Remember the process group of the running agent.
    pub fn track_child(&self, pgid: u32) {
        self.child_pgid.store(pgid, Ordering::SeqCst);
    }

    /// Forget the running agent.
    pub fn clear_child(&self) {
        self.child_pgid.store(0, Ordering::SeqCst);
    }

    /// Kill the tracked agent group, if any. Used by the force quit path.
    pub fn kill_tracked_child(&self) {
        let pgid = self.child_pgid.swap(0, Ordering::SeqCst);
        if pgid != 0 && !process::kill_group(pgid) {
            warn!(pgid, "Failed to kill agent process group");
        }
    }
}
