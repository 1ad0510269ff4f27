//! autorun process supervision
//!
//! Runs one agent process per task and classifies how it ended:
//!
//! - [`PtySupervisor`] runs the agent under a pseudo-terminal, [`PipeSupervisor`]
//!   through plain pipes; [`select_supervisor`] probes which one to use.
//! - Output is written verbatim to a raw log, cleaned into a second log and
//!   echoed to the console.
//! - A floor and a ceiling bound the run time; a process still alive at the
//!   ceiling is terminated gracefully, then killed.
//! - An [`Interrupt`] shared with the signal handler preempts everything.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use autorun_core::TaskId;
//! use autorun_exec::{select_supervisor, ExecJob, ExecPolicy, Interrupt};
//!
//! async fn run() {
//!     let supervisor = select_supervisor(ExecPolicy::default(), Arc::new(Interrupt::new()));
//!     let job = ExecJob::new(TaskId::new("T-1"), "claude", "T-1.log", "T-1.clean.log")
//!         .with_args(vec!["--print".into(), "-p".into(), "hello".into()]);
//!     let outcome = supervisor.execute(&job).await;
//!     println!("{}", outcome.status);
//! }
//! ```

mod env;
mod error;
mod heartbeat;
mod interrupt;
mod pipe;
mod policy;
mod process;
mod pty;
mod sanitize;
mod sink;
mod supervisor;

pub use env::{find_program, is_proxy_key, PROXY_ENV_KEYS};
pub use error::SupervisorError;
pub use heartbeat::{format_elapsed, Heartbeat, ProgressProbe};
pub use interrupt::{Interrupt, InterruptLevel};
pub use pipe::PipeSupervisor;
pub use policy::ExecPolicy;
pub use pty::PtySupervisor;
pub use sanitize::{sanitize, strip_ansi, LogSanitizer, TAIL_LINES};
pub use sink::LogSink;
pub use supervisor::{select_supervisor, ExecJob, Supervisor};
