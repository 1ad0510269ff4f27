//! Crash-safe persistence for autorun.
//!
//! The store is the only writer of durable files: task sets, the project
//! record, and everything under a project's `runtime/` directory. Every
//! write goes through [`atomic_write`], so a crash leaves either the old or
//! the new file on disk.

mod atomic;
mod error;
mod project;
mod store;

pub use atomic::{atomic_write, write_json};
pub use error::{Result, StoreError};
pub use project::ProjectRecord;
pub use store::{LiveStatus, LogPaths, RunHandle, RunInfo, RunMetadata, StateStore};
