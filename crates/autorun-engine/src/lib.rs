//! autorun session controller
//!
//! Ties the order builder, the process supervisor and the state store
//! together: resolves tool, model, proxy and template for each task, runs
//! the tasks one at a time with a delay in between, and finalizes the run
//! on completion, interrupt or persistence failure.

mod config;
mod controller;
mod error;
mod git;
mod notify;
mod render;

pub use config::{DelayPolicy, EngineConfig, ProxyMode, ResolvedTool, Resolver, RunOverrides};
pub use controller::{DryRunEntry, DryRunReport, SessionController};
pub use error::{EngineError, NotifyError};
pub use git::{GitGuard, TAG_PREFIX};
pub use notify::{LogNotifier, Notification, Notifier};
pub use render::{PromptRenderer, TemplateRenderer};
