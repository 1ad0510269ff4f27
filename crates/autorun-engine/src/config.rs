//! Session configuration and per-task resolution.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use autorun_core::{OrderFilter, Task, ToolRegistry, ToolSpec, ValidationError, DEFAULT_TOOL};
use autorun_exec::ExecPolicy;
use rand::Rng;
use tracing::warn;

use crate::EngineError;

/// Wait between two consecutive tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    None,
    Fixed(Duration),
    /// Uniformly random, bounds inclusive.
    Range { min: Duration, max: Duration },
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::Range {
            min: Duration::from_secs(60),
            max: Duration::from_secs(120),
        }
    }
}

impl DelayPolicy {
    /// Pick the delay for one gap.
    pub fn sample(&self) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Range { min, max } => {
                let secs = rand::thread_rng().gen_range(min.as_secs()..=max.as_secs());
                Duration::from_secs(secs)
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl FromStr for DelayPolicy {
    type Err = EngineError;

    /// Accepts `0`, `N` or `MIN-MAX` (seconds).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let invalid = || {
            EngineError::Config(format!(
                "invalid delay '{}', use '60-120', '30' or '0'",
                value
            ))
        };
        let secs = |s: &str| s.trim().parse::<u64>().map_err(|_| invalid());

        if let Some((lo, hi)) = value.split_once('-') {
            let (lo, hi) = (secs(lo)?, secs(hi)?);
            let (min, max) = (lo.min(hi), lo.max(hi));
            if max == 0 {
                return Ok(Self::None);
            }
            if min == max {
                return Ok(Self::Fixed(Duration::from_secs(min)));
            }
            return Ok(Self::Range {
                min: Duration::from_secs(min),
                max: Duration::from_secs(max),
            });
        }

        match secs(value)? {
            0 => Ok(Self::None),
            n => Ok(Self::Fixed(Duration::from_secs(n))),
        }
    }
}

impl fmt::Display for DelayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "0"),
            Self::Fixed(d) => write!(f, "{}", d.as_secs()),
            Self::Range { min, max } => write!(f, "{}-{}", min.as_secs(), max.as_secs()),
        }
    }
}

/// Operator override of the per-tool proxy default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProxyMode {
    #[default]
    Auto,
    ForceOn,
    ForceOff,
}

impl ProxyMode {
    /// Whether a tool with the given default keeps the proxy.
    pub fn resolve(self, tool_needs_proxy: bool) -> bool {
        match self {
            Self::Auto => tool_needs_proxy,
            Self::ForceOn => true,
            Self::ForceOff => false,
        }
    }
}

/// Session-wide settings, built once by the front end.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Floor, ceiling, heartbeat and console behaviour of each process.
    pub exec: ExecPolicy,

    /// Inter-task delay.
    pub delay: DelayPolicy,

    pub proxy: ProxyMode,

    /// Require a version-controlled workspace and tag it before the run.
    pub git_safety: bool,

    /// Notify after every successful task, not only failures.
    pub notify_each: bool,

    /// Upper bound on one notification delivery.
    pub notify_timeout: Duration,

    /// Look up every agent program on `PATH` before a run starts.
    pub check_tools: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exec: ExecPolicy::default(),
            delay: DelayPolicy::default(),
            proxy: ProxyMode::Auto,
            git_safety: false,
            notify_each: false,
            notify_timeout: Duration::from_secs(10),
            check_tools: true,
        }
    }
}

/// Per-invocation choices from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub tool: Option<String>,
    pub model: Option<String>,
    /// Template path, relative to the project directory unless absolute.
    pub template: Option<String>,
    pub workspace: Option<PathBuf>,
    pub filter: OrderFilter,
}

/// Tool and model picked for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub tool: ToolSpec,
    pub model: Option<String>,
    pub use_proxy: bool,
}

/// First-present-wins resolution of tool, model and proxy.
#[derive(Debug, Clone)]
pub struct Resolver<'a> {
    registry: &'a ToolRegistry,
    cli_tool: Option<&'a str>,
    cli_model: Option<&'a str>,
    project_tool: Option<&'a str>,
    project_model: Option<&'a str>,
    proxy: ProxyMode,
}

impl<'a> Resolver<'a> {
    /// Validates the command-line and project tools up front.
    pub fn new(
        registry: &'a ToolRegistry,
        overrides: &'a RunOverrides,
        project_tool: Option<&'a str>,
        project_model: Option<&'a str>,
        proxy: ProxyMode,
    ) -> Result<Self, ValidationError> {
        let cli_tool = overrides.tool.as_deref();
        for name in cli_tool.into_iter().chain(project_tool) {
            registry.require(name)?;
        }
        Ok(Self {
            registry,
            cli_tool,
            cli_model: overrides.model.as_deref(),
            project_tool,
            project_model,
            proxy,
        })
    }

    /// Tool: task -> command line -> project -> built-in default.
    /// Model: task -> command line -> project -> tool default.
    pub fn resolve(&self, task: &Task) -> Result<ResolvedTool, ValidationError> {
        let task_tool = task.cli.tool.as_deref().and_then(|name| {
            let found = self.registry.get(name);
            if found.is_none() {
                warn!(task = %task.id, tool = %name, "Unknown tool on task, ignoring override");
            }
            found
        });

        let tool = match task_tool {
            Some(tool) => tool,
            None => self
                .registry
                .require(self.cli_tool.or(self.project_tool).unwrap_or(DEFAULT_TOOL))?,
        };

        let model = if tool.accepts_model {
            task.cli
                .model
                .as_deref()
                .or(self.cli_model)
                .or(self.project_model)
                .or(tool.default_model.as_deref())
                .map(str::to_string)
        } else {
            None
        };

        Ok(ResolvedTool {
            tool: tool.clone(),
            model,
            use_proxy: self.proxy.resolve(tool.needs_proxy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autorun_core::TaskCli;

    #[test]
    fn test_parse_delay() {
        assert_eq!("0".parse::<DelayPolicy>().unwrap(), DelayPolicy::None);
        assert_eq!(
            "30".parse::<DelayPolicy>().unwrap(),
            DelayPolicy::Fixed(Duration::from_secs(30))
        );
        assert_eq!(
            "120-60".parse::<DelayPolicy>().unwrap(),
            DelayPolicy::Range {
                min: Duration::from_secs(60),
                max: Duration::from_secs(120)
            }
        );
        assert_eq!("0-0".parse::<DelayPolicy>().unwrap(), DelayPolicy::None);
        assert!("-5".parse::<DelayPolicy>().is_err());
        assert!("soon".parse::<DelayPolicy>().is_err());
        assert_eq!(DelayPolicy::default().to_string(), "60-120");
    }

    #[test]
    fn test_sample_stays_in_range() {
        let delay: DelayPolicy = "2-4".parse().unwrap();
        for _ in 0..50 {
            let d = delay.sample();
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(4));
        }
        assert_eq!(DelayPolicy::None.sample(), Duration::ZERO);
    }

    #[test]
    fn test_proxy_mode() {
        assert!(ProxyMode::Auto.resolve(true));
        assert!(!ProxyMode::Auto.resolve(false));
        assert!(ProxyMode::ForceOn.resolve(false));
        assert!(!ProxyMode::ForceOff.resolve(true));
    }

    #[test]
    fn test_precedence_chain() {
        let registry = ToolRegistry::builtin();
        let overrides = RunOverrides {
            tool: Some("agent".to_string()),
            model: Some("cli-model".to_string()),
            ..Default::default()
        };
        let resolver =
            Resolver::new(&registry, &overrides, Some("copilot"), Some("project-model"), ProxyMode::Auto)
                .unwrap();

        let plain = Task::new("A", "a");
        let resolved = resolver.resolve(&plain).unwrap();
        assert_eq!(resolved.tool.name, "agent");
        assert_eq!(resolved.model.as_deref(), Some("cli-model"));
        assert!(resolved.use_proxy);

        let mut pinned = Task::new("B", "b");
        pinned.cli = TaskCli {
            tool: Some("copilot".to_string()),
            model: Some("task-model".to_string()),
        };
        let resolved = resolver.resolve(&pinned).unwrap();
        assert_eq!(resolved.tool.name, "copilot");
        assert_eq!(resolved.model.as_deref(), Some("task-model"));

        // kimi takes no model, whatever the chain says.
        pinned.cli.tool = Some("kimi".to_string());
        let resolved = resolver.resolve(&pinned).unwrap();
        assert_eq!(resolved.tool.name, "kimi");
        assert_eq!(resolved.model, None);
        assert!(!resolved.use_proxy);
    }

    #[test]
    fn test_defaults_and_unknown_tools() {
        let registry = ToolRegistry::builtin();
        let overrides = RunOverrides::default();
        let resolver = Resolver::new(&registry, &overrides, None, None, ProxyMode::ForceOff).unwrap();

        let mut task = Task::new("A", "a");
        task.cli.tool = Some("gemini".to_string());
        let resolved = resolver.resolve(&task).unwrap();
        assert_eq!(resolved.tool.name, DEFAULT_TOOL);
        assert_eq!(resolved.model.as_deref(), Some("claude-opus-4.6"));
        assert!(!resolved.use_proxy);

        let bad = RunOverrides {
            tool: Some("gemini".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Resolver::new(&registry, &bad, None, None, ProxyMode::Auto),
            Err(ValidationError::UnknownTool { .. })
        ));
        assert!(Resolver::new(&registry, &overrides, Some("gemini"), None, ProxyMode::Auto).is_err());
    }
}
