//! Agent tool descriptions.

use crate::ValidationError;
use serde::Serialize;

/// Tool used when neither the command line nor the project names one.
pub const DEFAULT_TOOL: &str = "copilot";

/// Description of an external agent command-line tool.
///
/// Argument templates may contain `{prompt}` (the rendered prompt text),
/// `{prompt_file}` (path of the prompt file) and `{model}`. An argument
/// containing `{model}` is dropped when no model is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    /// Name used in task files and on the command line.
    pub name: String,

    /// Executable to launch.
    pub program: String,

    /// Argument templates.
    pub args: Vec<String>,

    /// Whether the tool needs the network proxy by default.
    pub needs_proxy: bool,

    /// Whether the tool accepts a `--model` argument.
    pub accepts_model: bool,

    /// Model used when nothing else resolves one.
    pub default_model: Option<String>,

    /// Human-readable description.
    pub description: String,
}

impl ToolSpec {
    /// Create a new ToolSpec with minimal required fields.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            needs_proxy: false,
            accepts_model: false,
            default_model: None,
            description: String::new(),
        }
    }

    /// Builder method to set argument templates.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to mark the tool as needing the proxy.
    pub fn with_proxy(mut self) -> Self {
        self.needs_proxy = true;
        self
    }

    /// Builder method to accept a model, with a default.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.accepts_model = true;
        self.default_model = Some(model.into());
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Expand the argument templates.
    pub fn command_args(&self, model: Option<&str>, prompt: &str, prompt_file: &str) -> Vec<String> {
        let model = if self.accepts_model { model } else { None };
        let mut args = Vec::with_capacity(self.args.len());
        let mut iter = self.args.iter().peekable();

        while let Some(arg) = iter.next() {
            if model.is_none() {
                if arg.contains("{model}") {
                    continue;
                }
                // `--model {model}` pairs go away together.
                if iter.peek().is_some_and(|next| next.contains("{model}")) {
                    iter.next();
                    continue;
                }
            }
            args.push(
                arg.replace("{model}", model.unwrap_or_default())
                    .replace("{prompt_file}", prompt_file)
                    .replace("{prompt}", prompt),
            );
        }
        args
    }
}

/// Registry of known tools.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Registry with the built-in tools.
    pub fn builtin() -> Self {
        Self {
            tools: vec![
                ToolSpec::new("kimi", "kimi")
                    .with_args(["--quiet", "--yolo", "-p", "{prompt}"])
                    .with_description("Kimi CLI"),
                ToolSpec::new("agent", "agent")
                    .with_args(["--print", "-f", "--trust", "--model", "{model}", "{prompt}"])
                    .with_proxy()
                    .with_default_model("opus-4.6")
                    .with_description("Cursor Agent CLI"),
                ToolSpec::new("copilot", "copilot")
                    .with_args(["--silent", "--yolo", "--model", "{model}", "-p", "{prompt}"])
                    .with_proxy()
                    .with_default_model("claude-opus-4.6")
                    .with_description("GitHub Copilot CLI"),
                ToolSpec::new("claude", "claude")
                    .with_args([
                        "--print",
                        "--permission-mode",
                        "bypassPermissions",
                        "-p",
                        "{prompt}",
                    ])
                    .with_proxy()
                    .with_description("Claude Code CLI"),
            ],
        }
    }

    /// Empty registry.
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// Builder method to register a tool, replacing one with the same name.
    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.retain(|t| t.name != tool.name);
        self.tools.push(tool);
        self
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Look up a tool by name, failing with the list of known tools.
    pub fn require(&self, name: &str) -> Result<&ToolSpec, ValidationError> {
        self.get(name).ok_or_else(|| ValidationError::UnknownTool {
            tool: name.to_string(),
            available: self.names().join(", "),
        })
    }

    /// Names of all registered tools.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// All registered tools.
    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tools() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.names(), ["kimi", "agent", "copilot", "claude"]);
        assert!(registry.get(DEFAULT_TOOL).is_some());
        assert!(!registry.get("kimi").unwrap().needs_proxy);
        assert!(registry.get("claude").unwrap().needs_proxy);
    }

    #[test]
    fn test_require_unknown_tool() {
        let err = ToolRegistry::builtin().require("gemini").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTool { ref tool, .. } if tool == "gemini"));
    }

    #[test]
    fn test_command_args_with_model() {
        let registry = ToolRegistry::builtin();
        let copilot = registry.get("copilot").unwrap();
        let args = copilot.command_args(Some("gpt-5"), "do it", "/tmp/p.md");
        assert_eq!(args, ["--silent", "--yolo", "--model", "gpt-5", "-p", "do it"]);
    }

    #[test]
    fn test_command_args_drop_model_flag() {
        let tool = ToolSpec::new("t", "t").with_args(["--model", "{model}", "-f", "{prompt_file}"]);
        let args = tool.command_args(Some("ignored"), "text", "/tmp/p.md");
        assert_eq!(args, ["-f", "/tmp/p.md"]);
    }
}
