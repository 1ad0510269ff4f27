//! Prompt rendering.

use std::sync::LazyLock;

use autorun_core::Task;
use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder regex is valid"));

/// Turns a task and an optional template into the prompt handed to the agent.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, template: Option<&str>, task: &Task) -> String;
}

/// `{{key}}` becomes the task field `key` (objects and arrays as JSON, missing
/// keys as nothing); `#item` becomes the whole task as JSON. Without a
/// template the prompt is the task JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl PromptRenderer for TemplateRenderer {
    fn render(&self, template: Option<&str>, task: &Task) -> String {
        let value = serde_json::to_value(task).unwrap_or_default();
        let item = serde_json::to_string_pretty(&value).unwrap_or_default();

        let Some(template) = template else {
            return item;
        };

        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            match value.get(&caps[1]) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(v @ (Value::Object(_) | Value::Array(_))) => {
                    serde_json::to_string_pretty(v).unwrap_or_default()
                }
                Some(v) => v.to_string(),
            }
        });
        rendered.replace("#item", &item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        let json = r#"{
            "task_no": "F-1",
            "task_name": "Fix login",
            "batch": 2,
            "files": ["a.rs", "b.rs"],
            "owner": null
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_placeholders() {
        let prompt = TemplateRenderer.render(
            Some("{{task_no}}: {{task_name}} (batch {{batch}}) {{missing}}{{owner}}"),
            &task(),
        );
        assert_eq!(prompt, "F-1: Fix login (batch 2) ");
    }

    #[test]
    fn test_structured_values_and_item() {
        let prompt = TemplateRenderer.render(Some("Files:\n{{files}}\n---\n#item"), &task());
        assert!(prompt.starts_with("Files:\n[\n  \"a.rs\",\n  \"b.rs\"\n]\n---\n{"));
        assert!(prompt.contains("\"task_no\": \"F-1\""));
    }

    #[test]
    fn test_no_template_is_task_json() {
        let prompt = TemplateRenderer.render(None, &task());
        let parsed: Value = serde_json::from_str(&prompt).unwrap();
        assert_eq!(parsed["task_name"], "Fix login");
        assert_eq!(parsed["files"][1], "b.rs");
    }
}
