//! Tool palette of the data agent.
//!
//! Every tool takes a JSON object of named fields and returns a descriptive
//! string. Failures never abort the run: the registry turns them into
//! `Error: ...` observations the model can react to.

mod inspect;
mod log;
mod plot;
mod transform;

pub use inspect::Inspect;
pub use log::WriteLog;
pub use plot::{PlotCurve, PlotLeastSquares};
pub use transform::Transform;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::AgentSession;
use crate::llm::{FunctionDefinition, ToolDefinition};

/// Information about a tool for display purposes.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool against the run's session.
    async fn execute(&self, args: Value, session: &mut AgentSession) -> anyhow::Result<String>;
}

/// String field `key` of a tool's arguments.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(anyhow::anyhow!(
            "Argument '{}' must be a string, got {}",
            key,
            other
        )),
        None => Err(anyhow::anyhow!("Missing '{}' argument", key)),
    }
}

/// Registry of available tools, in prompt order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// The data agent's palette.
    pub fn new() -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(Inspect),
            Arc::new(Transform),
            Arc::new(PlotCurve),
            Arc::new(PlotLeastSquares),
            Arc::new(WriteLog),
        ];
        tracing::debug!("Tool registry created with {} tools", tools.len());
        Self { tools }
    }

    /// List all available tools.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Get tool schemas in LLM-compatible format.
    pub fn get_tool_schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        session: &mut AgentSession,
    ) -> anyhow::Result<String> {
        let tool = self.find(name).ok_or_else(|| {
            let known: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
            anyhow::anyhow!("Unknown tool: {}. Available tools: {}", name, known.join(", "))
        })?;

        tool.execute(args, session).await
    }

    /// Run a model-issued call with raw JSON arguments and return the observation.
    pub async fn observe(&self, name: &str, raw_args: &str, session: &mut AgentSession) -> String {
        let result = match self.parse_args(name, raw_args) {
            Ok(args) => self.execute(name, args, session).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("Tool {} failed: {:#}", name, e);
                format!("Error: {:#}", e)
            }
        }
    }

    /// Arguments as a JSON object.
    ///
    /// Tools with a single required field also accept the bare value, which
    /// models often send for one-argument tools.
    fn parse_args(&self, name: &str, raw: &str) -> anyhow::Result<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        let single_field = self
            .find(name)
            .and_then(|t| single_required_field(&t.parameters_schema()));

        match (serde_json::from_str::<Value>(trimmed), single_field) {
            (Ok(Value::Object(map)), _) => Ok(Value::Object(map)),
            (Ok(Value::String(s)), Some(field)) => Ok(serde_json::json!({ field: s })),
            (Ok(other), _) => Err(anyhow::anyhow!(
                "Arguments must be a JSON object, got {}",
                other
            )),
            (Err(_), Some(field)) => Ok(serde_json::json!({ field: trimmed })),
            (Err(e), None) => Err(anyhow::anyhow!("Arguments are not valid JSON: {}", e)),
        }
    }
}

fn single_required_field(schema: &Value) -> Option<String> {
    let required = schema.get("required")?.as_array()?;
    let properties = schema.get("properties")?.as_object()?;
    if required.len() == 1 && properties.len() == 1 {
        required[0].as_str().map(str::to_string)
    } else {
        None
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSession;
    use crate::data::{Dataset, Datasets};
    use crate::data::plot::Plotter;

    fn session(dir: &std::path::Path) -> AgentSession {
        let mut sets = Datasets::new();
        sets.insert(Dataset::from_numbers(
            "spring",
            &[("x", &[1.0, 2.0, 3.0]), ("F", &[3.0, 5.0, 7.0])],
        ));
        AgentSession::new(sets, dir.join("plots"), Plotter::bundled().expect("bundled font"))
    }

    #[tokio::test]
    async fn palette_is_listed_in_order() {
        let registry = ToolRegistry::new();
        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["inspect", "transform", "plot_curve", "plot_least_squares", "write_log"]
        );
        assert_eq!(registry.get_tool_schemas().len(), 5);
    }

    #[tokio::test]
    async fn malformed_input_becomes_error_observation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());
        let registry = ToolRegistry::new();

        let cases = [
            ("plot_curve", "{not json"),
            ("plot_curve", "[1, 2]"),
            ("plot_curve", r#"{"dataset": "spring"}"#),
            ("plot_least_squares", r#"{"dataset": 5, "x": "x", "y": "F", "title": "t", "name": "n"}"#),
            ("transform", r#"{"code": "y = = 2"}"#),
            ("inspect", r#"{"dataset": "optics"}"#),
            ("no_such_tool", "{}"),
        ];
        for (tool, args) in cases {
            let observation = registry.observe(tool, args, &mut session).await;
            assert!(
                observation.starts_with("Error: "),
                "{} {} -> {}",
                tool,
                args,
                observation
            );
        }
    }

    #[tokio::test]
    async fn single_field_tools_accept_bare_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());
        let registry = ToolRegistry::new();

        let out = registry.observe("transform", "k = F / x", &mut session).await;
        assert!(out.starts_with("Executed successfully"), "{}", out);
        let out = registry.observe("write_log", "\"k computed\"", &mut session).await;
        assert!(!out.starts_with("Error"), "{}", out);
        assert!(session.log().contains("k computed"));
    }
}
