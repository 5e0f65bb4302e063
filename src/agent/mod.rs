//! Tool-using agent that processes the uploaded measurement data.
//!
//! One iteration is one chat completion plus every tool call it requested.
//! The run ends when the model answers without tool calls, when the
//! iteration cap is reached, or when the model call itself fails.

mod session;

pub use session::AgentSession;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::tools::ToolRegistry;

/// Reason why an agent run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalReason {
    /// The model replied without requesting tools
    Completed,
    /// Hit the iteration cap
    MaxIterations,
    /// The chat completion call failed
    LlmError,
}

/// Result of one agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub terminal_reason: TerminalReason,
    /// Text of the completing reply, if the run completed.
    pub final_answer: Option<String>,
    /// Number of model calls made.
    pub iterations: usize,
    /// Tool calls executed, as `name args` lines.
    pub tool_calls: Vec<String>,
    /// Error chain of the failed model call.
    pub error: Option<String>,
}

impl AgentOutcome {
    pub fn is_completed(&self) -> bool {
        self.terminal_reason == TerminalReason::Completed
    }
}

pub struct DataAgent {
    llm: Arc<dyn LlmClient>,
    model: String,
    registry: ToolRegistry,
    max_iterations: usize,
}

impl DataAgent {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            llm,
            model: model.into(),
            registry: ToolRegistry::new(),
            max_iterations,
        }
    }

    fn build_system_prompt(&self, session: &AgentSession) -> String {
        let tool_descriptions = self
            .registry
            .list_tools()
            .iter()
            .map(|t| format!("- **{}**: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let datasets = session.datasets.names().join(", ");

        format!(
            r#"You are a data processing assistant for a physics lab report.
Loaded datasets: {datasets}

## Available Tools
{tool_descriptions}

## Rules
1. Inspect a dataset before transforming it
2. Use tools to do the processing - don't just describe what to do
3. Check each error message and fix the call instead of repeating it
4. Do not compute uncertainties
5. After all tasks, record the results, figure names and what they show with write_log
6. Then reply with a short summary and no tool calls"#,
            datasets = datasets,
            tool_descriptions = tool_descriptions
        )
    }

    /// User message seeding the run.
    pub fn task_message(tasks: &str, description: Option<&str>) -> String {
        let mut message = format!(
            "Complete the following data processing tasks:\n{}\n\n\
             After all tasks are done, call write_log with the results.",
            tasks.trim()
        );
        if let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) {
            message.push_str("\n\nDescription of the uploaded data: ");
            message.push_str(description);
        }
        message
    }

    /// Run the agent loop over `session` until completion or the cap.
    pub async fn run(&self, task: &str, session: &mut AgentSession) -> AgentOutcome {
        let mut tool_log = Vec::new();

        let mut messages = vec![
            ChatMessage::system(self.build_system_prompt(session)),
            ChatMessage::user(task),
        ];

        let tool_schemas = self.registry.get_tool_schemas();
        let options = ChatOptions::temperature(0.0);

        for iteration in 0..self.max_iterations {
            tracing::debug!("DataAgent iteration {}", iteration + 1);

            let response = match self
                .llm
                .chat_completion(&self.model, &messages, Some(&tool_schemas), options)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Agent model call failed: {:#}", e);
                    return AgentOutcome {
                        terminal_reason: TerminalReason::LlmError,
                        final_answer: None,
                        iterations: iteration + 1,
                        tool_calls: tool_log,
                        error: Some(format!("{:#}", e)),
                    };
                }
            };

            if let Some(usage) = response.usage {
                tracing::debug!(
                    "finish_reason={:?} tokens={}",
                    response.finish_reason,
                    usage.total()
                );
            }

            if let Some(tool_calls) = response.tool_calls.filter(|calls| !calls.is_empty()) {
                messages.push(ChatMessage::assistant_tool_calls(
                    response.content.clone(),
                    tool_calls.clone(),
                ));

                for tool_call in &tool_calls {
                    let name = &tool_call.function.name;
                    let args = &tool_call.function.arguments;
                    tracing::debug!("Tool call {} {}", name, args);
                    tool_log.push(format!("{} {}", name, args));

                    let observation = self.registry.observe(name, args, session).await;
                    messages.push(ChatMessage::tool_result(tool_call.id.clone(), observation));
                }

                continue;
            }

            tracing::info!("Data agent finished after {} iterations", iteration + 1);
            return AgentOutcome {
                terminal_reason: TerminalReason::Completed,
                final_answer: Some(response.content.unwrap_or_default()),
                iterations: iteration + 1,
                tool_calls: tool_log,
                error: None,
            };
        }

        tracing::warn!("Max iterations ({}) reached", self.max_iterations);
        AgentOutcome {
            terminal_reason: TerminalReason::MaxIterations,
            final_answer: None,
            iterations: self.max_iterations,
            tool_calls: tool_log,
            error: None,
        }
    }
}
