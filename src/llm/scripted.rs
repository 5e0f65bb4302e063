//! Test double replaying canned responses and recording every request.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ChatMessage, ChatOptions, ChatResponse, FunctionCall, LlmClient, ToolCall, ToolDefinition,
};

/// A request seen by the scripted client.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub had_tools: bool,
}

impl RecordedRequest {
    /// Concatenated text of every message, for prompt assertions.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .filter_map(|m| m.text_content())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct ScriptedClient {
    responses: Mutex<VecDeque<anyhow::Result<ChatResponse>>>,
    /// Returned once the queue is drained.
    fallback: Option<ChatResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Client answering every request with plain text, in order.
    pub fn texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(text_response).collect())
    }

    /// Client that answers every request with the same response forever.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failure after the already queued responses.
    pub fn then_fail(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!(message.to_string())));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub fn text_response(text: impl Into<String>) -> ChatResponse {
    ChatResponse {
        content: Some(text.into()),
        finish_reason: Some("stop".to_string()),
        ..Default::default()
    }
}

/// Response requesting a single tool call.
pub fn tool_response(id: &str, name: &str, args: serde_json::Value) -> ChatResponse {
    tool_calls_response(vec![(id, name, args)])
}

pub fn tool_calls_response(calls: Vec<(&str, &str, serde_json::Value)>) -> ChatResponse {
    ChatResponse {
        content: None,
        tool_calls: Some(
            calls
                .into_iter()
                .map(|(id, name, args)| ToolCall {
                    id: id.to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: name.to_string(),
                        arguments: args.to_string(),
                    },
                })
                .collect(),
        ),
        finish_reason: Some("tool_calls".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: options.temperature,
            had_tools: tools.is_some(),
        });

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("scripted client exhausted")),
        }
    }
}
