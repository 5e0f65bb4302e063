//! Chat-model boundary.
//!
//! Everything that talks to a model goes through [`LlmClient`]. The wire
//! types follow the OpenAI chat-completions schema, including image parts,
//! which the book segmenter uses to show scanned pages to a vision model.

mod error;
mod openai;
#[cfg(test)]
pub(crate) mod scripted;

pub use error::{LlmError, LlmErrorKind, RetryPolicy};
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One element of a multimodal message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `https:` or inline `data:` URL.
    pub url: String,
}

/// Plain text, or text and images.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The plain text, or the first text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(parts) => parts.iter().find_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on `Role::Tool` messages: the call this observation answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, text: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// A prompt followed by one image.
    pub fn with_image(role: Role, prompt: impl Into<String>, image_url: impl Into<String>) -> Self {
        let parts = vec![
            ContentPart::Text {
                text: prompt.into(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_url.into(),
                },
            },
        ];
        ChatMessage {
            content: Some(MessageContent::Parts(parts)),
            ..Self::text(role, "")
        }
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.map(MessageContent::Text),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Observation fed back for a tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ChatMessage {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::text(Role::Tool, output)
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        self.content.as_ref().and_then(MessageContent::as_text)
    }
}

/// A function call the model asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as produced by the model; not validated. Absent for
    /// argument-less calls on some providers.
    #[serde(default)]
    pub arguments: String,
}

/// A tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// First choice of a chat completion.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Per-request sampling settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    /// `None` leaves the provider default, as the page prompts do.
    pub temperature: Option<f64>,
}

impl ChatOptions {
    pub fn temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One chat completion. `tools`, when given, are offered with automatic choice.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse>;
}

/// Single-shot request returning the assistant's text.
///
/// An empty or missing content is reported as an error: every caller of this
/// helper needs text to continue.
pub async fn complete_text(
    llm: &dyn LlmClient,
    model: &str,
    messages: &[ChatMessage],
    options: ChatOptions,
) -> anyhow::Result<String> {
    let response = llm.chat_completion(model, messages, None, options).await?;
    response
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Model {} returned an empty response", model))
}

/// Remove a surrounding markdown code fence (```` ```latex ... ``` ````) if present.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim().to_string();
    }
    trimmed.to_string()
}

/// Trim whitespace and any quote characters wrapping a short model answer.
pub fn strip_quotes(text: &str) -> String {
    const QUOTES: &[char] = &[
        '"', '\'', '`', '“', '”', '‘', '’', '「', '」', '《', '》',
    ];
    text.trim().trim_matches(QUOTES).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_language_tag() {
        let raw = "```latex\n\\section{Abstract}\nText\n```";
        assert_eq!(strip_code_fence(raw), "\\section{Abstract}\nText");
    }

    #[test]
    fn strip_code_fence_leaves_plain_text() {
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[test]
    fn strip_quotes_handles_mixed_quotes() {
        assert_eq!(strip_quotes(" 'Spring Constant' "), "Spring Constant");
        assert_eq!(strip_quotes("“弹簧劲度系数”"), "弹簧劲度系数");
    }

    #[test]
    fn image_message_serializes_as_parts() {
        let msg = ChatMessage::with_image(Role::User, "read", "data:image/png;base64,AAAA");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn tool_result_answers_its_call() {
        let json = serde_json::to_value(ChatMessage::tool_result("call_1", "ok")).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["content"], "ok");
        assert!(json.get("tool_calls").is_none());
    }
}
