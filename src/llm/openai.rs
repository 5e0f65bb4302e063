//! OpenAI-compatible chat-completions client with caller-configured retry.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::error::{LlmError, LlmErrorKind, RetryPolicy};
use super::{
    ChatMessage, ChatOptions, ChatResponse, LlmClient, TokenUsage, ToolCall, ToolDefinition,
};
use crate::config::LlmConfig;

/// Client for any endpoint speaking the OpenAI `/chat/completions` protocol.
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    /// Build a client from the `llm` configuration section.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::with_max_retries(config.max_retries),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One HTTP round trip, no retry.
    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let what = if e.is_timeout() {
                    "request timed out"
                } else if e.is_connect() {
                    "connection failed"
                } else {
                    "request failed"
                };
                LlmError::new(LlmErrorKind::Network, format!("{}: {}", what, e))
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::new(LlmErrorKind::Network, format!("reading body: {}", e)))?;

        if !status.is_success() {
            return Err(LlmError::http(status.as_u16(), &body, retry_after));
        }
        parse_completion(&body)
    }

    async fn send(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            let error = match self.send_once(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            "{} answered after {} retries ({:?})",
                            request.model,
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            let Some(delay) = self.retry.backoff(&error, attempt, start.elapsed()) else {
                tracing::error!(
                    "Request to {} failed after {} attempt(s): {}",
                    request.model,
                    attempt + 1,
                    error
                );
                return Err(error.into());
            };

            tracing::warn!("Attempt {} failed ({}), retrying in {:?}", attempt + 1, error, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn parse_completion(body: &str) -> Result<ChatResponse, LlmError> {
    let parsed: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::new(LlmErrorKind::Parse, format!("{} in body: {}", e, body))
    })?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::new(LlmErrorKind::Parse, "response has no choices"))?;

    Ok(ChatResponse {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls,
        finish_reason: choice.finish_reason,
        usage: parsed.usage,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            temperature: options.temperature,
        };

        tracing::debug!(
            "Sending chat completion: model={} messages={}",
            model,
            messages.len()
        );

        self.send(&request).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}
