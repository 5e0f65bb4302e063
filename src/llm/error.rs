//! Errors of the chat-completions endpoint and the retry policy applied to them.
//!
//! The endpoint itself promises nothing about retries. `RetryPolicy` comes
//! from `llm.max_retries` and allows a single attempt unless configured.

use std::time::Duration;

use thiserror::Error;

/// What went wrong with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    Server,
    /// Any other 4xx: bad request, auth, unknown model
    Client,
    /// Connection failure or timeout
    Network,
    /// Body is not a chat completion
    Parse,
}

impl LlmErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            400..=499 => Self::Client,
            _ => Self::Server,
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Server | Self::Network)
    }

    fn base_delay(self) -> Duration {
        match self {
            Self::RateLimited => Duration::from_secs(5),
            Self::Server => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        }
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::RateLimited => "rate limited",
            Self::Server => "server error",
            Self::Client => "client error",
            Self::Network => "network error",
            Self::Parse => "unreadable response",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
#[error("{kind}{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Server-provided `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Error for a non-success response.
    pub fn http(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        Self {
            kind: LlmErrorKind::from_status(status),
            status: Some(status),
            message: body.trim().to_string(),
            retry_after,
        }
    }
}

/// How many times, and for how long, transient failures are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Total time budget for waiting between attempts.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            max_wait: Duration::from_secs(120),
        }
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(60);

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based),
    /// or `None` to give up. `waited` is the time already spent on the request.
    ///
    /// `Retry-After` wins over exponential backoff; both are capped by the
    /// remaining wait budget.
    pub fn backoff(&self, error: &LlmError, attempt: u32, waited: Duration) -> Option<Duration> {
        if !error.kind.is_transient() || attempt >= self.max_retries {
            return None;
        }
        let delay = error.retry_after.unwrap_or_else(|| {
            error
                .kind
                .base_delay()
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(MAX_BACKOFF)
        });
        let delay = delay.min(self.max_wait.saturating_sub(waited));
        (!delay.is_zero()).then_some(delay)
    }
}
