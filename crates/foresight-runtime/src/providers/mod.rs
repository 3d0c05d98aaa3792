//! Model backend abstractions for foresight-runtime.
//!
//! A backend performs exactly one chat completion per call and hands back the
//! provider's raw JSON. Response interpretation, retries and caching live in
//! the [`QueryClient`](crate::QueryClient), so a backend stays a thin transport.
//!
//! ## Security
//!
//! Backends that need credentials use the [`secrets`] module. See
//! [`ApiCredential`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod dry_run;
pub mod secrets;

#[cfg(feature = "openrouter")]
mod openrouter;

pub use dry_run::DryRunBackend;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "openrouter")]
pub use openrouter::OpenRouterBackend;

/// Errors from model backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    /// Whether the failure may go away on retry.
    ///
    /// Connection failures, timeouts, HTTP 429 and HTTP 5xx are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Connection(_) | BackendError::Timeout(_) => true,
            BackendError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            BackendError::InvalidResponse(_) | BackendError::NotConfigured(_) => false,
        }
    }
}

/// A chat message for a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role, e.g. "user"
    pub role: String,

    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One completion request as sent to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Ask the provider to augment the answer with web search.
    pub web_search: bool,
}

impl CompletionRequest {
    /// A single-turn request with the prompt as the user message.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: 0.7,
            max_tokens: 4000,
            web_search: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    /// Text of the last user message.
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Backend abstraction allows swapping model providers.
///
/// `complete` returns the provider's JSON body even when it carries an
/// `error` object; only transport-level failures are `Err`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Execute one chat completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<serde_json::Value, BackendError>;

    /// Model ids the provider offers.
    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Err(BackendError::NotConfigured(format!(
            "{} does not list models",
            self.name()
        )))
    }

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Connection("reset".into()).is_transient());
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(BackendError::Status { status: 429, body: String::new() }.is_transient());
        assert!(BackendError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!BackendError::Status { status: 401, body: String::new() }.is_transient());
        assert!(!BackendError::InvalidResponse("html".into()).is_transient());
        assert!(!BackendError::NotConfigured("key".into()).is_transient());
    }

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("x-ai/grok-4", "Will it rain?")
            .with_temperature(0.2)
            .with_max_tokens(8000)
            .with_web_search(true);
        assert_eq!(request.prompt(), "Will it rain?");
        assert_eq!(request.messages[0], ChatMessage::user("Will it rain?"));
        assert_eq!(request.max_tokens, 8000);
        assert!(request.web_search);
    }
}
