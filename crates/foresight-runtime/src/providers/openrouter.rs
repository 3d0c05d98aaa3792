//! OpenRouter chat-completions backend.
//!
//! OpenRouter speaks the OpenAI wire format and fronts many model vendors, so
//! one backend reaches every model in the registry.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

use super::{
    secrets::{ApiCredential, CredentialSource},
    BackendError, ChatMessage, CompletionRequest, ModelBackend,
};
use crate::config::{ApiConfig, API_KEY_ENV};

/// OpenRouter backend.
///
/// The API key is held as an [`ApiCredential`] and exposed only when the
/// `Authorization` header is built.
pub struct OpenRouterBackend {
    credential: ApiCredential,
    base_url: String,
    referer: String,
    title: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenRouterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterBackend")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenRouterBackend {
    /// Build from the `api` config section, reading the key from config or
    /// `OPENROUTER_API_KEY`.
    pub fn from_config(config: &ApiConfig) -> Result<Self, BackendError> {
        let credential = ApiCredential::from_config_or_env(
            config.api_key.as_deref(),
            API_KEY_ENV,
            "OpenRouter API key",
        )?;
        Self::with_credential(credential, config)
    }

    /// Build with an explicit key.
    pub fn new(api_key: impl Into<String>, config: &ApiConfig) -> Result<Self, BackendError> {
        let credential =
            ApiCredential::new(api_key, CredentialSource::Programmatic, "OpenRouter API key");
        Self::with_credential(credential, config)
    }

    fn with_credential(credential: ApiCredential, config: &ApiConfig) -> Result<Self, BackendError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(BackendError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            credential,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            referer: config.referer.clone(),
            title: config.title.clone(),
            timeout: config.timeout,
            client,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Connection(e.to_string())
        }
    }
}

/// OpenRouter request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugins: Option<Vec<Plugin>>,
}

#[derive(Debug, Serialize)]
struct Plugin {
    id: &'static str,
}

impl<'a> ChatRequest<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            plugins: request.web_search.then(|| vec![Plugin { id: "web" }]),
        }
    }
}

/// Classify a body that failed to parse as JSON.
fn non_json_error(status: u16, body: &str) -> BackendError {
    let snippet: String = body.chars().take(200).collect();
    if status == 429 || (500..600).contains(&status) {
        BackendError::Status {
            status,
            body: snippet,
        }
    } else {
        BackendError::InvalidResponse(format!("HTTP {status}: {snippet}"))
    }
}

#[async_trait]
impl ModelBackend for OpenRouterBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<JsonValue, BackendError> {
        let body = ChatRequest::from_request(request);

        // Only expose the credential here, at the point of use
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        debug!(model = %request.model, status, bytes = text.len(), "OpenRouter response");

        // Error payloads are JSON too; the client decides what they mean
        serde_json::from_str(&text).map_err(|_| non_json_error(status, &text))
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(BackendError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(body["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}
