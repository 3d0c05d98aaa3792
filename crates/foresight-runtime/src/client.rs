//! Model query client.
//!
//! One [`QueryClient::query`] call produces exactly one [`CallResult`]:
//!
//! 1. Serve from the response cache when allowed
//! 2. Raise the token budget to the model family's floor
//! 3. Send the request, retrying transient failures with backoff
//! 4. Interpret the body: error payload, refusal, or answer
//! 5. Write successful answers back to the cache
//!
//! Failures never escape as `Err`; they become `Error`, `Timeout` or
//! `Rejected` results.

use backon::Retryable;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use foresight_core::{
    extract_details, extract_probability, is_refusal, CallResult, ResultSource, TokenUsage,
};

use crate::cache::ResponseCache;
use crate::config::{default_token_floors, EnsembleConfig, RuntimeConfig};
use crate::providers::{BackendError, CompletionRequest, ModelBackend};
use crate::registry::{apply_token_floor, ModelRegistry, TokenFloor};
use crate::retry::RetryPolicy;

const CONNECTION_TEST_PROMPT: &str = "Say 'test successful' if you can read this.";

/// Per-query knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub enable_web_search: bool,

    /// Read from and write to the response cache.
    pub use_cache: bool,

    /// Skip the cache read but still write the fresh answer.
    pub force_refresh: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from(&EnsembleConfig::default())
    }
}

impl From<&EnsembleConfig> for QueryOptions {
    fn from(config: &EnsembleConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            enable_web_search: config.enable_web_search,
            use_cache: true,
            force_refresh: false,
        }
    }
}

/// Queries one model at a time against a [`ModelBackend`].
pub struct QueryClient {
    backend: Arc<dyn ModelBackend>,
    cache: Option<Arc<ResponseCache>>,
    registry: Arc<ModelRegistry>,
    token_floors: Vec<TokenFloor>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl QueryClient {
    /// A client with default retry, timeout and token floors and no cache.
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            cache: None,
            registry: Arc::new(ModelRegistry::builtin()),
            token_floors: default_token_floors(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(120),
        }
    }

    /// A client configured from `config`. The cache is passed in so it can
    /// be shared and persisted by the caller.
    pub fn from_config(
        backend: Arc<dyn ModelBackend>,
        config: &RuntimeConfig,
        cache: Option<Arc<ResponseCache>>,
    ) -> Self {
        Self {
            backend,
            cache,
            registry: Arc::new(ModelRegistry::from_config(&config.registry)),
            token_floors: config.token_floors.clone(),
            retry: RetryPolicy::from(&config.retry),
            timeout: config.api.timeout,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_token_floors(mut self, floors: Vec<TokenFloor>) -> Self {
        self.token_floors = floors;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for a single attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Query `model_id` once. Never fails; see the module docs.
    pub async fn query(&self, model_id: &str, prompt: &str, options: &QueryOptions) -> CallResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let cache = self.cache.as_ref().filter(|_| options.use_cache);

        if let Some(cache) = cache.filter(|_| !options.force_refresh) {
            if let Some(hit) = cache.get(model_id, prompt).await {
                info!(model = %model_id, "Cache hit");
                return CallResult {
                    source: ResultSource::Cache,
                    attempts: 0,
                    ..hit
                };
            }
        }

        let max_tokens = apply_token_floor(&self.token_floors, model_id, options.max_tokens);
        if max_tokens != options.max_tokens {
            debug!(
                model = %model_id,
                requested = options.max_tokens,
                effective = max_tokens,
                "Raised token budget to model floor"
            );
        }
        let web_search = options.enable_web_search && self.registry.supports_web_search(model_id);

        let request = CompletionRequest::new(model_id, prompt)
            .with_temperature(options.temperature)
            .with_max_tokens(max_tokens)
            .with_web_search(web_search);

        let attempts = AtomicU32::new(0);
        let outcome = self.send_with_retry(&request, &attempts).await;
        let attempts = attempts.load(Ordering::SeqCst);
        let elapsed = clock.elapsed().as_secs_f64();

        let result = match outcome {
            Ok(body) => self.interpret(model_id, &body).with_timing(started_at, elapsed),
            Err(BackendError::Timeout(_)) => {
                error!(model = %model_id, attempts, "Model query timed out");
                let timeout = self.timeout.as_secs_f64();
                CallResult::timeout(model_id, timeout).with_timing(started_at, timeout)
            }
            Err(e) => {
                error!(model = %model_id, attempts, error = %e, "Model query failed");
                CallResult::error(model_id, e.to_string()).with_timing(started_at, elapsed)
            }
        }
        .with_attempts(attempts);

        if let Some(cache) = cache.filter(|_| result.is_success()) {
            cache.set(model_id, prompt, result.clone()).await;
        }
        result
    }

    /// Send with retries. `attempts` counts every backend call made.
    async fn send_with_retry(
        &self,
        request: &CompletionRequest,
        attempts: &AtomicU32,
    ) -> Result<JsonValue, BackendError> {
        let started = Instant::now();
        let policy = &self.retry;

        (move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            self.attempt(request).await
        })
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &BackendError| policy.allows_retry(e, started))
        .notify(|e: &BackendError, delay: Duration| {
            warn!(
                model = %request.model,
                attempt = attempts.load(Ordering::SeqCst),
                error = %e,
                delay = ?delay,
                "Retrying model query"
            );
        })
        .await
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<JsonValue, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.complete(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    /// Turn a completion body into a result.
    ///
    /// A body without choices is read as an empty answer: the call succeeds
    /// with empty text and no probability.
    fn interpret(&self, model_id: &str, body: &JsonValue) -> CallResult {
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            warn!(model = %model_id, error = %message, "Backend returned an error payload");
            return CallResult::error(model_id, message);
        }

        let choice = body.pointer("/choices/0");
        if choice.is_none() {
            warn!(model = %model_id, "Response has no choices");
        }

        let content = choice
            .and_then(|c| c.pointer("/message/content"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let usage = parse_usage(body);
        let log_probabilities = choice
            .and_then(|c| c.get("logprobs"))
            .filter(|v| !v.is_null())
            .cloned();

        if is_refusal(content) {
            warn!(model = %model_id, "Model refused the prompt");
            return CallResult {
                log_probabilities,
                ..CallResult::rejected(model_id, content, usage)
            };
        }

        let probability = extract_probability(content);
        if probability.is_none() {
            debug!(model = %model_id, chars = content.len(), "No probability found in response");
        }

        CallResult {
            log_probabilities,
            details: extract_details(content),
            ..CallResult::success(model_id, content, probability, usage)
        }
    }

    /// Send a tiny uncached prompt and report whether it succeeded.
    pub async fn test_connection(&self, model_id: &str) -> bool {
        let options = QueryOptions {
            max_tokens: 10,
            enable_web_search: false,
            use_cache: false,
            ..QueryOptions::default()
        };
        let result = self.query(model_id, CONNECTION_TEST_PROMPT, &options).await;
        if !result.is_success() {
            warn!(
                model = %model_id,
                status = %result.status,
                error = result.error.as_deref().unwrap_or(""),
                "Connection test failed"
            );
        }
        result.is_success()
    }

    /// Model ids offered by the backend.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        self.backend.list_models().await
    }
}

fn parse_usage(body: &JsonValue) -> TokenUsage {
    let field = |name: &str| {
        body.pointer(&format!("/usage/{name}"))
            .and_then(JsonValue::as_u64)
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(0)
    };
    TokenUsage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    }
}
