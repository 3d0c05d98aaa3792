//! Scripted backend for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::providers::{BackendError, CompletionRequest, ModelBackend};

/// A completion body with `content` as the first choice.
pub fn reply(content: &str) -> JsonValue {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20 }
    })
}

/// A provider error payload.
pub fn error_payload(message: &str) -> JsonValue {
    json!({ "error": { "message": message, "code": 400 } })
}

/// Replays queued outcomes per model and records what it was asked.
///
/// When a model's queue is empty the default reply is served.
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Result<JsonValue, BackendError>>>>,
    default_reply: JsonValue,
    delay: Duration,
    requests: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_reply: reply("HAUPTPROGNOSE: 42%"),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_default_reply(mut self, body: JsonValue) -> Self {
        self.default_reply = body;
        self
    }

    /// Every call takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue an outcome for `model`.
    pub fn push(&self, model: &str, outcome: Result<JsonValue, BackendError>) -> &Self {
        self.scripts
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.model == model).count()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    /// Highest number of calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the call is cancelled by a timeout.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<JsonValue, BackendError> {
        self.requests.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .scripts
            .lock()
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(self.default_reply.clone()));
        outcome
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let mut models: Vec<String> = self.scripts.lock().keys().cloned().collect();
        models.sort();
        Ok(models)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
