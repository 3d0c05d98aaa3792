//! Ensemble scheduler.
//!
//! Fans out `models × iterations` queries through one [`QueryClient`] and
//! collects every result. A single semaphore bounds the queries in flight
//! across the whole run, not per model.
//!
//! # Execution Flow
//! 1. Build one future per `(model, iteration)`
//! 2. Each future waits for a permit, then holds it for the whole query
//!    (retries and backoff included)
//! 3. Completions are drained as they arrive; each emits a progress event
//! 4. Results are ordered by model, then iteration, independent of
//!    completion order

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use foresight_core::CallResult;

use crate::client::{QueryClient, QueryOptions};
use crate::progress::{EtaTracker, ModelProgress, NoopProgress, ProgressEvent, ProgressSink};
use crate::RuntimeError;

/// Runs ensembles against a shared query client.
pub struct EnsembleScheduler {
    client: Arc<QueryClient>,
    options: QueryOptions,
    progress: Arc<dyn ProgressSink>,
}

impl EnsembleScheduler {
    pub fn new(client: Arc<QueryClient>) -> Self {
        Self {
            client,
            options: QueryOptions::default(),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Query every model `iterations_per_model` times.
    ///
    /// Returns every result, failures included. Fails with
    /// [`RuntimeError::NoSuccessfulCalls`] only when not a single call
    /// succeeded; the error still carries the results.
    pub async fn run(
        &self,
        models: &[String],
        prompt: &str,
        iterations_per_model: u32,
        concurrency_limit: usize,
    ) -> Result<Vec<CallResult>, RuntimeError> {
        let models = dedup_models(models);
        if models.is_empty() {
            return Err(RuntimeError::InvalidRun("no models given".to_string()));
        }
        if iterations_per_model == 0 {
            return Err(RuntimeError::InvalidRun(
                "iterations_per_model must be at least 1".to_string(),
            ));
        }
        if concurrency_limit == 0 {
            return Err(RuntimeError::InvalidRun(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }

        let total = models.len() * iterations_per_model as usize;
        info!(
            models = models.len(),
            iterations = iterations_per_model,
            total,
            concurrency = concurrency_limit,
            backend = self.client.backend_name(),
            "Starting ensemble run"
        );

        let gate = Semaphore::new(concurrency_limit);
        let gate = &gate;
        let client = &self.client;
        let options = &self.options;

        let mut pending: FuturesUnordered<_> = models
            .iter()
            .enumerate()
            .flat_map(|(index, model)| {
                (1..=iterations_per_model).map(move |iteration| (index, *model, iteration))
            })
            .map(move |(index, model, iteration)| async move {
                let result = match gate.acquire().await {
                    Ok(_permit) => client.query(model, prompt, options).await,
                    Err(_) => CallResult::error(model, "Concurrency gate closed"),
                };
                (index, result.with_iteration(iteration))
            })
            .collect();

        let eta = EtaTracker::start(total);
        let mut counters: BTreeMap<String, ModelProgress> = models
            .iter()
            .map(|m| {
                let progress = ModelProgress {
                    total: iterations_per_model,
                    ..ModelProgress::default()
                };
                (m.to_string(), progress)
            })
            .collect();
        let mut collected: BTreeMap<(usize, u32), CallResult> = BTreeMap::new();

        while let Some((index, result)) = pending.next().await {
            eta.record(1);
            if let Some(counter) = counters.get_mut(&result.model_id) {
                counter.completed += 1;
                if result.is_success() {
                    counter.successful += 1;
                }
            }

            let completed = collected.len() + 1;
            let event = ProgressEvent {
                progress: completed as f64 / total as f64,
                message: format!(
                    "{} #{}: {} ({}/{})",
                    result.model_id, result.iteration, result.status, completed, total
                ),
                completed,
                total,
                model_progress: counters.clone(),
                eta_seconds: eta.eta_seconds(),
            };
            self.progress.on_progress(&event);

            collected.insert((index, result.iteration), result);
        }

        let results: Vec<CallResult> = collected.into_values().collect();
        let successful = results.iter().filter(|r| r.is_success()).count();
        if successful == 0 {
            error!(total, "Ensemble run produced no successful responses");
            return Err(RuntimeError::NoSuccessfulCalls { results });
        }

        info!(
            total,
            successful,
            elapsed = ?eta.elapsed(),
            "Ensemble run finished"
        );
        Ok(results)
    }
}

/// Drop repeated model ids, keeping first occurrences in order.
fn dedup_models(models: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::with_capacity(models.len());
    for model in models {
        if seen.insert(model.as_str()) {
            unique.push(model.as_str());
        } else {
            warn!(model = %model, "Ignoring duplicate model");
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ChannelProgress;
    use crate::providers::BackendError;
    use crate::testing::{error_payload, reply, ScriptedBackend};
    use foresight_core::{Aggregator, CallStatus};
    use std::time::Duration;

    const PROMPT: &str = "Will it rain tomorrow?";

    fn models(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn scheduler(backend: &Arc<ScriptedBackend>) -> EnsembleScheduler {
        EnsembleScheduler::new(Arc::new(QueryClient::new(backend.clone())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_is_global() {
        let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(100)));
        let results = scheduler(&backend)
            .run(&models(&["a", "b", "c"]), PROMPT, 4, 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 12);
        assert_eq!(backend.calls(), 12);
        assert_eq!(backend.max_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_spans_models() {
        let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(100)));
        scheduler(&backend)
            .run(&models(&["a", "b"]), PROMPT, 3, 4)
            .await
            .unwrap();

        assert_eq!(backend.max_in_flight(), 4);
    }

    #[tokio::test]
    async fn test_two_models_one_refusal() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("b", Ok(reply("HAUPTPROGNOSE: 42%")));
        backend.push("b", Ok(reply("I'm sorry, this is against my guidelines.")));

        let results = scheduler(&backend)
            .run(&models(&["a", "b"]), PROMPT, 3, 5)
            .await
            .unwrap();

        let successes: Vec<_> = results.iter().filter(|r| r.is_success()).collect();
        let rejected: Vec<_> = results
            .iter()
            .filter(|r| r.status == CallStatus::Rejected)
            .collect();
        assert_eq!(successes.len(), 5);
        assert!(successes.iter().all(|r| r.probability == Some(42.0)));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].probability, None);

        let stats = Aggregator::new().aggregate(&results);
        assert_eq!(stats.mean, Some(42.0));
        assert_eq!(stats.std, Some(0.0));
        assert_eq!(stats.agreement_metric, Some(1.0));
        assert_eq!(stats.rejected_queries, 1);
        assert_eq!(stats.model_stats["b"].count, 3);
        assert_eq!(stats.model_stats["b"].success_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_reset_recovers_within_run() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("a", Err(BackendError::Connection("connection reset".into())));
        backend.push("a", Err(BackendError::Connection("connection reset".into())));

        let results = scheduler(&backend)
            .run(&models(&["a"]), PROMPT, 1, 1)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CallStatus::Success);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("a", Ok(error_payload("quota exceeded")));
        backend.push("a", Err(BackendError::NotConfigured("no key".into())));

        let results = scheduler(&backend)
            .run(&models(&["a", "b"]), PROMPT, 3, 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 6);
        assert_eq!(results.iter().filter(|r| r.is_failure()).count(), 2);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 4);
    }

    #[tokio::test]
    async fn test_zero_successes_is_run_failure() {
        let backend =
            Arc::new(ScriptedBackend::new().with_default_reply(error_payload("invalid model")));

        let err = scheduler(&backend)
            .run(&models(&["a", "b"]), PROMPT, 2, 2)
            .await
            .unwrap_err();

        match err {
            RuntimeError::NoSuccessfulCalls { results } => {
                assert_eq!(results.len(), 4);
                assert!(results.iter().all(|r| r.status == CallStatus::Error));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_results_ordered_by_model_then_iteration() {
        let backend = Arc::new(ScriptedBackend::new());
        let results = scheduler(&backend)
            .run(&models(&["z", "a", "z"]), PROMPT, 3, 3)
            .await
            .unwrap();

        let keys: Vec<(&str, u32)> = results
            .iter()
            .map(|r| (r.model_id.as_str(), r.iteration))
            .collect();
        assert_eq!(
            keys,
            vec![("z", 1), ("z", 2), ("z", 3), ("a", 1), ("a", 2), ("a", 3)]
        );
    }

    #[tokio::test]
    async fn test_progress_events() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("b", Ok(error_payload("boom")));
        let (sink, mut rx) = ChannelProgress::new();

        scheduler(&backend)
            .with_progress(Arc::new(sink))
            .run(&models(&["a", "b"]), PROMPT, 2, 2)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(events.windows(2).all(|w| w[0].progress < w[1].progress));

        let last = events.last().unwrap();
        assert_eq!(last.progress, 1.0);
        assert_eq!(last.completed, 4);
        assert_eq!(last.eta_seconds, Some(0));
        assert_eq!(
            last.model_progress["a"],
            ModelProgress { completed: 2, total: 2, successful: 2 }
        );
        assert_eq!(
            last.model_progress["b"],
            ModelProgress { completed: 2, total: 2, successful: 1 }
        );
    }

    #[tokio::test]
    async fn test_cached_second_run() {
        let backend = Arc::new(ScriptedBackend::new());
        let client = QueryClient::new(backend.clone())
            .with_cache(Arc::new(crate::cache::ResponseCache::default()));
        let scheduler = EnsembleScheduler::new(Arc::new(client));

        scheduler.run(&models(&["a"]), PROMPT, 2, 1).await.unwrap();
        let second = scheduler.run(&models(&["a"]), PROMPT, 2, 1).await.unwrap();

        // Both iterations share one key, so the first run already filled it
        assert_eq!(backend.calls(), 1);
        assert!(second
            .iter()
            .all(|r| r.source == foresight_core::ResultSource::Cache));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let backend = Arc::new(ScriptedBackend::new());
        let scheduler = scheduler(&backend);

        assert!(matches!(
            scheduler.run(&[], PROMPT, 1, 1).await,
            Err(RuntimeError::InvalidRun(_))
        ));
        assert!(matches!(
            scheduler.run(&models(&["a"]), PROMPT, 0, 1).await,
            Err(RuntimeError::InvalidRun(_))
        ));
        assert!(matches!(
            scheduler.run(&models(&["a"]), PROMPT, 1, 0).await,
            Err(RuntimeError::InvalidRun(_))
        ));
        assert_eq!(backend.calls(), 0);
    }
}
