//! # foresight-runtime
//!
//! Async execution layer for ensemble forecasting.
//!
//! This crate owns everything that touches the network or the clock:
//! - [`ResponseCache`]: TTL cache of successful answers keyed by model and prompt
//! - [`QueryClient`]: one model query with timeout, retry and cache
//! - [`EnsembleScheduler`]: bounded fan-out of many queries with progress events
//!
//! Numeric aggregation stays in `foresight-core`, which never performs I/O.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use foresight_runtime::{DryRunBackend, EnsembleScheduler, QueryClient};
//!
//! let client = QueryClient::new(Arc::new(DryRunBackend::new()));
//! let scheduler = EnsembleScheduler::new(Arc::new(client));
//!
//! let models = vec!["x-ai/grok-4".to_string(), "openai/gpt-5-chat".to_string()];
//! let results = scheduler.run(&models, "Will it rain?", 5, 3).await?;
//! let stats = foresight_core::aggregate(&results);
//! ```

use std::sync::Arc;
use thiserror::Error;

use foresight_core::CallResult;

pub mod cache;
pub mod client;
pub mod config;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod usage;

#[cfg(test)]
mod testing;

pub use cache::{cache_key, CacheEntry, CacheError, CacheStats, ResponseCache};
pub use client::{QueryClient, QueryOptions};
pub use config::{ConfigError, RuntimeConfig};
pub use progress::{
    format_duration, ChannelProgress, EtaTracker, ModelProgress, NoopProgress, ProgressEvent,
    ProgressSink,
};
pub use prompts::{build_forecast_prompt, ForecastQuestion};
pub use providers::{BackendError, CompletionRequest, DryRunBackend, ModelBackend};
pub use registry::{ModelInfo, ModelRegistry, TokenFloor};
pub use retry::RetryPolicy;
pub use scheduler::EnsembleScheduler;
pub use usage::RunUsage;

#[cfg(feature = "openrouter")]
pub use providers::OpenRouterBackend;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Every call failed or was refused. The results are kept for reporting.
    #[error("No successful model responses out of {} calls", .results.len())]
    NoSuccessfulCalls { results: Vec<CallResult> },

    #[error("Invalid run: {0}")]
    InvalidRun(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RuntimeError {
    /// Results attached to the error, if any.
    pub fn results(&self) -> Option<&[CallResult]> {
        match self {
            RuntimeError::NoSuccessfulCalls { results } => Some(results),
            _ => None,
        }
    }
}

/// Build the response cache described by `config`, restoring its snapshot
/// when one is configured. `None` when caching is disabled.
pub async fn open_cache(config: &RuntimeConfig) -> Result<Option<Arc<ResponseCache>>, RuntimeError> {
    if !config.cache.enabled {
        return Ok(None);
    }
    let cache = ResponseCache::new(config.cache.max_entries, config.cache.ttl);
    if let Some(path) = &config.cache.path {
        cache.load_snapshot(path).await?;
    }
    Ok(Some(Arc::new(cache)))
}
