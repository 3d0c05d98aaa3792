//! Core data types for ensemble forecasting.
//!
//! A forecast run produces one [`CallResult`] per (model, iteration) pair.
//! The aggregator folds those into a single [`EnsembleStatistics`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::extraction::ResponseDetails;

/// Lowest valid probability, in percent.
pub const MIN_PROBABILITY: f64 = 0.0;

/// Highest valid probability, in percent.
pub const MAX_PROBABILITY: f64 = 100.0;

/// Returns true if `value` is a finite probability in `[0, 100]`.
pub fn is_valid_probability(value: f64) -> bool {
    value.is_finite() && (MIN_PROBABILITY..=MAX_PROBABILITY).contains(&value)
}

/// Terminal status of one model query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// The backend answered. A probability may or may not have been found.
    Success,
    /// The backend reported an error, or the call failed for a non-timeout reason.
    Error,
    /// Every attempt ran past the per-call deadline.
    Timeout,
    /// The model refused to answer on safety grounds.
    Rejected,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Success => write!(f, "success"),
            CallStatus::Error => write!(f, "error"),
            CallStatus::Timeout => write!(f, "timeout"),
            CallStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    #[default]
    Api,
    Cache,
}

/// Token counts reported by the backend. Missing fields are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Total tokens, falling back to prompt + completion when the backend
    /// did not report a total.
    pub fn total(&self) -> u32 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens.saturating_add(self.completion_tokens)
        }
    }
}

/// Outcome of one model query.
///
/// `probability` is only ever `Some` with a value in `[0, 100]`, and a
/// `Success` result always carries `raw_text` (possibly empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    /// Backend model identifier, e.g. `openai/gpt-5-chat`.
    pub model_id: String,

    /// 1-based position within this model's batch.
    pub iteration: u32,

    /// When the query started.
    pub timestamp: DateTime<Utc>,

    /// Wall-clock seconds spent on the query, including retries.
    pub response_time_seconds: f64,

    /// Full model output, absent on failure.
    pub raw_text: Option<String>,

    /// Extracted probability in percent.
    pub probability: Option<f64>,

    #[serde(default)]
    pub usage: TokenUsage,

    pub status: CallStatus,

    #[serde(default)]
    pub source: ResultSource,

    /// Error message for `Error` and `Timeout` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Backend attempts made for this result (0 for cache hits).
    #[serde(default)]
    pub attempts: u32,

    /// Opaque `logprobs` payload from the first choice, when the backend sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_probabilities: Option<serde_json::Value>,

    /// Structured sections found in the response text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ResponseDetails>,
}

impl CallResult {
    /// A successful answer. Out-of-range probabilities are dropped.
    pub fn success(
        model_id: impl Into<String>,
        raw_text: impl Into<String>,
        probability: Option<f64>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            iteration: 1,
            timestamp: Utc::now(),
            response_time_seconds: 0.0,
            raw_text: Some(raw_text.into()),
            probability: probability.filter(|p| is_valid_probability(*p)),
            usage,
            status: CallStatus::Success,
            source: ResultSource::Api,
            error: None,
            attempts: 1,
            log_probabilities: None,
            details: None,
        }
    }

    /// A safety refusal. The refusal text is kept, the probability is not.
    pub fn rejected(model_id: impl Into<String>, raw_text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            status: CallStatus::Rejected,
            probability: None,
            ..Self::success(model_id, raw_text, None, usage)
        }
    }

    /// A failed call.
    pub fn error(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            iteration: 1,
            timestamp: Utc::now(),
            response_time_seconds: 0.0,
            raw_text: None,
            probability: None,
            usage: TokenUsage::default(),
            status: CallStatus::Error,
            source: ResultSource::Api,
            error: Some(message.into()),
            attempts: 1,
            log_probabilities: None,
            details: None,
        }
    }

    /// A call whose deadline passed. `response_time_seconds` is the configured timeout.
    pub fn timeout(model_id: impl Into<String>, timeout_seconds: f64) -> Self {
        Self {
            status: CallStatus::Timeout,
            response_time_seconds: timeout_seconds,
            ..Self::error(model_id, "Request timeout")
        }
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_timing(mut self, timestamp: DateTime<Utc>, response_time_seconds: f64) -> Self {
        self.timestamp = timestamp;
        self.response_time_seconds = response_time_seconds;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    /// True for `Error` and `Timeout`.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, CallStatus::Error | CallStatus::Timeout)
    }
}

/// Per-model breakdown inside [`EnsembleStatistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    /// Attempts recorded for this model, regardless of status.
    pub count: usize,

    /// Results with status `Success`.
    pub success_count: usize,

    /// Results with status `Rejected`.
    pub rejected_count: usize,

    /// Results with status `Error` or `Timeout`.
    pub failed_count: usize,

    /// Results that carried a probability.
    pub probability_count: usize,

    pub mean: Option<f64>,
    pub median: Option<f64>,

    /// Sample standard deviation. Absent with fewer than two probabilities.
    pub std: Option<f64>,
}

/// Ensemble-level statistics for one forecast run.
///
/// Every numeric field is `None` when no call produced a probability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleStatistics {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub rejected_queries: usize,

    pub mean: Option<f64>,
    pub median: Option<f64>,

    /// Sample standard deviation. Absent with fewer than two probabilities.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,

    /// Mean with 10% of the values trimmed from each end.
    pub trimmed_mean: Option<f64>,

    /// Values outside the Tukey fences (1.5 x IQR).
    pub outlier_count: usize,

    pub calibrated_probability: Option<f64>,
    pub bayesian_probability: Option<f64>,
    pub consistency_weighted_probability: Option<f64>,

    /// `1 - std / 50`, clamped to `[0, 1]`.
    pub agreement_metric: Option<f64>,

    pub model_stats: BTreeMap<String, ModelStats>,
}

impl EnsembleStatistics {
    /// The headline ensemble estimate.
    pub fn ensemble_probability(&self) -> Option<f64> {
        self.mean
    }

    /// True when at least one probability went into the statistics.
    pub fn has_data(&self) -> bool {
        self.mean.is_some()
    }

    /// Fraction of attempted calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.successful_queries as f64 / self.total_queries as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_drops_out_of_range_probability() {
        let result = CallResult::success("m", "text", Some(150.0), TokenUsage::default());
        assert_eq!(result.probability, None);
        assert_eq!(result.status, CallStatus::Success);

        let result = CallResult::success("m", "text", Some(f64::NAN), TokenUsage::default());
        assert_eq!(result.probability, None);
    }

    #[test]
    fn test_timeout_records_configured_deadline() {
        let result = CallResult::timeout("m", 120.0);
        assert_eq!(result.status, CallStatus::Timeout);
        assert_eq!(result.response_time_seconds, 120.0);
        assert!(result.raw_text.is_none());
        assert!(result.is_failure());
    }

    #[test]
    fn test_rejected_has_no_probability() {
        let result = CallResult::rejected("m", "I cannot comply with this", TokenUsage::default());
        assert_eq!(result.status, CallStatus::Rejected);
        assert!(result.probability.is_none());
        assert!(result.raw_text.is_some());
        assert!(!result.is_failure());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&CallStatus::Rejected).unwrap();
        assert_eq!(json, "\"rejected\"");
        let json = serde_json::to_string(&ResultSource::Cache).unwrap();
        assert_eq!(json, "\"cache\"");
    }

    #[test]
    fn test_token_usage_total_fallback() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 0,
        };
        assert_eq!(usage.total(), 150);

        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 160,
        };
        assert_eq!(usage.total(), 160);
    }

    #[test]
    fn test_success_rate() {
        let stats = EnsembleStatistics {
            total_queries: 4,
            successful_queries: 3,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 0.75);
        assert_eq!(EnsembleStatistics::default().success_rate(), 0.0);
    }
}
