//! Aggregator: folds per-call results into ensemble statistics.
//!
//! The aggregator is deterministic and pure. It receives the complete
//! result set of a run and produces one [`EnsembleStatistics`]:
//!
//! - descriptive statistics over every extracted probability
//! - a calibrated estimate (see [`Calibration`])
//! - a Bayesian estimate: inverse-variance weighting of per-model means
//! - a consistency-weighted estimate: per-model means weighted by `1 / (std + ε)`
//! - an agreement score, `1 - std / 50` clamped to `[0, 1]`
//! - per-model breakdowns, including refusal and failure counts
//!
//! Results without a probability still count toward query totals and per-model
//! attempt counts, but never enter numeric aggregation.

use std::collections::BTreeMap;

use crate::calibration::Calibration;
use crate::stats;
use crate::types::{CallResult, CallStatus, EnsembleStatistics, ModelStats};

/// Added to per-model std before inverting, in percentage points.
pub const DEFAULT_CONSISTENCY_EPSILON: f64 = 1.0;

/// Added to per-model variance before inverting.
pub const DEFAULT_VARIANCE_EPSILON: f64 = 1e-6;

/// Share of values trimmed from each end for `trimmed_mean`.
pub const TRIM_PROPORTION: f64 = 0.1;

/// Std at which agreement reaches zero.
pub const AGREEMENT_SCALE: f64 = 50.0;

/// Ensemble aggregator.
#[derive(Debug, Clone)]
pub struct Aggregator {
    calibration: Calibration,
    consistency_epsilon: f64,
    variance_epsilon: f64,
}

/// Probabilities and counters collected for one model.
#[derive(Default)]
struct ModelSamples {
    probabilities: Vec<f64>,
    count: usize,
    success_count: usize,
    rejected_count: usize,
    failed_count: usize,
}

impl ModelSamples {
    fn record(&mut self, result: &CallResult) {
        self.count += 1;
        match result.status {
            CallStatus::Success => self.success_count += 1,
            CallStatus::Rejected => self.rejected_count += 1,
            CallStatus::Error | CallStatus::Timeout => self.failed_count += 1,
        }
        if let Some(p) = result.probability {
            self.probabilities.push(p);
        }
    }

    fn stats(&self) -> ModelStats {
        ModelStats {
            count: self.count,
            success_count: self.success_count,
            rejected_count: self.rejected_count,
            failed_count: self.failed_count,
            probability_count: self.probabilities.len(),
            mean: stats::mean(&self.probabilities),
            median: stats::median(&self.probabilities),
            std: stats::sample_std(&self.probabilities),
        }
    }
}

impl Aggregator {
    /// Create an aggregator with identity calibration.
    pub fn new() -> Self {
        Self {
            calibration: Calibration::Identity,
            consistency_epsilon: DEFAULT_CONSISTENCY_EPSILON,
            variance_epsilon: DEFAULT_VARIANCE_EPSILON,
        }
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_consistency_epsilon(mut self, epsilon: f64) -> Self {
        self.consistency_epsilon = epsilon;
        self
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Aggregate a complete result set.
    ///
    /// Never panics: an empty or all-absent input yields statistics whose
    /// numeric fields are all `None`.
    pub fn aggregate(&self, results: &[CallResult]) -> EnsembleStatistics {
        let mut per_model: BTreeMap<&str, ModelSamples> = BTreeMap::new();
        for result in results {
            per_model
                .entry(result.model_id.as_str())
                .or_default()
                .record(result);
        }

        let values: Vec<f64> = results.iter().filter_map(|r| r.probability).collect();

        let model_stats: BTreeMap<String, ModelStats> = per_model
            .iter()
            .map(|(model, samples)| (model.to_string(), samples.stats()))
            .collect();

        let mean = stats::mean(&values);
        let std = stats::sample_std(&values);

        let statistics = EnsembleStatistics {
            total_queries: results.len(),
            successful_queries: count_status(results, CallStatus::Success),
            failed_queries: results.iter().filter(|r| r.is_failure()).count(),
            rejected_queries: count_status(results, CallStatus::Rejected),
            mean,
            median: stats::median(&values),
            std,
            min: stats::min(&values),
            max: stats::max(&values),
            trimmed_mean: stats::trimmed_mean(&values, TRIM_PROPORTION),
            outlier_count: stats::outlier_count(&values),
            calibrated_probability: mean.map(|m| self.calibration.apply(m)),
            bayesian_probability: self.bayesian(&model_stats, mean),
            consistency_weighted_probability: self.consistency_weighted(&model_stats, std),
            agreement_metric: std.map(agreement),
            model_stats,
        };

        tracing::debug!(
            total = statistics.total_queries,
            successful = statistics.successful_queries,
            probabilities = values.len(),
            mean = ?statistics.mean,
            "Aggregated ensemble"
        );

        statistics
    }

    /// Inverse-variance combination of per-model means.
    ///
    /// Falls back to the plain ensemble mean when any contributing model
    /// has a single data point and therefore no variance estimate.
    fn bayesian(&self, models: &BTreeMap<String, ModelStats>, mean: Option<f64>) -> Option<f64> {
        let contributing: Vec<&ModelStats> =
            models.values().filter(|m| m.mean.is_some()).collect();
        if contributing.is_empty() {
            return None;
        }
        if contributing.iter().any(|m| m.std.is_none()) {
            return mean;
        }

        let pairs: Vec<(f64, f64)> = contributing
            .iter()
            .filter_map(|m| {
                let (model_mean, std) = (m.mean?, m.std?);
                Some((model_mean, 1.0 / (std * std + self.variance_epsilon)))
            })
            .collect();

        stats::weighted_mean(&pairs).or(mean)
    }

    /// Per-model means weighted by `1 / (std + ε)`.
    ///
    /// A model with a single data point has no std of its own and borrows the
    /// ensemble std; with no ensemble std either, all weights are equal.
    fn consistency_weighted(
        &self,
        models: &BTreeMap<String, ModelStats>,
        ensemble_std: Option<f64>,
    ) -> Option<f64> {
        let pairs: Vec<(f64, f64)> = models
            .values()
            .filter_map(|m| {
                let model_mean = m.mean?;
                let spread = m.std.or(ensemble_std).unwrap_or(0.0);
                Some((model_mean, 1.0 / (spread + self.consistency_epsilon)))
            })
            .collect();

        stats::weighted_mean(&pairs)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a standard deviation to a consensus score in `[0, 1]`.
pub fn agreement(std: f64) -> f64 {
    (1.0 - std / AGREEMENT_SCALE).clamp(0.0, 1.0)
}

fn count_status(results: &[CallResult], status: CallStatus) -> usize {
    results.iter().filter(|r| r.status == status).count()
}
