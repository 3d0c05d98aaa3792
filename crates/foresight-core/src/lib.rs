//! # foresight-core
//!
//! Deterministic building blocks for LLM ensemble forecasting.
//!
//! This crate answers two questions about a batch of model answers:
//! - What probability did each answer give?
//! - What does the ensemble say, and how much do the models agree?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No I/O**: No network calls, no clocks consulted during aggregation
//! 3. **Total**: Extraction and aggregation never panic on malformed text or
//!    empty input; missing data is reported as `None`
//!
//! ## Example
//!
//! ```rust
//! use foresight_core::{extract_probability, Aggregator, CallResult, TokenUsage};
//!
//! let text = "Reasoning...\nHAUPTPROGNOSE: 42%";
//! let p = extract_probability(text);
//! assert_eq!(p, Some(42.0));
//!
//! let results = vec![CallResult::success("model-a", text, p, TokenUsage::default())];
//! let stats = Aggregator::new().aggregate(&results);
//! assert_eq!(stats.mean, Some(42.0));
//! ```

pub mod aggregator;
pub mod calibration;
pub mod extraction;
pub mod stats;
pub mod types;

// Re-export main types at crate root
pub use aggregator::{agreement, Aggregator};
pub use calibration::Calibration;
pub use extraction::{
    extract_details, extract_probability, extract_with_strategy, is_refusal, Extraction,
    ExtractionStrategy, ResponseDetails,
};
pub use types::{
    is_valid_probability, CallResult, CallStatus, EnsembleStatistics, ModelStats, ResultSource,
    TokenUsage,
};

use thiserror::Error;

/// Errors from core configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Invalid probability {0}: must be within [0, 100]")]
    InvalidProbability(f64),
}

/// Aggregate results with the default aggregator (identity calibration).
pub fn aggregate(results: &[CallResult]) -> EnsembleStatistics {
    Aggregator::new().aggregate(results)
}

/// Validate a probability in percent.
pub fn check_probability(value: f64) -> Result<f64, CoreError> {
    if is_valid_probability(value) {
        Ok(value)
    } else {
        Err(CoreError::InvalidProbability(value))
    }
}
