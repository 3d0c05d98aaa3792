//! Structured sections of ensemble-aware responses.
//!
//! Besides the headline probability, prompts ask models for a confidence
//! band, scenario estimates, self-rated quality scores and a list of key
//! uncertainties. None of these feed the aggregator; they are carried on
//! the result for reporting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::patterns::{
    capture_value, first_value, CONFIDENCE_RANGE_PATTERN, OPTIMISTIC_SCENARIO_PATTERN,
    OUTLIER_SCENARIO_PATTERN, PESSIMISTIC_SCENARIO_PATTERN, QUALITY_PATTERNS,
    UNCERTAINTY_FACTORS_PATTERN,
};

/// `center ± margin`, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRange {
    pub center: f64,
    pub margin: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenarios {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pessimistic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier: Option<f64>,
}

impl Scenarios {
    fn is_empty(&self) -> bool {
        self.optimistic.is_none() && self.pessimistic.is_none() && self.outlier.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_range: Option<ConfidenceRange>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenarios: Option<Scenarios>,

    /// Self-rated scores out of 10, keyed by indicator name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quality_indicators: BTreeMap<String, u8>,

    /// Mean of `quality_indicators`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_quality_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncertainty_factors: Vec<String>,
}

impl ResponseDetails {
    pub fn is_empty(&self) -> bool {
        self.confidence_range.is_none()
            && self.scenarios.is_none()
            && self.quality_indicators.is_empty()
            && self.uncertainty_factors.is_empty()
    }
}

/// Extract the structured sections. Returns `None` if none are present.
pub fn extract_details(text: &str) -> Option<ResponseDetails> {
    if text.is_empty() {
        return None;
    }

    let confidence_range = CONFIDENCE_RANGE_PATTERN.captures(text).and_then(|caps| {
        let center = capture_value(&caps, 1)?;
        let margin = capture_value(&caps, 2)?;
        Some(ConfidenceRange {
            center,
            margin,
            lower: center - margin,
            upper: center + margin,
        })
    });

    let scenarios = Scenarios {
        optimistic: first_value(&OPTIMISTIC_SCENARIO_PATTERN, text),
        pessimistic: first_value(&PESSIMISTIC_SCENARIO_PATTERN, text),
        outlier: first_value(&OUTLIER_SCENARIO_PATTERN, text),
    };

    let quality_indicators: BTreeMap<String, u8> = QUALITY_PATTERNS
        .iter()
        .filter_map(|(name, pattern)| {
            let score = pattern.captures(text)?.get(1)?.as_str().parse::<u8>().ok()?;
            Some((name.to_string(), score))
        })
        .collect();

    let overall_quality_score = if quality_indicators.is_empty() {
        None
    } else {
        let sum: f64 = quality_indicators.values().map(|v| *v as f64).sum();
        Some(sum / quality_indicators.len() as f64)
    };

    let uncertainty_factors = UNCERTAINTY_FACTORS_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let details = ResponseDetails {
        confidence_range,
        scenarios: (!scenarios.is_empty()).then_some(scenarios),
        quality_indicators,
        overall_quality_score,
        uncertainty_factors,
    };

    (!details.is_empty()).then_some(details)
}
