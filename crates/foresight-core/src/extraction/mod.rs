//! Text-to-probability extraction.
//!
//! Model answers are free text. [`extract_probability`] runs an ordered
//! cascade of strategies over the text and returns the first in-range value
//! any of them produces:
//!
//! 1. Primary marker (`HAUPTPROGNOSE: 42%`, `FINAL FORECAST: 42%`)
//! 2. Legacy marker (`PROGNOSE: 42%`)
//! 3. Calculation result (`Final_Probability = 42`, `... = 42%`), last match
//! 4. Keyword line search (`Forecast:` lines and the two lines after)
//! 5. Generic percentage phrasing, last match
//! 6. Tail scan of the last 500 characters, nearest to the end first
//!
//! A value outside `[0, 100]` discards that match and the cascade moves on.
//! Finding nothing is a normal outcome and returns `None`.

mod details;
pub mod patterns;
mod refusal;

pub use details::{extract_details, ConfidenceRange, ResponseDetails, Scenarios};
pub use refusal::{is_refusal, REFUSAL_PHRASES};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::is_valid_probability;
use patterns::{
    capture_value, first_value, last_value, FORECAST_KEYWORDS, FORMULA_PATTERNS,
    GENERIC_PERCENT_PATTERNS, LEGACY_MARKER_PATTERNS, NUMBER_PATTERN, PERCENT_PATTERN,
    PRIMARY_MARKER_PATTERNS, RANGE_PATTERN, TAIL_NUMBER_PATTERN, TAIL_WINDOW_CHARS,
};

/// The cascade stage that produced a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    PrimaryMarker,
    LegacyMarker,
    Formula,
    KeywordLine,
    GenericPercent,
    TailNumber,
}

impl ExtractionStrategy {
    /// All strategies in cascade order.
    pub const CASCADE: [ExtractionStrategy; 6] = [
        ExtractionStrategy::PrimaryMarker,
        ExtractionStrategy::LegacyMarker,
        ExtractionStrategy::Formula,
        ExtractionStrategy::KeywordLine,
        ExtractionStrategy::GenericPercent,
        ExtractionStrategy::TailNumber,
    ];

    fn run(self, text: &str) -> Option<f64> {
        match self {
            ExtractionStrategy::PrimaryMarker => first_marker(&PRIMARY_MARKER_PATTERNS, text),
            ExtractionStrategy::LegacyMarker => first_marker(&LEGACY_MARKER_PATTERNS, text),
            ExtractionStrategy::Formula => last_in_tables(&FORMULA_PATTERNS, text),
            ExtractionStrategy::KeywordLine => keyword_line(text),
            ExtractionStrategy::GenericPercent => last_in_tables(&GENERIC_PERCENT_PATTERNS, text),
            ExtractionStrategy::TailNumber => tail_number(text),
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionStrategy::PrimaryMarker => "primary marker",
            ExtractionStrategy::LegacyMarker => "legacy marker",
            ExtractionStrategy::Formula => "formula",
            ExtractionStrategy::KeywordLine => "keyword line",
            ExtractionStrategy::GenericPercent => "generic percent",
            ExtractionStrategy::TailNumber => "tail number",
        };
        write!(f, "{}", name)
    }
}

/// A probability together with the strategy that found it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub probability: f64,
    pub strategy: ExtractionStrategy,
}

/// Extract a probability in percent from model output.
pub fn extract_probability(text: &str) -> Option<f64> {
    extract_with_strategy(text).map(|e| e.probability)
}

/// Like [`extract_probability`], but also reports which strategy matched.
pub fn extract_with_strategy(text: &str) -> Option<Extraction> {
    if text.trim().is_empty() {
        return None;
    }

    let found = ExtractionStrategy::CASCADE.iter().find_map(|strategy| {
        strategy.run(text).map(|probability| Extraction {
            probability,
            strategy: *strategy,
        })
    });

    match &found {
        Some(extraction) => tracing::trace!(
            strategy = %extraction.strategy,
            probability = extraction.probability,
            "Extracted probability"
        ),
        None => tracing::debug!(chars = text.len(), "No probability found in response"),
    }

    found
}

fn in_range(value: f64) -> Option<f64> {
    is_valid_probability(value).then_some(value)
}

/// First match per tier; the first tier with an in-range value wins.
fn first_marker(tiers: &[regex::Regex], text: &str) -> Option<f64> {
    tiers
        .iter()
        .find_map(|pattern| first_value(pattern, text).and_then(in_range))
}

/// Last match per pattern; the first pattern with an in-range value wins.
fn last_in_tables(table: &[regex::Regex], text: &str) -> Option<f64> {
    table
        .iter()
        .find_map(|pattern| last_value(pattern, text).and_then(in_range))
}

fn keyword_line(text: &str) -> Option<f64> {
    let lowered = text.to_lowercase();
    let lines: Vec<&str> = text.lines().collect();

    for keyword in FORECAST_KEYWORDS {
        if !lowered.contains(keyword) {
            continue;
        }

        for (i, line) in lines.iter().enumerate() {
            if !line.to_lowercase().contains(keyword) {
                continue;
            }

            let candidate = if line.contains('%') {
                after_last_colon(line)
            } else if let Some(next) = lines.get(i + 1).filter(|l| l.contains('%')) {
                next.trim()
            } else if let Some(next) = lines.get(i + 2).filter(|l| l.contains('%')) {
                next.trim()
            } else {
                after_last_colon(line)
            };

            if let Some(value) = value_from_line(candidate) {
                return Some(value);
            }
        }
    }

    None
}

fn after_last_colon(line: &str) -> &str {
    line.rsplit(':').next().unwrap_or(line).trim()
}

/// Explicit percentage, then a range midpoint, then a bare number.
///
/// Ranges only count when the value has no usable percentage and the range
/// opens the value. A bare number in `(0, 1]` on a line with no percent sign
/// is a fraction.
fn value_from_line(text: &str) -> Option<f64> {
    if let Some(value) = first_value(&PERCENT_PATTERN, text).and_then(in_range) {
        return Some(value);
    }

    let stripped = text.replace('%', "");
    if let Some(caps) = RANGE_PATTERN.captures(&stripped) {
        if let (Some(low), Some(high)) = (capture_value(&caps, 1), capture_value(&caps, 2)) {
            if is_valid_probability(low) && is_valid_probability(high) {
                return Some((low + high) / 2.0);
            }
        }
    }

    let value = first_value(&NUMBER_PATTERN, &stripped)?;
    if value > 0.0 && value <= 1.0 && !text.contains('%') {
        return Some(value * 100.0);
    }
    in_range(value)
}

fn tail_number(text: &str) -> Option<f64> {
    let start = text
        .char_indices()
        .rev()
        .nth(TAIL_WINDOW_CHARS - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let tail = &text[start..];

    let values: Vec<f64> = TAIL_NUMBER_PATTERN
        .captures_iter(tail)
        .filter_map(|caps| capture_value(&caps, 1))
        .collect();

    values.into_iter().rev().find(|v| is_valid_probability(*v))
}
