//! Regex tables used by the probability extraction cascade.
//!
//! Every table is ordered: earlier patterns win over later ones inside the
//! same strategy. All patterns capture the numeric value in group 1.

use lazy_static::lazy_static;
use regex::Regex;

/// Builds a tiered set of marker patterns for a label alternation.
///
/// Tiers: explicit percent sign, markdown-decorated percent, bare number.
fn marker_patterns(label: &str) -> Vec<Regex> {
    [
        format!(r"(?i)(?:{label})\s*:\s*(\d+(?:\.\d+)?)\s*%"),
        format!(r"(?i)(?:{label})\**\s*:\s*\**\s*(\d+(?:\.\d+)?)\s*%"),
        format!(r"(?i)(?:{label})\**\s*:\s*\**\s*(\d+(?:\.\d+)?)"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
}

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

lazy_static! {
    // =========================================================================
    // STRUCTURED MARKERS
    // =========================================================================

    /// Primary forecast marker, e.g. `HAUPTPROGNOSE: 42%` or `**FINAL FORECAST:** 42%`
    pub static ref PRIMARY_MARKER_PATTERNS: Vec<Regex> =
        marker_patterns(r"HAUPTPROGNOSE|FINAL[ _]FORECAST");

    /// Legacy marker from the older answer format, e.g. `PROGNOSE: 42%`
    pub static ref LEGACY_MARKER_PATTERNS: Vec<Regex> = marker_patterns("PROGNOSE");

    // =========================================================================
    // CALCULATION RESULTS
    // =========================================================================

    /// Result of an explicit calculation. The last match in the text wins.
    pub static ref FORMULA_PATTERNS: Vec<Regex> = compile_all(&[
        r"(?im)Final_Probability\s*=\s*(\d+(?:\.\d+)?)",
        r"(?im)Final_Probability\s*=.*?(\d+(?:\.\d+)?)\s*%",
        r"(?im)\(\s*\d+(?:\.\d+)?\s*×.*?\)\s*/\s*100\s*=\s*(\d+(?:\.\d+)?)",
        r"(?im)=\s*(\d+(?:\.\d+)?)\s*%?$",
    ]);

    // =========================================================================
    // KEYWORD LINE SEARCH
    // =========================================================================

    /// Range such as `40-60` or `40 to 60` at the start of the value
    pub static ref RANGE_PATTERN: Regex = Regex::new(
        r"(?i)^\s*(\d+(?:\.\d+)?)\s*(?:-|–|to|bis)\s*(\d+(?:\.\d+)?)"
    ).unwrap();

    /// Number followed by a percent sign
    pub static ref PERCENT_PATTERN: Regex = Regex::new(
        r"(\d+(?:\.\d+)?)\s*%"
    ).unwrap();

    /// Any unsigned decimal number
    pub static ref NUMBER_PATTERN: Regex = Regex::new(
        r"(\d+(?:\.\d+)?)"
    ).unwrap();

    // =========================================================================
    // GENERIC FALLBACKS
    // =========================================================================

    /// Broad percentage phrasing across the whole text. The last match wins.
    pub static ref GENERIC_PERCENT_PATTERNS: Vec<Regex> = compile_all(&[
        r"(\d+(?:\.\d+)?)\s*%",
        r"(?i)(\d+(?:\.\d+)?)\s*percent",
        r"(?i)probability\s*(?:of|is|:)?\s*(\d+(?:\.\d+)?)\s*%",
        r"(?i)(\d+(?:\.\d+)?)\s*%\s*probability",
        r"(?i)final.*?(\d+(?:\.\d+)?)\s*%",
        r"(?i)answer.*?(\d+(?:\.\d+)?)\s*%",
        r"(?i)final_probability.*?(\d+(?:\.\d+)?)",
        r"(?i)=\s*(\d+(?:\.\d+)?)\s*%",
        r"(?i)therefore.*?(\d+(?:\.\d+)?)\s*%",
        r"(?i)conclusion.*?(\d+(?:\.\d+)?)\s*%",
        r"(?i)estimate.*?(\d+(?:\.\d+)?)\s*%",
        r"(?i)assess.*?(\d+(?:\.\d+)?)\s*%",
        r"(?i)likely.*?(\d+(?:\.\d+)?)\s*%",
        r"(?i)around\s*(\d+(?:\.\d+)?)\s*%",
        r"(?i)approximately\s*(\d+(?:\.\d+)?)\s*%",
        r"(?i)roughly\s*(\d+(?:\.\d+)?)\s*%",
        r"(?i)my\s+(?:final\s+)?(?:forecast|prediction|estimate)\s+is\s+(\d+(?:\.\d+)?)\s*%",
        r"(?i)i\s+(?:would\s+)?(?:forecast|predict|estimate)\s+(\d+(?:\.\d+)?)\s*%",
    ]);

    /// Standalone number for the tail scan
    pub static ref TAIL_NUMBER_PATTERN: Regex = Regex::new(
        r"\b(\d+(?:\.\d+)?)\b"
    ).unwrap();

    // =========================================================================
    // RESPONSE DETAIL SECTIONS
    // =========================================================================

    /// `KONFIDENZBEREICH: 42% ± 8%`
    pub static ref CONFIDENCE_RANGE_PATTERN: Regex = Regex::new(
        r"(?i)KONFIDENZBEREICH:\s*(\d+(?:\.\d+)?)%?\s*±\s*(\d+(?:\.\d+)?)%?"
    ).unwrap();

    pub static ref OPTIMISTIC_SCENARIO_PATTERN: Regex = Regex::new(
        r"(?i)Optimistisches Szenario:\s*(\d+(?:\.\d+)?)%?"
    ).unwrap();

    pub static ref PESSIMISTIC_SCENARIO_PATTERN: Regex = Regex::new(
        r"(?i)Pessimistisches Szenario:\s*(\d+(?:\.\d+)?)%?"
    ).unwrap();

    pub static ref OUTLIER_SCENARIO_PATTERN: Regex = Regex::new(
        r"(?i)Outlier-Szenario:\s*(\d+(?:\.\d+)?)%?"
    ).unwrap();

    /// Quality self-assessments scored out of ten, keyed by field name
    pub static ref QUALITY_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("information_completeness", Regex::new(r"(?i)Informationsvollständigkeit:\s*(\d+)/10").unwrap()),
        ("analytical_rigor", Regex::new(r"(?i)Analytische Rigorosität:\s*(\d+)/10").unwrap()),
        ("bias_resistance", Regex::new(r"(?i)Bias-Resistenz:\s*(\d+)/10").unwrap()),
        ("forecasting_consistency", Regex::new(r"(?i)Prognostische Konsistenz:\s*(\d+)/10").unwrap()),
    ];

    /// `KRITISCHE_UNSICHERHEITSFAKTOREN: [a, b, c]`
    pub static ref UNCERTAINTY_FACTORS_PATTERN: Regex = Regex::new(
        r"(?is)KRITISCHE_UNSICHERHEITSFAKTOREN:\s*\[(.*?)\]"
    ).unwrap();
}

/// Keyword prefixes that anchor the line search, in priority order.
pub const FORECAST_KEYWORDS: &[&str] = &[
    "prognose:",
    "forecast:",
    "prediction:",
    "vorhersage:",
    "probability:",
    "wahrscheinlichkeit:",
    "final probability:",
    "ensemble probability:",
    "result:",
    "ergebnis:",
    "answer:",
    "antwort:",
    "conclusion:",
    "fazit:",
];

/// How far from the end of the text the tail scan looks, in characters.
pub const TAIL_WINDOW_CHARS: usize = 500;

/// Parse the first capture group of a match as `f64`.
pub(crate) fn capture_value(caps: &regex::Captures<'_>, group: usize) -> Option<f64> {
    caps.get(group).and_then(|m| m.as_str().parse::<f64>().ok())
}

/// First match of `pattern` in `text`, parsed from group 1.
pub(crate) fn first_value(pattern: &Regex, text: &str) -> Option<f64> {
    pattern.captures(text).and_then(|caps| capture_value(&caps, 1))
}

/// Last match of `pattern` in `text`, parsed from group 1.
pub(crate) fn last_value(pattern: &Regex, text: &str) -> Option<f64> {
    pattern
        .captures_iter(text)
        .last()
        .and_then(|caps| capture_value(&caps, 1))
}
