//! Forecast prompt construction.
//!
//! The prompt has a fixed frame and a dynamic question block. The frame asks
//! for the final answer as `HAUPTPROGNOSE: NN%` so the primary marker strategy
//! of the extractor applies. The remaining sections are optional; the response
//! detail extractor picks them up when a model provides them.

use serde::{Deserialize, Serialize};

/// Instructions shared by every forecast prompt.
pub const FORECAST_FRAME: &str = r#"
You are a calibrated superforecaster taking part in an ensemble of independent forecasters.

## Method
1. Establish a base rate from comparable historical events
2. Adjust for the specific evidence available today
3. Consider what would have to happen for the event to occur, and for it not to occur
4. Avoid round numbers unless the evidence supports them

## Optional Sections
KONFIDENZBEREICH: <central estimate>% ± <margin>%
Optimistisches Szenario: <probability>%
Pessimistisches Szenario: <probability>%
Outlier-Szenario: <probability>%
KRITISCHE_UNSICHERHEITSFAKTOREN: [factor one, factor two, factor three]

## Required Final Line
End your answer with exactly one line in this format:
HAUPTPROGNOSE: <probability>%
"#;

/// The question being forecast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastQuestion {
    pub question: String,

    /// Resolution criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,

    /// Background material supplied by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ForecastQuestion {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = Some(timeframe.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Render the full prompt text.
///
/// The output is a pure function of the question, so the response cache
/// treats repeated questions as the same prompt.
pub fn build_forecast_prompt(question: &ForecastQuestion) -> String {
    let mut prompt = String::from(FORECAST_FRAME.trim_start());
    prompt.push_str("\n## Question\n");
    prompt.push_str(question.question.trim());
    prompt.push('\n');

    let sections = [
        ("Resolution Criteria", &question.definition),
        ("Timeframe", &question.timeframe),
        ("Context", &question.context),
    ];
    for (title, body) in sections {
        if let Some(body) = body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            prompt.push_str(&format!("\n## {title}\n{body}\n"));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_requests_primary_marker() {
        assert!(FORECAST_FRAME.contains("HAUPTPROGNOSE: <probability>%"));
    }

    #[test]
    fn test_prompt_sections() {
        let question = ForecastQuestion::new("Will the ECB cut rates?")
            .with_definition("Any cut to the deposit facility rate")
            .with_timeframe("before 2026-12-31");
        let prompt = build_forecast_prompt(&question);

        assert!(prompt.contains("## Question\nWill the ECB cut rates?"));
        assert!(prompt.contains("## Resolution Criteria\nAny cut"));
        assert!(prompt.contains("## Timeframe\nbefore 2026-12-31"));
        assert!(!prompt.contains("## Context"));
    }

    #[test]
    fn test_blank_sections_are_omitted() {
        let question = ForecastQuestion::new("Q?").with_context("   ");
        assert!(!build_forecast_prompt(&question).contains("## Context"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let question = ForecastQuestion::new("Q?").with_context("background");
        assert_eq!(build_forecast_prompt(&question), build_forecast_prompt(&question));
    }
}
