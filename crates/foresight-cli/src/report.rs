//! Forecast report and console summary.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use foresight_core::{CallResult, Calibration, EnsembleStatistics};
use foresight_runtime::{ForecastQuestion, RunUsage};

/// Run parameters recorded next to the results.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    pub backend: String,
    pub models: Vec<String>,
    pub iterations_per_model: u32,
    pub concurrency_limit: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub web_search: bool,
    pub calibration: Calibration,
    pub duration_seconds: f64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastReport {
    pub metadata: ReportMetadata,
    pub prompt: PromptRecord,
    pub statistics: EnsembleStatistics,
    pub usage: RunUsage,
    pub results: Vec<CallResult>,
}

/// The question and the exact prompt text sent to every model.
#[derive(Debug, Clone, Serialize)]
pub struct PromptRecord {
    #[serde(flatten)]
    pub question: ForecastQuestion,
    pub text: String,
}

/// Generate a JSON report.
pub fn generate_json_report(report: &ForecastReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a JSON report to a file, creating parent directories.
pub fn write_json_report(report: &ForecastReport, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v))
}

/// Render the console summary.
pub fn format_summary(report: &ForecastReport) -> String {
    let stats = &report.statistics;
    let usage = &report.usage;
    let mut out = String::new();

    out.push_str("\n📊 Forecast Summary:\n");
    out.push_str(&format!(
        "   Ensemble probability: {}\n",
        percent(stats.ensemble_probability())
    ));
    out.push_str(&format!(
        "   Queries: {} total, {} successful, {} failed, {} rejected ({:.0}% success)\n",
        stats.total_queries,
        stats.successful_queries,
        stats.failed_queries,
        stats.rejected_queries,
        stats.success_rate() * 100.0
    ));

    if stats.has_data() {
        out.push_str(&format!(
            "   Mean {}  Median {}  Std {}  Min {}  Max {}\n",
            percent(stats.mean),
            percent(stats.median),
            stats.std.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v)),
            percent(stats.min),
            percent(stats.max)
        ));
        out.push_str(&format!(
            "   Trimmed mean {}  Outliers {}\n",
            percent(stats.trimmed_mean),
            stats.outlier_count
        ));
        out.push_str(&format!(
            "   Calibrated ({}) {}  Bayesian {}  Consistency-weighted {}\n",
            report.metadata.calibration.name(),
            percent(stats.calibrated_probability),
            percent(stats.bayesian_probability),
            percent(stats.consistency_weighted_probability)
        ));
        if let Some(agreement) = stats.agreement_metric {
            out.push_str(&format!("   Agreement: {:.2}\n", agreement));
        }
    } else {
        out.push_str("   No probabilities could be extracted.\n");
    }

    if !stats.model_stats.is_empty() {
        out.push_str("\n   Per model:\n");
        let width = stats.model_stats.keys().map(String::len).max().unwrap_or(0);
        for (model, m) in &stats.model_stats {
            out.push_str(&format!(
                "     {:<width$}  {:>7}  ±{:>5}  ok {}/{}  rejected {}  failed {}\n",
                model,
                percent(m.mean),
                m.std.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v)),
                m.success_count,
                m.count,
                m.rejected_count,
                m.failed_count,
                width = width
            ));
        }
    }

    out.push_str(&format!(
        "\n   Tokens: {} ({} prompt, {} completion)  API calls: {}  Cache hits: {}\n",
        usage.total_tokens,
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.api_calls,
        usage.cache_hits
    ));
    out.push_str(&format!(
        "   Duration: {:.1}s\n",
        report.metadata.duration_seconds
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use foresight_core::{Aggregator, TokenUsage};

    fn create_test_report() -> ForecastReport {
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        let results = vec![
            CallResult::success("a/one", "HAUPTPROGNOSE: 40%", Some(40.0), usage)
                .with_iteration(1)
                .with_attempts(1),
            CallResult::success("a/one", "HAUPTPROGNOSE: 50%", Some(50.0), usage)
                .with_iteration(2)
                .with_attempts(1),
            CallResult::error("b/two", "connection reset").with_iteration(1).with_attempts(3),
        ];
        let statistics = Aggregator::new().aggregate(&results);
        let question = ForecastQuestion::new("Will it rain?");

        ForecastReport {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                tool_version: "0.1.0".to_string(),
                backend: "dry-run".to_string(),
                models: vec!["a/one".to_string(), "b/two".to_string()],
                iterations_per_model: 2,
                concurrency_limit: 2,
                temperature: 0.7,
                max_tokens: 4000,
                web_search: false,
                calibration: Calibration::Identity,
                duration_seconds: 1.25,
            },
            prompt: PromptRecord {
                text: foresight_runtime::build_forecast_prompt(&question),
                question,
            },
            statistics,
            usage: RunUsage::from_results(&results),
            results,
        }
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        for key in ["metadata", "prompt", "statistics", "usage", "results"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["prompt"]["question"], "Will it rain?");
        assert_eq!(value["metadata"]["calibration"]["method"], "identity");
        assert_eq!(value["usage"]["api_calls"], 5);
        assert_eq!(value["results"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_summary_contains_statistics_and_models() {
        let summary = format_summary(&create_test_report());

        assert!(summary.contains("Ensemble probability: 45.0%"));
        assert!(summary.contains("3 total, 2 successful, 1 failed, 0 rejected"));
        assert!(summary.contains("Calibrated (identity) 45.0%"));
        assert!(summary.contains("a/one"));
        assert!(summary.contains("ok 0/1"));
        assert!(summary.contains("Duration: 1.2s") || summary.contains("Duration: 1.3s"));
    }

    #[test]
    fn test_summary_without_probabilities() {
        let mut report = create_test_report();
        report.results.retain(|r| r.model_id == "b/two");
        report.statistics = Aggregator::new().aggregate(&report.results);

        let summary = format_summary(&report);
        assert!(summary.contains("Ensemble probability: -"));
        assert!(summary.contains("No probabilities could be extracted."));
    }

    #[test]
    fn test_write_json_report_creates_parent() {
        let dir = std::env::temp_dir().join(format!("foresight-report-{}", std::process::id()));
        let path = dir.join("nested").join("report.json");

        write_json_report(&create_test_report(), &path).unwrap();
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
