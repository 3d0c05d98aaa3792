//! Token usage accounting for a run.

use serde::{Deserialize, Serialize};

use foresight_core::{CallResult, ResultSource, TokenUsage};

/// Accumulated usage over a set of results.
///
/// Cache hits count toward `cache_hits` only; their stored token counts were
/// paid for by an earlier run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,

    /// Backend attempts, retries included.
    pub api_calls: u64,

    pub cache_hits: u64,
}

impl RunUsage {
    pub fn from_results(results: &[CallResult]) -> Self {
        let mut usage = Self::default();
        for result in results {
            usage.record(result);
        }
        usage
    }

    /// Add one result.
    pub fn record(&mut self, result: &CallResult) {
        if result.source == ResultSource::Cache {
            self.cache_hits += 1;
            return;
        }
        self.add_tokens(&result.usage);
        self.api_calls += u64::from(result.attempts);
    }

    fn add_tokens(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn test_accumulates_api_results() {
        let results = vec![
            CallResult::success("a", "x", Some(40.0), usage(100, 50)).with_attempts(2),
            CallResult::rejected("a", "I cannot comply", usage(100, 10)),
            CallResult::error("b", "boom").with_attempts(3),
        ];
        let total = RunUsage::from_results(&results);
        assert_eq!(total.prompt_tokens, 200);
        assert_eq!(total.completion_tokens, 60);
        assert_eq!(total.total_tokens, 260);
        assert_eq!(total.api_calls, 6);
        assert_eq!(total.cache_hits, 0);
    }

    #[test]
    fn test_cache_hits_cost_nothing() {
        let mut hit = CallResult::success("a", "x", Some(40.0), usage(100, 50)).with_attempts(0);
        hit.source = ResultSource::Cache;
        let total = RunUsage::from_results(&[hit]);
        assert_eq!(total.cache_hits, 1);
        assert_eq!(total.total_tokens, 0);
        assert_eq!(total.api_calls, 0);
    }
}
