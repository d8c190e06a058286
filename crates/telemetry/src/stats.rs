//! Cumulative model usage counters.

use cogloop_core::provider::Completion;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    calls: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    prompt_ms: f64,
    eval_ms: f64,
}

/// Running totals over every completion since the last [`LlmStats::reset`].
///
/// Shared by all runs of one orchestrator; safe to ingest from concurrent
/// invocations.
#[derive(Debug, Default)]
pub struct LlmStats {
    totals: Mutex<Totals>,
}

/// A point-in-time copy of [`LlmStats`]. Millisecond sums and throughput are
/// rounded to two decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub prompt_ms: f64,
    pub eval_ms: f64,
    pub tokens_per_second: f64,
}

impl LlmStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completion into the totals.
    pub fn ingest(&self, completion: &Completion) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.calls += 1;
        totals.prompt_tokens += u64::from(completion.usage.prompt_tokens);
        totals.completion_tokens += u64::from(completion.usage.completion_tokens);
        totals.total_tokens += u64::from(completion.usage.total_tokens);
        totals.prompt_ms += completion.timings.prompt_ms;
        totals.eval_ms += completion.timings.eval_ms;
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner) = Totals::default();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let totals = *self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        let total_ms = totals.prompt_ms + totals.eval_ms;
        let tokens_per_second = if total_ms <= 0.0 || totals.total_tokens == 0 {
            0.0
        } else {
            totals.total_tokens as f64 / (total_ms / 1000.0)
        };

        StatsSnapshot {
            calls: totals.calls,
            prompt_tokens: totals.prompt_tokens,
            completion_tokens: totals.completion_tokens,
            total_tokens: totals.total_tokens,
            prompt_ms: round2(totals.prompt_ms),
            eval_ms: round2(totals.eval_ms),
            tokens_per_second: round2(tokens_per_second),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogloop_core::provider::{Timings, Usage};

    fn completion(prompt: u32, completion: u32, prompt_ms: f64, eval_ms: f64) -> Completion {
        Completion {
            text: "x".into(),
            usage: Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            },
            timings: Timings { prompt_ms, eval_ms },
        }
    }

    #[test]
    fn empty_stats_have_zero_throughput() {
        let stats = LlmStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn ingest_accumulates_and_derives_throughput() {
        let stats = LlmStats::new();
        stats.ingest(&completion(100, 50, 250.0, 500.0));
        stats.ingest(&completion(20, 30, 50.0, 200.0));

        let snap = stats.snapshot();
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.prompt_tokens, 120);
        assert_eq!(snap.completion_tokens, 80);
        assert_eq!(snap.total_tokens, 200);
        assert_eq!(snap.prompt_ms, 300.0);
        assert_eq!(snap.eval_ms, 700.0);
        // 200 tokens over one second
        assert_eq!(snap.tokens_per_second, 200.0);
    }

    #[test]
    fn snapshot_rounds_to_two_decimals() {
        let stats = LlmStats::new();
        stats.ingest(&completion(1, 2, 1.23456, 0.001));
        let snap = stats.snapshot();
        assert_eq!(snap.prompt_ms, 1.23);
        assert_eq!(snap.eval_ms, 0.0);
    }

    #[test]
    fn reset_clears_totals() {
        let stats = LlmStats::new();
        stats.ingest(&completion(5, 5, 10.0, 10.0));
        stats.reset();
        assert_eq!(stats.snapshot().calls, 0);
    }

    #[test]
    fn zero_duration_means_zero_throughput() {
        let stats = LlmStats::new();
        stats.ingest(&completion(10, 10, 0.0, 0.0));
        assert_eq!(stats.snapshot().tokens_per_second, 0.0);
    }
}
