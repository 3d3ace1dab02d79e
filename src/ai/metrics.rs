//! Pipeline Metrics Collection
//!
//! Counters for provider calls, token usage and request outcomes. Thread-safe
//! for concurrent workers; per-provider stats live in a `DashMap` so workers
//! hitting different providers never contend.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = PipelineMetrics::new();
//! metrics.record_attempt(&attempt, Some(usage));
//! let summary = metrics.snapshot();
//! ```

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::ai::provider::TokenUsage;
use crate::types::{ProviderAttempt, RequestState};

pub type SharedMetrics = Arc<PipelineMetrics>;

#[derive(Debug, Default)]
struct ProviderCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
    latency_ms: AtomicU64,
}

/// Per-provider statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderMetrics {
    pub name: String,
    pub calls: u64,
    pub failures: u64,
    pub cancelled: u64,
    pub avg_latency_ms: u64,
}

/// Summary statistics since startup
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub fallback_results: u64,
    pub providers: Vec<ProviderMetrics>,
}

pub struct PipelineMetrics {
    start_time: Instant,
    provider_calls: AtomicU64,
    provider_failures: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    requests_cancelled: AtomicU64,
    fallback_results: AtomicU64,
    per_provider: DashMap<String, ProviderCounters>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            provider_calls: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            requests_completed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            requests_cancelled: AtomicU64::new(0),
            fallback_results: AtomicU64::new(0),
            per_provider: DashMap::new(),
        }
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(Self::new())
    }

    /// Record one provider attempt, with token usage when it succeeded
    pub fn record_attempt(&self, attempt: &ProviderAttempt, usage: Option<TokenUsage>) {
        let counters = self.per_provider.entry(attempt.provider.clone()).or_default();
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters
            .latency_ms
            .fetch_add(attempt.latency_ms, Ordering::Relaxed);
        self.provider_calls.fetch_add(1, Ordering::Relaxed);

        if attempt.failure_kind().is_some() {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            self.provider_failures.fetch_add(1, Ordering::Relaxed);
        } else if !attempt.is_success() {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(usage) = usage {
            self.input_tokens
                .fetch_add(u64::from(usage.input_tokens), Ordering::Relaxed);
            self.output_tokens
                .fetch_add(u64::from(usage.output_tokens), Ordering::Relaxed);
        }
    }

    /// Record the terminal state of a request
    pub fn record_outcome(&self, state: RequestState, fallback: bool) {
        let counter = match state {
            RequestState::Completed => &self.requests_completed,
            RequestState::Failed => &self.requests_failed,
            RequestState::Cancelled => &self.requests_cancelled,
            RequestState::Queued | RequestState::Processing => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if fallback {
            self.fallback_results.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSummary {
        let mut providers: Vec<ProviderMetrics> = self
            .per_provider
            .iter()
            .map(|entry| {
                let c = entry.value();
                let calls = c.calls.load(Ordering::Relaxed);
                ProviderMetrics {
                    name: entry.key().clone(),
                    calls,
                    failures: c.failures.load(Ordering::Relaxed),
                    cancelled: c.cancelled.load(Ordering::Relaxed),
                    avg_latency_ms: c.latency_ms.load(Ordering::Relaxed) / calls.max(1),
                }
            })
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));

        MetricsSummary {
            uptime_secs: self.start_time.elapsed().as_secs(),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            fallback_results: self.fallback_results.load(Ordering::Relaxed),
            providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptOutcome, ProviderErrorKind};

    fn attempt(provider: &str, outcome: AttemptOutcome, latency_ms: u64) -> ProviderAttempt {
        ProviderAttempt {
            provider: provider.to_string(),
            key_id: None,
            outcome,
            latency_ms,
            message: None,
        }
    }

    #[test]
    fn test_per_provider_counts() {
        let metrics = PipelineMetrics::new();
        metrics.record_attempt(
            &attempt("a", AttemptOutcome::Failed(ProviderErrorKind::Timeout), 100),
            None,
        );
        metrics.record_attempt(
            &attempt("b", AttemptOutcome::Success, 40),
            Some(TokenUsage {
                input_tokens: 800,
                output_tokens: 120,
            }),
        );
        metrics.record_attempt(&attempt("b", AttemptOutcome::Cancelled, 20), None);

        let summary = metrics.snapshot();
        assert_eq!(summary.provider_calls, 3);
        assert_eq!(summary.provider_failures, 1);
        assert_eq!(summary.input_tokens, 800);
        assert_eq!(summary.providers[0].name, "a");
        assert_eq!(summary.providers[0].failures, 1);
        assert_eq!(summary.providers[1].calls, 2);
        assert_eq!(summary.providers[1].cancelled, 1);
        assert_eq!(summary.providers[1].avg_latency_ms, 30);
    }

    #[test]
    fn test_outcomes() {
        let metrics = PipelineMetrics::new();
        metrics.record_outcome(RequestState::Completed, true);
        metrics.record_outcome(RequestState::Failed, false);
        metrics.record_outcome(RequestState::Processing, false);

        let summary = metrics.snapshot();
        assert_eq!(summary.requests_completed, 1);
        assert_eq!(summary.requests_failed, 1);
        assert_eq!(summary.fallback_results, 1);
    }
}
