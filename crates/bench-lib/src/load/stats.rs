//! Latency and error-rate aggregation over request outcomes

use crate::models::{LabelCounts, RequestOutcome, RoundReport};
use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::time::Duration;

/// Highest trackable latency: one hour, in microseconds
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// HDR latency histogram with millisecond accessors
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            hist: Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)
                .expect("static histogram bounds are valid"),
        }
    }

    pub fn record_ms(&mut self, latency_ms: f64) {
        let us = (latency_ms * 1000.0).round().max(1.0) as u64;
        self.hist.saturating_record(us);
    }

    pub fn len(&self) -> u64 {
        self.hist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    /// Latency at quantile `q` in [0, 1]; zero when empty
    pub fn quantile_ms(&self, q: f64) -> f64 {
        if self.hist.is_empty() {
            return 0.0;
        }
        self.hist.value_at_quantile(q) as f64 / 1000.0
    }

    pub fn mean_ms(&self) -> f64 {
        if self.hist.is_empty() {
            return 0.0;
        }
        self.hist.mean() / 1000.0
    }

    pub fn max_ms(&self) -> f64 {
        if self.hist.is_empty() {
            return 0.0;
        }
        self.hist.max() as f64 / 1000.0
    }
}

/// Percentiles and error accounting for a set of outcomes
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeStats {
    pub requests: u64,
    pub failures: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

impl OutcomeStats {
    pub fn successes(&self) -> u64 {
        self.requests - self.failures
    }

    /// Successful responses per second over `window`; failures and
    /// requests that never got a response deliver no throughput
    pub fn achieved_rps(&self, window: Duration) -> f64 {
        let secs = window.as_secs_f64();
        if secs > 0.0 {
            self.successes() as f64 / secs
        } else {
            0.0
        }
    }

    /// Failed fraction in [0, 1]; zero for an empty set
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}

/// Aggregate any iterator of outcomes. Failed requests contribute their
/// latency too.
pub fn summarize<'a, I>(outcomes: I) -> OutcomeStats
where
    I: IntoIterator<Item = &'a RequestOutcome>,
{
    let mut hist = LatencyHistogram::new();
    let mut failures = 0u64;

    for outcome in outcomes {
        hist.record_ms(outcome.duration_ms);
        if !outcome.success {
            failures += 1;
        }
    }

    OutcomeStats {
        requests: hist.len(),
        failures,
        p50_ms: hist.quantile_ms(0.50),
        p95_ms: hist.quantile_ms(0.95),
        p99_ms: hist.quantile_ms(0.99),
        mean_ms: hist.mean_ms(),
        max_ms: hist.max_ms(),
    }
}

/// Build the per-round artifact. Achieved RPS counts successful
/// responses over the scheduled duration.
pub fn round_report(
    outcomes: &[RequestOutcome],
    target_rps: f64,
    scheduled: Duration,
) -> RoundReport {
    let stats = summarize(outcomes);

    let mut per_label: BTreeMap<String, LabelCounts> = BTreeMap::new();
    for outcome in outcomes {
        let entry = per_label.entry(outcome.label.clone()).or_default();
        entry.requests += 1;
        if !outcome.success {
            entry.failures += 1;
        }
    }

    RoundReport {
        target_rps,
        achieved_rps: stats.achieved_rps(scheduled),
        duration_secs: scheduled.as_secs_f64(),
        total_requests: stats.requests,
        successful_requests: stats.successes(),
        failed_requests: stats.failures,
        error_rate: stats.error_rate(),
        p50_ms: stats.p50_ms,
        p95_ms: stats.p95_ms,
        p99_ms: stats.p99_ms,
        mean_ms: stats.mean_ms,
        max_ms: stats.max_ms,
        per_label,
    }
}
