//! Observability infrastructure for the benchmark harness
//!
//! Provides:
//! - Prometheus metrics (issued requests, failures, latency, current rate, power)
//! - Structured JSON logging with tracing

use crate::models::{BaselinePower, PlateauSummary, RunRecord};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec, Gauge,
    Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Latency buckets for target requests (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<HarnessMetricsInner> = OnceLock::new();

struct HarnessMetricsInner {
    requests_issued: IntCounterVec,
    request_failures: IntCounterVec,
    request_latency_seconds: Histogram,
    target_rate: Gauge,
    power_watts: Gauge,
    rounds_completed: IntCounter,
    probes_aborted: IntCounter,
}

impl HarnessMetricsInner {
    fn new() -> Self {
        Self {
            requests_issued: register_int_counter_vec!(
                "wattbench_requests_issued_total",
                "Requests issued to the target, by endpoint label",
                &["label"]
            )
            .expect("Failed to register requests_issued"),

            request_failures: register_int_counter_vec!(
                "wattbench_request_failures_total",
                "Requests recorded as non-success, by endpoint label",
                &["label"]
            )
            .expect("Failed to register request_failures"),

            request_latency_seconds: register_histogram!(
                "wattbench_request_latency_seconds",
                "Latency from scheduled issue to last byte received",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register request_latency_seconds"),

            target_rate: register_gauge!(
                "wattbench_target_rate_rps",
                "Arrival rate currently requested from the target"
            )
            .expect("Failed to register target_rate"),

            power_watts: register_gauge!(
                "wattbench_power_watts",
                "Average power of the last measured window"
            )
            .expect("Failed to register power_watts"),

            rounds_completed: register_int_counter!(
                "wattbench_rounds_completed_total",
                "Measurement rounds finalized into the summary table"
            )
            .expect("Failed to register rounds_completed"),

            probes_aborted: register_int_counter!(
                "wattbench_probes_aborted_total",
                "Saturation probes halted by the catastrophic-failure guard"
            )
            .expect("Failed to register probes_aborted"),
        }
    }
}

/// Handle to the global harness metrics; clones share the same series
#[derive(Clone)]
pub struct HarnessMetrics {
    _private: (),
}

impl Default for HarnessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HarnessMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(HarnessMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &HarnessMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record one completed request outcome
    pub fn observe_outcome(&self, label: &str, latency_secs: f64, success: bool) {
        let inner = self.inner();
        inner.requests_issued.with_label_values(&[label]).inc();
        if !success {
            inner.request_failures.with_label_values(&[label]).inc();
        }
        inner.request_latency_seconds.observe(latency_secs);
    }

    pub fn set_target_rate(&self, rps: f64) {
        self.inner().target_rate.set(rps);
    }

    pub fn set_power(&self, watts: f64) {
        self.inner().power_watts.set(watts);
    }

    pub fn inc_rounds_completed(&self) {
        self.inner().rounds_completed.inc();
    }

    pub fn inc_probes_aborted(&self) {
        self.inner().probes_aborted.inc();
    }
}

/// Structured logger for experiment events
///
/// Every event carries a stable `event` field so runs can be grepped
/// and replayed from the JSON log.
#[derive(Clone)]
pub struct StructuredLogger {
    experiment: String,
}

impl StructuredLogger {
    pub fn new(experiment: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
        }
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn log_startup(&self, version: &str, targets: usize) {
        info!(
            event = "harness_started",
            experiment = %self.experiment,
            version = %version,
            targets = targets,
            "Benchmark harness started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "harness_shutdown",
            experiment = %self.experiment,
            reason = %reason,
            "Benchmark harness shutting down"
        );
    }

    pub fn log_baseline(&self, baseline: &BaselinePower) {
        match baseline.watts {
            Some(watts) => info!(
                event = "baseline_established",
                experiment = %self.experiment,
                watts = watts,
                idle_ms = baseline.idle_ms,
                "Idle power baseline established"
            ),
            None => warn!(
                event = "baseline_established",
                experiment = %self.experiment,
                watts = "unavailable",
                idle_ms = baseline.idle_ms,
                "Idle power baseline unavailable, energy counter unreadable"
            ),
        }
    }

    pub fn log_target_unavailable(&self, framework: &str, base_url: &str, attempts: u32) {
        warn!(
            event = "target_unavailable",
            experiment = %self.experiment,
            framework = %framework,
            base_url = %base_url,
            attempts = attempts,
            "Target failed liveness, skipping its rounds"
        );
    }

    pub fn log_plateau(&self, framework: &str, summary: &PlateauSummary, accepted: bool) {
        info!(
            event = "plateau_evaluated",
            experiment = %self.experiment,
            framework = %framework,
            target_rps = summary.target_rps,
            achieved_rps = summary.achieved_rps,
            p50_ms = summary.p50_ms,
            p95_ms = summary.p95_ms,
            p99_ms = summary.p99_ms,
            error_rate = summary.error_rate,
            requests = summary.request_count,
            accepted = accepted,
            "Plateau evaluated"
        );
    }

    pub fn log_probe_finished(
        &self,
        framework: &str,
        verdict: &str,
        sustainable_rps: u32,
        plateaus: usize,
    ) {
        info!(
            event = "probe_finished",
            experiment = %self.experiment,
            framework = %framework,
            verdict = %verdict,
            sustainable_rps = sustainable_rps,
            plateaus = plateaus,
            "Saturation probe finished"
        );
    }

    pub fn log_round(&self, record: &RunRecord) {
        info!(
            event = "round_completed",
            experiment = %self.experiment,
            framework = %record.framework,
            run = record.run_index,
            rps = record.rps,
            p99_ms = record.p99_ms,
            error_rate = record.error_rate,
            power_watts = ?record.energy.power_watts(),
            cpu_percent = ?record.cpu_percent,
            memory_mb = ?record.memory_mb,
            "Measurement round completed"
        );
    }

    pub fn log_indices(&self, framework: &str, rps_per_watt: Option<f64>, rps_per_dollar: Option<f64>) {
        info!(
            event = "indices_derived",
            experiment = %self.experiment,
            framework = %framework,
            rps_per_watt = ?rps_per_watt,
            rps_per_dollar = ?rps_per_dollar,
            "Composite indices derived"
        );
    }
}
