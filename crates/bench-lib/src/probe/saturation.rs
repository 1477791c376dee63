//! Staircase saturation probe
//!
//! Drives a [`LoadDriver`] through ascending plateaus. Each plateau is a
//! single open-loop schedule: a short linear ramp from the previous rate
//! followed by the hold. Only the hold outcomes are evaluated.

use crate::error::ConfigError;
use crate::load::{per_second_rows, summarize, LoadDriver, RampSegment, RateController, SeriesWriter};
use crate::models::{PlateauSummary, RequestOutcome};
use crate::observability::{HarnessMetrics, StructuredLogger};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Staircase layout and acceptance bounds
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub start_rps: u32,
    pub step_rps: u32,
    /// Rate ceiling; the last plateau is clamped to it
    pub max_rps: u32,
    pub ramp_duration: Duration,
    pub hold_duration: Duration,
    /// Hold at the start rate before the first plateau, never evaluated.
    /// Zero disables it.
    pub warmup: Duration,
    /// Nominal error-rate threshold, fraction in (0, 1]
    pub error_threshold: f64,
    /// Nominal p99 threshold in milliseconds
    pub p99_threshold_ms: f64,
    /// Plateaus at or beyond `abort_error_multiple × error_threshold`
    /// error rate halt the staircase
    pub abort_error_multiple: f64,
    /// Plateaus at or beyond `abort_p99_multiple × p99_threshold_ms`
    /// halt the staircase
    pub abort_p99_multiple: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            start_rps: 200,
            step_rps: 200,
            max_rps: 10_000,
            ramp_duration: Duration::from_secs(2),
            hold_duration: Duration::from_secs(30),
            warmup: Duration::from_secs(10),
            error_threshold: 0.01,
            p99_threshold_ms: 1000.0,
            abort_error_multiple: 5.0,
            abort_p99_multiple: 5.0,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_rps == 0 {
            return Err(ConfigError::InvalidRate(0.0));
        }
        if self.step_rps == 0 {
            return Err(ConfigError::InvalidProbe("step must be positive".into()));
        }
        if self.max_rps < self.start_rps {
            return Err(ConfigError::InvalidProbe(format!(
                "max rate {} is below start rate {}",
                self.max_rps, self.start_rps
            )));
        }
        if self.hold_duration.is_zero() {
            return Err(ConfigError::InvalidDuration("plateau hold"));
        }
        // the first plateau must schedule at least one arrival
        if self.hold_duration.as_secs_f64() * (self.start_rps as f64) < 1.0 {
            return Err(ConfigError::InvalidProbe(format!(
                "hold of {:.3}s at {} req/s schedules no requests",
                self.hold_duration.as_secs_f64(),
                self.start_rps
            )));
        }
        if !(self.error_threshold > 0.0 && self.error_threshold <= 1.0) {
            return Err(ConfigError::InvalidProbe(format!(
                "error threshold {} outside (0, 1]",
                self.error_threshold
            )));
        }
        if !(self.p99_threshold_ms > 0.0) || !self.p99_threshold_ms.is_finite() {
            return Err(ConfigError::InvalidProbe(format!(
                "p99 threshold {} ms must be positive",
                self.p99_threshold_ms
            )));
        }
        if !(self.abort_error_multiple >= 1.0) || !(self.abort_p99_multiple >= 1.0) {
            return Err(ConfigError::InvalidProbe(
                "abort multiples must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn abort_error_rate(&self) -> f64 {
        self.error_threshold * self.abort_error_multiple
    }

    pub fn abort_p99_ms(&self) -> f64 {
        self.p99_threshold_ms * self.abort_p99_multiple
    }

    /// Step after `current`, clamped to the ceiling
    fn next_step(&self, current: u32) -> u32 {
        current.saturating_add(self.step_rps).min(self.max_rps)
    }
}

/// Probe state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "rps", rename_all = "snake_case")]
pub enum ProbeState {
    RampingTo(u32),
    Holding(u32),
    Evaluating(u32),
    Saturated,
    Aborted,
}

impl ProbeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProbeState::Saturated | ProbeState::Aborted)
    }
}

/// How the staircase ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeVerdict {
    /// Every plateau up to the ceiling was accepted
    Saturated { sustainable_rps: u32 },
    /// A plateau crossed an abort bound; `sustainable_rps` is the last
    /// accepted step, zero if none
    Aborted {
        sustainable_rps: u32,
        at_rps: u32,
        reason: String,
    },
}

impl ProbeVerdict {
    pub fn sustainable_rps(&self) -> u32 {
        match self {
            ProbeVerdict::Saturated { sustainable_rps }
            | ProbeVerdict::Aborted {
                sustainable_rps, ..
            } => *sustainable_rps,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ProbeVerdict::Aborted { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProbeVerdict::Saturated { .. } => "saturated",
            ProbeVerdict::Aborted { .. } => "aborted",
        }
    }
}

/// One held staircase step
#[derive(Debug, Clone)]
pub struct Plateau {
    pub target_rps: u32,
    pub ramp_duration: Duration,
    pub hold_duration: Duration,
    /// Hold-phase outcomes, ordered by issue time
    pub outcomes: Vec<RequestOutcome>,
}

impl PlateauSummary {
    /// Aggregate a plateau; achieved rate is successful responses over
    /// the hold
    pub fn from_plateau(plateau: &Plateau) -> Self {
        let stats = summarize(&plateau.outcomes);
        Self {
            target_rps: plateau.target_rps,
            achieved_rps: stats.achieved_rps(plateau.hold_duration),
            p50_ms: stats.p50_ms,
            p95_ms: stats.p95_ms,
            p99_ms: stats.p99_ms,
            error_rate: stats.error_rate(),
            request_count: stats.requests,
        }
    }
}

/// Full result of one staircase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub framework: String,
    pub plateaus: Vec<PlateauSummary>,
    /// Every state entered, in order
    pub transitions: Vec<ProbeState>,
    pub verdict: ProbeVerdict,
}

/// Staircase prober for one target
pub struct SaturationProbe {
    config: ProbeConfig,
    framework: String,
    series: Option<SeriesWriter>,
    logger: Option<StructuredLogger>,
    metrics: Option<HarnessMetrics>,
}

impl SaturationProbe {
    pub fn new(framework: impl Into<String>, config: ProbeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            framework: framework.into(),
            series: None,
            logger: None,
            metrics: None,
        })
    }

    /// Append per-second rows of every plateau to `writer`
    pub fn with_series(mut self, writer: SeriesWriter) -> Self {
        self.series = Some(writer);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_metrics(mut self, metrics: HarnessMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run the staircase to a terminal state
    pub async fn run<D>(&mut self, driver: &D) -> Result<ProbeReport>
    where
        D: LoadDriver + ?Sized,
    {
        let mut transitions = Vec::new();
        let mut plateaus = Vec::new();
        let mut last_accepted: Option<u32> = None;
        let mut current_rate = 0.0;

        if !self.config.warmup.is_zero() {
            let warmup = self.controller(current_rate, self.config.start_rps, self.config.warmup)?;
            debug!(
                framework = %self.framework,
                rps = self.config.start_rps,
                warmup_secs = self.config.warmup.as_secs_f64(),
                "Running warm-up"
            );
            driver.drive(warmup).await;
            current_rate = self.config.start_rps as f64;
        }

        let mut state = ProbeState::RampingTo(self.config.start_rps);
        let mut held: Option<Plateau> = None;

        let verdict = loop {
            transitions.push(state);

            state = match state {
                ProbeState::RampingTo(step) => ProbeState::Holding(step),

                ProbeState::Holding(step) => {
                    let controller =
                        self.controller(current_rate, step, self.config.hold_duration)?;
                    let ramp = self.ramp_for(current_rate, step);
                    let round = driver.drive(controller).await;

                    held = Some(Plateau {
                        target_rps: step,
                        ramp_duration: ramp,
                        hold_duration: self.config.hold_duration,
                        outcomes: round.outcomes_after(ramp).cloned().collect(),
                    });
                    current_rate = step as f64;
                    ProbeState::Evaluating(step)
                }

                ProbeState::Evaluating(step) => {
                    let plateau = held.take().ok_or_else(|| {
                        anyhow::anyhow!("evaluating plateau {step} without holding it")
                    })?;
                    let summary = PlateauSummary::from_plateau(&plateau);
                    self.append_series(&plateau)?;

                    let rejection = self.rejection(&summary);
                    if let Some(logger) = &self.logger {
                        logger.log_plateau(&self.framework, &summary, rejection.is_none());
                    }
                    plateaus.push(summary);

                    match rejection {
                        Some(reason) => {
                            transitions.push(ProbeState::Aborted);
                            break ProbeVerdict::Aborted {
                                sustainable_rps: last_accepted.unwrap_or(0),
                                at_rps: step,
                                reason,
                            };
                        }
                        None if step >= self.config.max_rps => {
                            transitions.push(ProbeState::Saturated);
                            break ProbeVerdict::Saturated {
                                sustainable_rps: step,
                            };
                        }
                        None => {
                            last_accepted = Some(step);
                            ProbeState::RampingTo(self.config.next_step(step))
                        }
                    }
                }

                ProbeState::Saturated | ProbeState::Aborted => {
                    anyhow::bail!("probe re-entered terminal state {state:?}")
                }
            };
        };

        if verdict.is_aborted() {
            warn!(
                framework = %self.framework,
                verdict = ?verdict,
                "Saturation probe aborted"
            );
            if let Some(metrics) = &self.metrics {
                metrics.inc_probes_aborted();
            }
        } else {
            info!(
                framework = %self.framework,
                sustainable_rps = verdict.sustainable_rps(),
                "Saturation probe reached rate ceiling"
            );
        }
        if let Some(logger) = &self.logger {
            logger.log_probe_finished(
                &self.framework,
                verdict.name(),
                verdict.sustainable_rps(),
                plateaus.len(),
            );
        }

        Ok(ProbeReport {
            framework: self.framework.clone(),
            plateaus,
            transitions,
            verdict,
        })
    }

    fn ramp_for(&self, from: f64, to: u32) -> Duration {
        if (from - to as f64).abs() < f64::EPSILON {
            Duration::ZERO
        } else {
            self.config.ramp_duration
        }
    }

    /// Ramp from `from` to `to`, then hold `to` for `hold`
    fn controller(&self, from: f64, to: u32, hold: Duration) -> Result<RateController> {
        let target = to as f64;
        let mut segments = Vec::with_capacity(2);
        let ramp = self.ramp_for(from, to);
        if !ramp.is_zero() {
            segments.push(RampSegment {
                duration: ramp,
                target_rate: target,
            });
        }
        segments.push(RampSegment {
            duration: hold,
            target_rate: target,
        });
        let start = if ramp.is_zero() { target } else { from };
        Ok(RateController::ramping(start, segments)?)
    }

    /// Reason the plateau crosses an abort bound, if any
    fn rejection(&self, summary: &PlateauSummary) -> Option<String> {
        if summary.request_count == 0 {
            return Some("no requests completed during hold".to_string());
        }
        if summary.error_rate >= self.config.abort_error_rate() {
            return Some(format!(
                "error rate {:.4} at or above abort bound {:.4}",
                summary.error_rate,
                self.config.abort_error_rate()
            ));
        }
        if summary.p99_ms >= self.config.abort_p99_ms() {
            return Some(format!(
                "p99 {:.1} ms at or above abort bound {:.1} ms",
                summary.p99_ms,
                self.config.abort_p99_ms()
            ));
        }
        None
    }

    fn append_series(&mut self, plateau: &Plateau) -> Result<()> {
        if let Some(writer) = self.series.as_mut() {
            let rows = per_second_rows(&self.framework, plateau.target_rps, &plateau.outcomes);
            writer.append(&rows)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::RoundResult;
    use crate::models::FailureKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Synthetic target whose latency and errors depend on the rate
    struct ScriptedTarget {
        profile: fn(f64) -> (f64, bool),
        rounds: Mutex<Vec<f64>>,
    }

    impl ScriptedTarget {
        fn new(profile: fn(f64) -> (f64, bool)) -> Self {
            Self {
                profile,
                rounds: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LoadDriver for ScriptedTarget {
        async fn drive(&self, controller: RateController) -> RoundResult {
            let rate = controller.final_rate();
            let scheduled = controller.total_duration();
            self.rounds.lock().unwrap().push(rate);

            let (latency, success) = (self.profile)(rate);
            let outcomes: Vec<RequestOutcome> = controller
                .schedule()
                .map(|offset| RequestOutcome {
                    label: "db".to_string(),
                    issued_at_ms: offset.as_millis() as i64,
                    offset_ms: offset.as_secs_f64() * 1000.0,
                    duration_ms: latency,
                    status_code: if success { 200 } else { 0 },
                    success,
                    failure: (!success).then_some(FailureKind::Timeout),
                })
                .collect();

            RoundResult {
                target_rate: rate,
                planned: outcomes.len() as u64,
                scheduled,
                elapsed: scheduled,
                capacity: 16,
                outcomes,
            }
        }
    }

    fn fast_config() -> ProbeConfig {
        ProbeConfig {
            ramp_duration: Duration::from_millis(200),
            hold_duration: Duration::from_secs(1),
            warmup: Duration::ZERO,
            max_rps: 2_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_aborts_on_catastrophic_latency() {
        let target = ScriptedTarget::new(|rate| if rate >= 800.0 { (9_000.0, true) } else { (5.0, true) });
        let mut probe = SaturationProbe::new("actix", fast_config()).unwrap();
        let report = probe.run(&target).await.unwrap();

        let steps: Vec<u32> = report.plateaus.iter().map(|p| p.target_rps).collect();
        assert_eq!(steps, vec![200, 400, 600, 800]);
        match &report.verdict {
            ProbeVerdict::Aborted {
                sustainable_rps,
                at_rps,
                reason,
            } => {
                assert_eq!(*sustainable_rps, 600);
                assert_eq!(*at_rps, 800);
                assert!(reason.contains("p99"), "{reason}");
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(report.transitions.last(), Some(&ProbeState::Aborted));
        assert_eq!(target.rounds.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_saturated_at_ceiling_with_clamped_last_step() {
        let target = ScriptedTarget::new(|_| (2.0, true));
        let config = ProbeConfig {
            start_rps: 200,
            step_rps: 300,
            max_rps: 1_000,
            ..fast_config()
        };
        let mut probe = SaturationProbe::new("gin", config).unwrap();
        let report = probe.run(&target).await.unwrap();

        let steps: Vec<u32> = report.plateaus.iter().map(|p| p.target_rps).collect();
        assert_eq!(steps, vec![200, 500, 800, 1_000]);
        assert_eq!(
            report.verdict,
            ProbeVerdict::Saturated {
                sustainable_rps: 1_000
            }
        );
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
        assert!(steps.iter().all(|s| *s <= 1_000));
    }

    #[tokio::test]
    async fn test_hold_outcomes_only() {
        let target = ScriptedTarget::new(|_| (1.0, true));
        let config = ProbeConfig {
            max_rps: 200,
            ..fast_config()
        };
        let mut probe = SaturationProbe::new("axum", config).unwrap();
        let report = probe.run(&target).await.unwrap();

        // ramp 0 -> 200 over 0.2s adds ~20 arrivals that are not evaluated
        let plateau = &report.plateaus[0];
        assert!((plateau.request_count as i64 - 200).abs() <= 1);
        assert!((plateau.achieved_rps - 200.0).abs() <= 1.0);
        assert_eq!(
            report.transitions,
            vec![
                ProbeState::RampingTo(200),
                ProbeState::Holding(200),
                ProbeState::Evaluating(200),
                ProbeState::Saturated,
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_target_aborts_at_first_step() {
        let target = ScriptedTarget::new(|_| (10_000.0, false));
        let mut probe = SaturationProbe::new("broken", fast_config()).unwrap();
        let report = probe.run(&target).await.unwrap();

        assert_eq!(report.plateaus.len(), 1);
        assert!(report.verdict.is_aborted());
        assert_eq!(report.verdict.sustainable_rps(), 0);
        assert!(report.plateaus[0].request_count > 0);
        assert_eq!(report.plateaus[0].achieved_rps, 0.0);
    }

    #[tokio::test]
    async fn test_partial_failures_reduce_achieved_rate() {
        // responses stop once the rate passes 300
        let target = ScriptedTarget::new(|rate| (2.0, rate < 300.0));
        let config = ProbeConfig {
            max_rps: 400,
            ..fast_config()
        };
        let mut probe = SaturationProbe::new("degraded", config).unwrap();
        let report = probe.run(&target).await.unwrap();

        assert_eq!(report.plateaus.len(), 2);
        assert!((report.plateaus[0].achieved_rps - 200.0).abs() <= 1.0);
        assert_eq!(report.plateaus[1].achieved_rps, 0.0);
        assert_eq!(report.plateaus[1].error_rate, 1.0);
    }

    #[tokio::test]
    async fn test_warmup_is_driven_but_not_evaluated() {
        let target = ScriptedTarget::new(|_| (1.0, true));
        let config = ProbeConfig {
            max_rps: 400,
            warmup: Duration::from_secs(1),
            ..fast_config()
        };
        let mut probe = SaturationProbe::new("fastapi", config).unwrap();
        let report = probe.run(&target).await.unwrap();

        assert_eq!(*target.rounds.lock().unwrap(), vec![200.0, 200.0, 400.0]);
        assert_eq!(report.plateaus.len(), 2);
    }

    #[tokio::test]
    async fn test_series_written_per_plateau() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.csv");
        let target = ScriptedTarget::new(|_| (1.0, true));
        let config = ProbeConfig {
            max_rps: 400,
            hold_duration: Duration::from_secs(2),
            ..fast_config()
        };

        let mut probe = SaturationProbe::new("spring", config)
            .unwrap()
            .with_series(SeriesWriter::open(&path).unwrap());
        probe.run(&target).await.unwrap();

        let rows = crate::load::series::read_series(&path).unwrap();
        assert!(rows.iter().any(|r| r.target_rps == 200));
        assert!(rows.iter().any(|r| r.target_rps == 400));
        assert!(rows.iter().all(|r| r.framework == "spring"));
    }

    #[test]
    fn test_config_validation() {
        assert!(ProbeConfig::default().validate().is_ok());
        assert!(ProbeConfig {
            step_rps: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ProbeConfig {
            max_rps: 100,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ProbeConfig {
            abort_p99_multiple: 0.5,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_rejects_hold_without_arrivals() {
        let err = ProbeConfig {
            start_rps: 1,
            step_rps: 1,
            hold_duration: Duration::from_millis(500),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProbe(ref m) if m.contains("no requests")));

        assert!(ProbeConfig {
            start_rps: 1,
            step_rps: 1,
            hold_duration: Duration::from_secs(1),
            ..Default::default()
        }
        .validate()
        .is_ok());
    }
}
