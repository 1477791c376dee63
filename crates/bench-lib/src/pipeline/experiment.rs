//! Experiment pipeline
//!
//! Baseline, then per target (strictly one at a time) liveness,
//! saturation and energy-accounted rounds, then index derivation.
//! Finished stages are recorded in a [`StageLedger`] and skipped on re-run.

use super::ledger::{Stage, StageLedger, TargetStatus};
use super::liveness::{wait_until_live, LivenessConfig};
use crate::energy::{establish_baseline, EnergyAccountant};
use crate::error::{ConfigError, TargetError};
use crate::health::{components, HealthRegistry};
use crate::index::{derive_indices, IndexConfig, IndexReport, SummaryTable};
use crate::load::{LoadConfig, LoadGenerator, RateController, SeriesWriter};
use crate::models::{BaselinePower, EnergyArtifact, RoundReport, RunRecord};
use crate::observability::{HarnessMetrics, StructuredLogger};
use crate::probe::{
    round_rate, write_analysis_csv, ProbeConfig, SaturationAnalyzer, SaturationProbe,
    ThresholdAnalyzer,
};
use crate::resources::{create_sampler, measure_usage, ResourceSampler};
use crate::workload::{EndpointTemplate, WeightedEndpointSelector};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One service under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub base_url: String,
    /// Skip saturation and run rounds at this rate
    #[serde(default)]
    pub fixed_rps: Option<f64>,
    /// Path of the target's cgroup under the hierarchy root
    #[serde(default)]
    pub cgroup: Option<String>,
}

/// Everything an experiment needs, validated before any load is generated
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub name: String,
    pub targets: Vec<TargetSpec>,
    pub templates: Vec<EndpointTemplate>,
    /// Generator settings; the base URL is replaced per target
    pub load: LoadConfig,
    pub probe: ProbeConfig,
    pub liveness: LivenessConfig,
    pub index: IndexConfig,
    pub rounds: u32,
    pub round_duration: Duration,
    /// Fraction of the sustainable rate used for rounds
    pub round_rate_fraction: f64,
    pub baseline_idle: Duration,
    /// Pause between consecutive rounds of a target
    pub cooldown: Duration,
    pub results_dir: PathBuf,
    pub cgroup_root: PathBuf,
}

impl ExperimentPlan {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let mut names = HashSet::new();
        for target in &self.targets {
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
            self.load.clone().with_base_url(&target.base_url).validate()?;
            if let Some(rate) = target.fixed_rps {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(ConfigError::InvalidRate(rate));
                }
            }
        }

        WeightedEndpointSelector::new(self.templates.clone())?;
        self.probe.validate()?;
        self.index.validate()?;

        if self.rounds == 0 {
            return Err(ConfigError::InvalidRounds(self.rounds));
        }
        if self.round_duration.is_zero() {
            return Err(ConfigError::InvalidDuration("round"));
        }
        if self.baseline_idle.is_zero() {
            return Err(ConfigError::InvalidDuration("baseline idle window"));
        }
        if !(self.round_rate_fraction > 0.0 && self.round_rate_fraction <= 1.0) {
            return Err(ConfigError::InvalidProbe(format!(
                "round rate fraction {} outside (0, 1]",
                self.round_rate_fraction
            )));
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.results_dir.join("ledger.json")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.results_dir.join("summary.csv")
    }
}

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetOutcome {
    Completed {
        target: String,
        round_rps: f64,
        rounds: u32,
    },
    Unavailable {
        target: String,
        reason: String,
    },
}

/// Result of a full pipeline run
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub baseline: BaselinePower,
    pub targets: Vec<TargetOutcome>,
    pub report: IndexReport,
}

/// Per-round JSON artifact
#[derive(Debug, Serialize, Deserialize)]
pub struct RoundArtifact {
    pub framework: String,
    pub run: u32,
    pub round: RoundReport,
    pub energy: EnergyArtifact,
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<f64>,
}

/// Runs an [`ExperimentPlan`] to completion
pub struct Experiment {
    plan: ExperimentPlan,
    accountant: EnergyAccountant,
    analyzer: Box<dyn SaturationAnalyzer>,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: HarnessMetrics,
    client: reqwest::Client,
}

impl Experiment {
    pub fn new(plan: ExperimentPlan, accountant: EnergyAccountant) -> Result<Self> {
        plan.validate()?;
        let analyzer = ThresholdAnalyzer::new(plan.probe.error_threshold, plan.probe.p99_threshold_ms);
        let logger = StructuredLogger::new(plan.name.clone());
        Ok(Self {
            plan,
            accountant,
            analyzer: Box::new(analyzer),
            health: HealthRegistry::new(),
            logger,
            metrics: HarnessMetrics::new(),
            client: reqwest::Client::new(),
        })
    }

    /// Replace the sustainable-rate analyzer
    pub fn with_analyzer(mut self, analyzer: Box<dyn SaturationAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Report component health into a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn plan(&self) -> &ExperimentPlan {
        &self.plan
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Run every pending stage
    pub async fn run(&self) -> Result<ExperimentOutcome> {
        let plan = &self.plan;
        std::fs::create_dir_all(&plan.results_dir).with_context(|| {
            format!("Failed to create results dir {}", plan.results_dir.display())
        })?;

        let mut ledger = StageLedger::load(plan.ledger_path())?;
        let summary = SummaryTable::new(plan.summary_path());

        let baseline = self.baseline_stage(&mut ledger).await?;
        self.health.set_ready(true).await;

        let mut targets = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let outcome = self.target_stages(target, &mut ledger, &summary).await?;
            targets.push(outcome);
        }

        self.health.set_stage(Stage::Indices).await;
        let report = self.indices_stage(&mut ledger, &summary, &baseline)?;

        Ok(ExperimentOutcome {
            baseline,
            targets,
            report,
        })
    }

    async fn baseline_stage(&self, ledger: &mut StageLedger) -> Result<BaselinePower> {
        self.health.set_stage(Stage::Baseline).await;
        let baseline = match ledger.baseline() {
            Some(baseline) => {
                info!(stage = %Stage::Baseline, "Stage already complete, reusing baseline");
                baseline
            }
            None => {
                let baseline = establish_baseline(&self.accountant, self.plan.baseline_idle).await;
                write_json(&self.plan.results_dir.join("baseline.json"), &baseline)?;
                ledger.record_baseline(baseline)?;
                baseline
            }
        };

        if baseline.watts.is_none() {
            self.health
                .set_degraded(components::ENERGY, "Energy counter unavailable")
                .await;
        }
        self.logger.log_baseline(&baseline);
        Ok(baseline)
    }

    async fn target_stages(
        &self,
        target: &TargetSpec,
        ledger: &mut StageLedger,
        summary: &SummaryTable,
    ) -> Result<TargetOutcome> {
        let plan = &self.plan;
        let name = target.name.as_str();

        if ledger.is_done(&Stage::Rounds(name.to_string()), plan.rounds) {
            info!(stage = %Stage::Rounds(name.to_string()), "Stage already complete");
            let progress = ledger.target(name);
            return Ok(TargetOutcome::Completed {
                target: name.to_string(),
                round_rps: progress.round_rps.or(target.fixed_rps).unwrap_or_default(),
                rounds: progress.completed_rounds,
            });
        }

        self.health.set_stage(Stage::Liveness(name.to_string())).await;
        match wait_until_live(&self.client, &target.base_url, &plan.liveness).await {
            Ok(live) => {
                self.health.set_healthy(components::TARGET).await;
                ledger.record_status(
                    name,
                    TargetStatus::Live {
                        identity: live.identity,
                    },
                )?;
            }
            Err(TargetError::Unavailable {
                base_url,
                attempts,
                last_error,
            }) => {
                self.logger.log_target_unavailable(name, &base_url, attempts);
                self.health
                    .set_degraded(components::TARGET, format!("{name} unavailable"))
                    .await;
                let reason = format!("no response after {attempts} attempts: {last_error}");
                ledger.record_status(
                    name,
                    TargetStatus::Unavailable {
                        reason: reason.clone(),
                    },
                )?;
                return Ok(TargetOutcome::Unavailable {
                    target: name.to_string(),
                    reason,
                });
            }
        }

        let selector = WeightedEndpointSelector::new(plan.templates.clone())?;
        let generator =
            match LoadGenerator::new(plan.load.clone().with_base_url(&target.base_url), selector) {
                Ok(generator) => generator.with_metrics(self.metrics.clone()),
                Err(e) => {
                    self.health
                        .set_unhealthy(components::GENERATOR, e.to_string())
                        .await;
                    return Err(e);
                }
            };

        let round_rps = self.saturation_stage(target, &generator, ledger).await?;
        let rounds = self
            .rounds_stage(target, &generator, round_rps, ledger, summary)
            .await?;

        Ok(TargetOutcome::Completed {
            target: name.to_string(),
            round_rps,
            rounds,
        })
    }

    async fn saturation_stage(
        &self,
        target: &TargetSpec,
        generator: &LoadGenerator,
        ledger: &mut StageLedger,
    ) -> Result<f64> {
        let name = target.name.as_str();
        let stage = Stage::Saturation(name.to_string());

        if let Some(rate) = target.fixed_rps {
            info!(stage = %stage, rps = rate, "Fixed round rate configured, skipping saturation");
            return Ok(rate);
        }
        if let Some(rate) = ledger.target(name).round_rps {
            info!(stage = %stage, rps = rate, "Stage already complete");
            return Ok(rate);
        }

        self.health.set_stage(&stage).await;
        let dir = &self.plan.results_dir;
        let series = SeriesWriter::open(dir.join(format!("saturation_{name}_series.csv")))?;
        let mut probe = SaturationProbe::new(name, self.plan.probe.clone())?
            .with_series(series)
            .with_logger(self.logger.clone())
            .with_metrics(self.metrics.clone());

        let report = probe.run(generator).await?;
        write_json(&dir.join(format!("saturation_{name}.json")), &report)?;

        let analysis = self.analyzer.analyze(name, &report.plateaus);
        write_analysis_csv(dir.join(format!("saturation_{name}_analysis.csv")), &analysis)?;

        let sustainable = match analysis.sustainable_rps() {
            Some(rps) => rps,
            None => {
                warn!(
                    target = %name,
                    start_rps = self.plan.probe.start_rps,
                    "No plateau within thresholds, target saturated at the start rate"
                );
                0
            }
        };
        let rate = round_rate(sustainable, self.plan.round_rate_fraction);
        ledger.record_saturation(name, sustainable, rate)?;

        info!(
            target = %name,
            sustainable_rps = sustainable,
            round_rps = rate,
            probe_verdict = report.verdict.name(),
            "Saturation stage complete"
        );
        Ok(rate)
    }

    async fn rounds_stage(
        &self,
        target: &TargetSpec,
        generator: &LoadGenerator,
        round_rps: f64,
        ledger: &mut StageLedger,
        summary: &SummaryTable,
    ) -> Result<u32> {
        let plan = &self.plan;
        let name = target.name.as_str();
        self.health.set_stage(Stage::Rounds(name.to_string())).await;
        let sampler = self.sampler_for(target).await;

        // resume after the last round that reached the summary table
        let done = summary
            .completed_runs(name)?
            .max(ledger.target(name).completed_rounds);

        for run_index in (done + 1)..=plan.rounds {
            if run_index > done + 1 && !plan.cooldown.is_zero() {
                tokio::time::sleep(plan.cooldown).await;
            }

            let controller = RateController::constant(round_rps, plan.round_duration)?;
            let (energy, (usage, round)) = self
                .accountant
                .measure(measure_usage(sampler.as_deref(), generator.run(controller)))
                .await;

            let report = round.report();
            let record = RunRecord {
                framework: name.to_string(),
                run_index,
                rps: report.achieved_rps,
                p50_ms: report.p50_ms,
                p95_ms: report.p95_ms,
                p99_ms: report.p99_ms,
                error_rate: report.error_rate,
                total_requests: report.total_requests,
                energy,
                cpu_percent: usage.cpu_percent,
                memory_mb: usage.memory_mb,
            };

            summary.append(&record)?;
            write_json(
                &plan.results_dir.join(format!("round_{name}_{run_index}.json")),
                &RoundArtifact {
                    framework: name.to_string(),
                    run: run_index,
                    round: report,
                    energy: record.energy.artifact(),
                    cpu_percent: record.cpu_percent,
                    memory_mb: record.memory_mb,
                },
            )?;
            ledger.record_round(name, run_index)?;

            self.metrics.inc_rounds_completed();
            if let Some(watts) = record.energy.power_watts() {
                self.metrics.set_power(watts);
            }
            self.logger.log_round(&record);
        }

        Ok(plan.rounds)
    }

    async fn sampler_for(&self, target: &TargetSpec) -> Option<Arc<dyn ResourceSampler>> {
        let cgroup = target.cgroup.as_deref()?;
        match create_sampler(&self.plan.cgroup_root, cgroup).await {
            Ok(sampler) => {
                self.health.set_healthy(components::SAMPLER).await;
                Some(sampler)
            }
            Err(e) => {
                warn!(target = %target.name, error = %e, "Resource sampling unavailable");
                self.health
                    .set_degraded(components::SAMPLER, e.to_string())
                    .await;
                None
            }
        }
    }

    fn indices_stage(
        &self,
        ledger: &mut StageLedger,
        summary: &SummaryTable,
        baseline: &BaselinePower,
    ) -> Result<IndexReport> {
        let runs = summary.load()?;
        let report = derive_indices(&runs, baseline, &self.plan.index);

        write_json(&self.plan.results_dir.join("indices.json"), &report)?;
        ledger.record_indices(chrono::Utc::now().timestamp_millis())?;

        for framework in &report.frameworks {
            self.logger.log_indices(
                &framework.framework,
                framework.rps_per_watt,
                framework.rps_per_dollar,
            );
        }
        Ok(report)
    }
}

/// Pretty-printed JSON artifact
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value).context("Failed to encode artifact")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
