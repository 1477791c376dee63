//! Harness configuration
//!
//! Read from an optional TOML file (`WATTBENCH_CONFIG`, default
//! `wattbench.toml`) with `WATTBENCH__*` environment variables layered on
//! top, e.g. `WATTBENCH__ROUNDS__COUNT=3`.

use anyhow::{Context, Result};
use bench_lib::energy::DEFAULT_RAPL_ZONE;
use bench_lib::index::IndexConfig;
use bench_lib::load::LoadConfig;
use bench_lib::pipeline::{ExperimentPlan, LivenessConfig, TargetSpec};
use bench_lib::probe::ProbeConfig;
use bench_lib::workload::{apply_weights, named_mix};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_PATH_VAR: &str = "WATTBENCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "wattbench.toml";

/// Harness configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Experiment name attached to every log event
    #[serde(default = "default_experiment")]
    pub experiment: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Powercap zone holding `energy_uj`
    #[serde(default = "default_rapl_zone")]
    pub rapl_zone: PathBuf,

    /// Counter capacity override when `max_energy_range_uj` is unreadable
    #[serde(default)]
    pub energy_max_range_uj: Option<u64>,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    #[serde(default)]
    pub targets: Vec<TargetSpec>,

    #[serde(default)]
    pub workload: WorkloadSettings,

    #[serde(default)]
    pub load: LoadSettings,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub liveness: LivenessSettings,

    #[serde(default)]
    pub rounds: RoundSettings,

    #[serde(default)]
    pub index: IndexConfig,
}

/// Endpoint table selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    /// `read` or `write`
    pub mix: String,
    /// Per-label weight overrides; the table must still sum to 100
    pub weights: BTreeMap<String, u32>,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            mix: "read".to_string(),
            weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadSettings {
    pub request_timeout_ms: u64,
    pub worst_case_latency_ms: u64,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub drain_grace_ms: u64,
    pub seed: Option<u64>,
}

impl Default for LoadSettings {
    fn default() -> Self {
        let load = LoadConfig::default();
        Self {
            request_timeout_ms: load.request_timeout.as_millis() as u64,
            worst_case_latency_ms: load.worst_case_latency.as_millis() as u64,
            min_concurrency: load.min_concurrency,
            max_concurrency: load.max_concurrency,
            drain_grace_ms: load.drain_grace.as_millis() as u64,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub start_rps: u32,
    pub step_rps: u32,
    pub max_rps: u32,
    pub ramp_secs: f64,
    pub hold_secs: f64,
    /// Zero disables the warm-up plateau
    pub warmup_secs: f64,
    pub error_threshold: f64,
    pub p99_threshold_ms: f64,
    pub abort_error_multiple: f64,
    pub abort_p99_multiple: f64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        let probe = ProbeConfig::default();
        Self {
            start_rps: probe.start_rps,
            step_rps: probe.step_rps,
            max_rps: probe.max_rps,
            ramp_secs: probe.ramp_duration.as_secs_f64(),
            hold_secs: probe.hold_duration.as_secs_f64(),
            warmup_secs: probe.warmup.as_secs_f64(),
            error_threshold: probe.error_threshold,
            p99_threshold_ms: probe.p99_threshold_ms,
            abort_error_multiple: probe.abort_error_multiple,
            abort_p99_multiple: probe.abort_p99_multiple,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    pub path: String,
    pub attempts: u32,
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        let liveness = LivenessConfig::default();
        Self {
            path: liveness.path,
            attempts: liveness.attempts,
            interval_ms: liveness.interval.as_millis() as u64,
            request_timeout_ms: liveness.request_timeout.as_millis() as u64,
        }
    }
}

/// Energy-accounted rounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoundSettings {
    pub count: u32,
    pub duration_secs: f64,
    /// Fraction of the sustainable rate
    pub rate_fraction: f64,
    pub cooldown_secs: f64,
    pub baseline_idle_secs: f64,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            count: 5,
            duration_secs: 60.0,
            rate_fraction: 0.7,
            cooldown_secs: 10.0,
            baseline_idle_secs: 30.0,
        }
    }
}

fn default_experiment() -> String {
    "wattbench".to_string()
}

fn default_api_port() -> u16 {
    9464
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_rapl_zone() -> PathBuf {
    PathBuf::from(DEFAULT_RAPL_ZONE)
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn secs(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {name}: {value}"))
}

impl HarnessConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::from_file(path, true)
    }

    /// Load from `path` layered under the environment
    pub fn from_file(path: impl Into<PathBuf>, optional: bool) -> Result<Self> {
        let path = path.into();
        let config = config::Config::builder()
            .add_source(config::File::from(path.clone()).required(!optional))
            .add_source(
                config::Environment::with_prefix("WATTBENCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Failed to parse harness configuration")
    }

    /// Resolve into a validated experiment plan
    pub fn into_plan(self) -> Result<ExperimentPlan> {
        let templates = apply_weights(named_mix(&self.workload.mix)?, &self.workload.weights)?;

        let load = LoadConfig {
            base_url: String::new(),
            request_timeout: Duration::from_millis(self.load.request_timeout_ms),
            worst_case_latency: Duration::from_millis(self.load.worst_case_latency_ms),
            min_concurrency: self.load.min_concurrency,
            max_concurrency: self.load.max_concurrency,
            drain_grace: Duration::from_millis(self.load.drain_grace_ms),
            seed: self.load.seed,
        };

        let probe = ProbeConfig {
            start_rps: self.probe.start_rps,
            step_rps: self.probe.step_rps,
            max_rps: self.probe.max_rps,
            ramp_duration: secs(self.probe.ramp_secs, "probe ramp")?,
            hold_duration: secs(self.probe.hold_secs, "probe hold")?,
            warmup: secs(self.probe.warmup_secs, "probe warm-up")?,
            error_threshold: self.probe.error_threshold,
            p99_threshold_ms: self.probe.p99_threshold_ms,
            abort_error_multiple: self.probe.abort_error_multiple,
            abort_p99_multiple: self.probe.abort_p99_multiple,
        };

        let liveness = LivenessConfig {
            path: self.liveness.path,
            attempts: self.liveness.attempts,
            interval: Duration::from_millis(self.liveness.interval_ms),
            request_timeout: Duration::from_millis(self.liveness.request_timeout_ms),
        };

        let plan = ExperimentPlan {
            name: self.experiment,
            targets: self.targets,
            templates,
            load,
            probe,
            liveness,
            index: self.index,
            rounds: self.rounds.count,
            round_duration: secs(self.rounds.duration_secs, "round duration")?,
            round_rate_fraction: self.rounds.rate_fraction,
            baseline_idle: secs(self.rounds.baseline_idle_secs, "baseline idle window")?,
            cooldown: secs(self.rounds.cooldown_secs, "cool-down")?,
            results_dir: self.results_dir,
            cgroup_root: self.cgroup_root,
        };
        plan.validate()?;
        Ok(plan)
    }
}
