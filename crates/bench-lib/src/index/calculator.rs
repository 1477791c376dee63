//! Index derivation
//!
//! Per framework, medians are taken across rounds (robust against cold
//! starts and collector pauses), power is normalized against the idle
//! baseline, and throughput is extrapolated to the full reference machine.

use crate::energy::{net_power, DEFAULT_NET_POWER_FLOOR_WATTS};
use crate::error::ConfigError;
use crate::index::significance::{pairwise_comparisons, PairwiseComparison, MIN_SAMPLES};
use crate::models::{BaselinePower, RunRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference on-demand price of a 2 vCPU / 4 GiB instance, USD per hour
pub const DEFAULT_HOURLY_COST_USD: f64 = 0.0416;

/// Parameters of index derivation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// CPU% the extrapolation scales to (100 = one full core)
    pub cpu_headroom_percent: f64,
    pub hourly_cost_usd: f64,
    pub net_power_floor_watts: f64,
    /// Power proxy per CPU percent, used only when a framework has no
    /// energy readings at all
    pub watts_per_cpu_percent: Option<f64>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cpu_headroom_percent: 100.0,
            hourly_cost_usd: DEFAULT_HOURLY_COST_USD,
            net_power_floor_watts: DEFAULT_NET_POWER_FLOOR_WATTS,
            watts_per_cpu_percent: None,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidIndexParameter { name, value })
            }
        };
        positive("cpu_headroom_percent", self.cpu_headroom_percent)?;
        positive("hourly_cost_usd", self.hourly_cost_usd)?;
        positive("net_power_floor_watts", self.net_power_floor_watts)?;
        if let Some(proxy) = self.watts_per_cpu_percent {
            positive("watts_per_cpu_percent", proxy)?;
        }
        Ok(())
    }
}

/// Where a framework's net power figure came from
///
/// A RAPL reading without an idle baseline has no net power, so such a
/// framework falls back to the CPU proxy or is `Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSource {
    Rapl,
    CpuProxy,
    Unavailable,
}

/// Aggregated rounds and derived indices of one framework
///
/// `None` means the value cannot be computed from the available
/// measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkIndices {
    pub framework: String,
    pub runs: usize,
    pub median_rps: f64,
    pub stddev_rps: f64,
    pub median_p50_ms: f64,
    pub median_p95_ms: f64,
    pub median_p99_ms: f64,
    pub median_error_rate: f64,
    pub median_power_watts: Option<f64>,
    pub net_power_watts: Option<f64>,
    pub power_source: PowerSource,
    pub median_cpu_percent: Option<f64>,
    pub median_memory_mb: Option<f64>,
    pub extrapolated_rps: Option<f64>,
    pub rps_per_watt: Option<f64>,
    pub rps_per_dollar: Option<f64>,
}

/// Frameworks ordered best-first by each criterion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rankings {
    pub by_rps: Vec<String>,
    pub by_rps_per_watt: Vec<String>,
    pub by_rps_per_dollar: Vec<String>,
    /// True when a composite ranking orders frameworks differently than
    /// raw throughput
    pub composite_differs: bool,
}

/// Result of index derivation for one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub baseline: BaselinePower,
    pub config: IndexConfig,
    pub frameworks: Vec<FrameworkIndices>,
    pub rankings: Rankings,
    /// Modeling assumptions the indices rest on
    pub assumptions: Vec<String>,
    /// Pairwise significance of per-round throughput differences
    #[serde(default)]
    pub comparisons: Vec<PairwiseComparison>,
}

impl IndexReport {
    pub fn framework(&self, name: &str) -> Option<&FrameworkIndices> {
        self.frameworks.iter().find(|f| f.framework == name)
    }
}

/// Median; mean of the two middle values for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Sample standard deviation; zero below two values
pub fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn median_of<F>(runs: &[&RunRecord], f: F) -> Option<f64>
where
    F: Fn(&RunRecord) -> Option<f64>,
{
    let values: Vec<f64> = runs.iter().filter_map(|&r| f(r)).collect();
    median(&values)
}

/// Derive per-framework indices from finished rounds
///
/// Pure: the same inputs always produce the same report.
pub fn derive_indices(
    runs: &[RunRecord],
    baseline: &BaselinePower,
    config: &IndexConfig,
) -> IndexReport {
    let mut by_framework: BTreeMap<&str, Vec<&RunRecord>> = BTreeMap::new();
    for run in runs {
        by_framework.entry(run.framework.as_str()).or_default().push(run);
    }

    let samples: Vec<(&str, Vec<f64>)> = by_framework
        .iter()
        .map(|(framework, runs)| (*framework, runs.iter().map(|r| r.rps).collect()))
        .collect();

    let frameworks: Vec<FrameworkIndices> = by_framework
        .into_iter()
        .map(|(framework, runs)| framework_indices(framework, &runs, baseline, config))
        .collect();

    IndexReport {
        baseline: *baseline,
        config: *config,
        rankings: rank(&frameworks),
        frameworks,
        assumptions: assumptions(baseline, config),
        comparisons: pairwise_comparisons(&samples),
    }
}

fn framework_indices(
    framework: &str,
    runs: &[&RunRecord],
    baseline: &BaselinePower,
    config: &IndexConfig,
) -> FrameworkIndices {
    let rps: Vec<f64> = runs.iter().map(|r| r.rps).collect();
    let median_rps = median(&rps).unwrap_or(0.0);
    let median_cpu_percent = median_of(runs, |r| r.cpu_percent);
    let measured_power = median_of(runs, |r| r.energy.power_watts());

    // proxy estimates load power directly, no baseline to remove
    let proxy = match (config.watts_per_cpu_percent, median_cpu_percent) {
        (Some(per_percent), Some(cpu)) => Some(per_percent * cpu),
        _ => None,
    };
    let measured_net =
        measured_power.and_then(|watts| net_power(watts, baseline, config.net_power_floor_watts));

    let (net_power_watts, power_source) = match (measured_net, proxy) {
        (Some(net), _) => (Some(net), PowerSource::Rapl),
        (None, Some(watts)) => (
            Some(watts.max(config.net_power_floor_watts)),
            PowerSource::CpuProxy,
        ),
        (None, None) => (None, PowerSource::Unavailable),
    };
    let median_power_watts = match power_source {
        PowerSource::CpuProxy => proxy,
        _ => measured_power,
    };

    let extrapolated_rps = median_cpu_percent
        .filter(|cpu| *cpu > 0.0)
        .map(|cpu| median_rps * (config.cpu_headroom_percent / cpu));

    FrameworkIndices {
        framework: framework.to_string(),
        runs: runs.len(),
        median_rps,
        stddev_rps: sample_stddev(&rps),
        median_p50_ms: median_of(runs, |r| Some(r.p50_ms)).unwrap_or(0.0),
        median_p95_ms: median_of(runs, |r| Some(r.p95_ms)).unwrap_or(0.0),
        median_p99_ms: median_of(runs, |r| Some(r.p99_ms)).unwrap_or(0.0),
        median_error_rate: median_of(runs, |r| Some(r.error_rate)).unwrap_or(0.0),
        median_power_watts,
        net_power_watts,
        power_source,
        median_cpu_percent,
        median_memory_mb: median_of(runs, |r| r.memory_mb),
        extrapolated_rps,
        rps_per_watt: net_power_watts.map(|net| median_rps / net),
        rps_per_dollar: extrapolated_rps.map(|rps| rps / config.hourly_cost_usd),
    }
}

fn ranked_by<F>(frameworks: &[FrameworkIndices], key: F) -> Vec<String>
where
    F: Fn(&FrameworkIndices) -> Option<f64>,
{
    let mut scored: Vec<(&str, f64)> = frameworks
        .iter()
        .filter_map(|f| key(f).map(|v| (f.framework.as_str(), v)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.into_iter().map(|(name, _)| name.to_string()).collect()
}

fn rank(frameworks: &[FrameworkIndices]) -> Rankings {
    let by_rps = ranked_by(frameworks, |f| Some(f.median_rps));
    let by_rps_per_watt = ranked_by(frameworks, |f| f.rps_per_watt);
    let by_rps_per_dollar = ranked_by(frameworks, |f| f.rps_per_dollar);

    // compare each composite order against throughput order over the same set
    let differs = |composite: &[String]| {
        let throughput: Vec<&String> = by_rps.iter().filter(|f| composite.contains(f)).collect();
        !throughput.iter().copied().eq(composite.iter())
    };
    let composite_differs = differs(&by_rps_per_watt) || differs(&by_rps_per_dollar);

    Rankings {
        by_rps,
        by_rps_per_watt,
        by_rps_per_dollar,
        composite_differs,
    }
}

fn assumptions(baseline: &BaselinePower, config: &IndexConfig) -> Vec<String> {
    let mut notes = vec![
        format!(
            "Extrapolated throughput assumes CPU scales linearly up to {}% utilization",
            config.cpu_headroom_percent
        ),
        format!(
            "Net power is measured power minus idle baseline, floored at {} W",
            config.net_power_floor_watts
        ),
        format!(
            "Throughput per dollar uses a reference cost of {} USD/hour",
            config.hourly_cost_usd
        ),
        "Medians across rounds are used for throughput, power and CPU".to_string(),
    ];
    if baseline.watts.is_none() {
        notes.push("No idle baseline was measured, so RAPL readings yield no net power".to_string());
    }
    if let Some(proxy) = config.watts_per_cpu_percent {
        notes.push(format!(
            "Frameworks without net power use a CPU proxy of {proxy} W per CPU percent"
        ));
    }
    notes.push(format!(
        "Throughput differences are tested pairwise with a two-sided Mann-Whitney U test, \
         which needs at least {} rounds per framework",
        MIN_SAMPLES
    ));
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnergyMeasurement, EnergyReading, EnergySample};

    fn reading(power_watts: Option<f64>) -> EnergyReading {
        match power_watts {
            Some(power_watts) => EnergyReading {
                elapsed_ms: 1_000.0,
                measurement: EnergyMeasurement::Measured {
                    sample: EnergySample {
                        counter_start_uj: 0,
                        counter_end_uj: (power_watts * 1_000_000.0) as u64,
                        window_start_ms: 0,
                        window_end_ms: 1_000,
                        max_range_uj: u64::MAX,
                    },
                    energy_uj: (power_watts * 1_000_000.0) as u64,
                    power_watts,
                },
            },
            None => EnergyReading::unavailable(1_000.0, "no counter"),
        }
    }

    fn run(framework: &str, index: u32, rps: f64, power: Option<f64>, cpu: Option<f64>) -> RunRecord {
        RunRecord {
            framework: framework.to_string(),
            run_index: index,
            rps,
            p50_ms: 2.0,
            p95_ms: 5.0,
            p99_ms: 9.0,
            error_rate: 0.0,
            total_requests: (rps * 60.0) as u64,
            energy: reading(power),
            cpu_percent: cpu,
            memory_mb: Some(48.0),
        }
    }

    fn baseline(watts: Option<f64>) -> BaselinePower {
        BaselinePower {
            watts,
            idle_ms: 30_000.0,
            measured_at_ms: 0,
        }
    }

    #[test]
    fn test_reference_scenario() {
        let runs = vec![run("actix", 1, 800.0, Some(20.0), Some(40.0))];
        let report = derive_indices(&runs, &baseline(Some(5.0)), &IndexConfig::default());
        let fw = report.framework("actix").unwrap();

        assert_eq!(fw.net_power_watts, Some(15.0));
        assert!((fw.rps_per_watt.unwrap() - 53.333).abs() < 0.001);
        assert!((fw.extrapolated_rps.unwrap() - 2_000.0).abs() < 1e-9);
        assert!((fw.rps_per_dollar.unwrap() - 48_076.9).abs() < 0.1);
        assert_eq!(fw.power_source, PowerSource::Rapl);
    }

    #[test]
    fn test_medians_resist_outlier_round() {
        let runs = vec![
            run("gin", 1, 1_000.0, Some(20.0), Some(50.0)),
            run("gin", 2, 100.0, Some(90.0), Some(99.0)),
            run("gin", 3, 1_020.0, Some(21.0), Some(51.0)),
        ];
        let report = derive_indices(&runs, &baseline(Some(5.0)), &IndexConfig::default());
        let fw = report.framework("gin").unwrap();

        assert_eq!(fw.runs, 3);
        assert_eq!(fw.median_rps, 1_000.0);
        assert_eq!(fw.median_power_watts, Some(21.0));
        assert_eq!(fw.median_cpu_percent, Some(51.0));
        assert!(fw.stddev_rps > 0.0);
    }

    #[test]
    fn test_net_power_floor() {
        let runs = vec![run("axum", 1, 500.0, Some(4.0), Some(10.0))];
        let report = derive_indices(&runs, &baseline(Some(5.0)), &IndexConfig::default());
        let fw = report.framework("axum").unwrap();
        assert_eq!(fw.net_power_watts, Some(DEFAULT_NET_POWER_FLOOR_WATTS));
        assert!(fw.rps_per_watt.unwrap().is_finite());
    }

    #[test]
    fn test_missing_measurements_cannot_compute() {
        let runs = vec![run("fastapi", 1, 300.0, None, None)];
        let report = derive_indices(&runs, &baseline(None), &IndexConfig::default());
        let fw = report.framework("fastapi").unwrap();

        assert_eq!(fw.power_source, PowerSource::Unavailable);
        assert_eq!(fw.rps_per_watt, None);
        assert_eq!(fw.rps_per_dollar, None);
        assert!(report.rankings.by_rps_per_watt.is_empty());
    }

    #[test]
    fn test_rapl_without_baseline_has_no_net_power() {
        let runs = vec![run("actix", 1, 800.0, Some(20.0), Some(40.0))];
        let report = derive_indices(&runs, &baseline(None), &IndexConfig::default());
        let fw = report.framework("actix").unwrap();

        assert_eq!(fw.median_power_watts, Some(20.0));
        assert_eq!(fw.net_power_watts, None);
        assert_eq!(fw.rps_per_watt, None);
        assert_eq!(fw.power_source, PowerSource::Unavailable);
        assert!(report.rankings.by_rps_per_watt.is_empty());
        assert!(report.assumptions.iter().any(|a| a.contains("No idle baseline")));
    }

    #[test]
    fn test_rapl_without_baseline_falls_back_to_proxy() {
        let runs = vec![run("actix", 1, 800.0, Some(20.0), Some(40.0))];
        let config = IndexConfig {
            watts_per_cpu_percent: Some(0.5),
            ..Default::default()
        };
        let report = derive_indices(&runs, &baseline(None), &config);
        let fw = report.framework("actix").unwrap();

        assert_eq!(fw.power_source, PowerSource::CpuProxy);
        assert_eq!(fw.net_power_watts, Some(20.0));
        assert_eq!(fw.rps_per_watt, Some(40.0));
    }

    #[test]
    fn test_report_carries_pairwise_comparisons() {
        let mut runs = Vec::new();
        for i in 0..5u32 {
            runs.push(run("actix", i + 1, 900.0 + f64::from(i), Some(20.0), Some(40.0)));
            runs.push(run("gin", i + 1, 700.0 + f64::from(i), Some(12.0), Some(45.0)));
        }
        runs.push(run("fastapi", 1, 300.0, None, None));
        let report = derive_indices(&runs, &baseline(Some(5.0)), &IndexConfig::default());

        assert_eq!(report.comparisons.len(), 3);
        let actix_gin = report
            .comparisons
            .iter()
            .find(|c| c.framework_a == "actix" && c.framework_b == "gin")
            .unwrap();
        assert!(actix_gin.is_significant());
        assert!(report
            .comparisons
            .iter()
            .filter(|c| c.framework_b == "fastapi" || c.framework_a == "fastapi")
            .all(|c| !c.is_significant()));
    }

    #[test]
    fn test_cpu_proxy_only_when_configured() {
        let runs = vec![run("spring", 1, 600.0, None, Some(60.0))];
        let config = IndexConfig {
            watts_per_cpu_percent: Some(0.5),
            ..Default::default()
        };
        let report = derive_indices(&runs, &baseline(Some(5.0)), &config);
        let fw = report.framework("spring").unwrap();

        assert_eq!(fw.power_source, PowerSource::CpuProxy);
        assert_eq!(fw.net_power_watts, Some(30.0));
        assert_eq!(fw.rps_per_watt, Some(20.0));
        assert!(report.assumptions.iter().any(|a| a.contains("CPU proxy")));
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let runs = vec![
            run("actix", 1, 800.0, Some(20.0), Some(40.0)),
            run("gin", 1, 700.0, Some(12.0), Some(45.0)),
        ];
        let base = baseline(Some(5.0));
        let config = IndexConfig::default();

        let first = derive_indices(&runs, &base, &config);
        let second = derive_indices(&runs, &base, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_rankings_and_divergence() {
        let runs = vec![
            run("actix", 1, 800.0, Some(25.0), Some(40.0)),
            run("gin", 1, 700.0, Some(10.0), Some(45.0)),
        ];
        let report = derive_indices(&runs, &baseline(Some(5.0)), &IndexConfig::default());

        assert_eq!(report.rankings.by_rps, vec!["actix", "gin"]);
        assert_eq!(report.rankings.by_rps_per_watt, vec!["gin", "actix"]);
        assert!(report.rankings.composite_differs);
    }

    #[test]
    fn test_median_and_stddev() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(sample_stddev(&[5.0]), 0.0);
        assert!((sample_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138).abs() < 0.001);
    }

    #[test]
    fn test_config_validation() {
        assert!(IndexConfig::default().validate().is_ok());
        let err = IndexConfig {
            hourly_cost_usd: 0.0,
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidIndexParameter {
                name: "hourly_cost_usd",
                value: 0.0
            }
        );
    }
}
