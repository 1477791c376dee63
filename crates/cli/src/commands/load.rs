//! Ad-hoc constant-rate round

use anyhow::Result;
use bench_lib::load::{LoadConfig, LoadGenerator, RateController};
use bench_lib::index::SummaryTable;
use bench_lib::models::{EnergyArtifact, RoundReport, RunRecord};
use bench_lib::resources::{create_sampler, measure_usage, ResourceSampler};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;

use super::{build_selector, energy_accountant};
use crate::output::{
    color_error_rate, format_ms, format_optional, print_heading, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Framework name recorded with the round
    #[arg(long, default_value = "target")]
    pub framework: String,

    /// Arrival rate in requests per second
    #[arg(long, default_value_t = 100.0)]
    pub rps: f64,

    /// Round length in seconds
    #[arg(long, default_value_t = 30)]
    pub duration: u64,

    /// Endpoint mix (read, write)
    #[arg(long, default_value = "read")]
    pub mix: String,

    /// Weight overrides, e.g. db=50,json=50
    #[arg(long)]
    pub weights: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Ceiling on outstanding requests
    #[arg(long, default_value_t = 2_000)]
    pub max_concurrency: usize,

    /// Seed for endpoint draws
    #[arg(long)]
    pub seed: Option<u64>,

    /// Powercap zone to read energy from
    #[arg(long, default_value = bench_lib::energy::DEFAULT_RAPL_ZONE)]
    pub rapl_zone: PathBuf,

    /// Target cgroup path for CPU and memory sampling
    #[arg(long)]
    pub cgroup: Option<String>,

    #[arg(long, default_value = "/sys/fs/cgroup")]
    pub cgroup_root: PathBuf,

    /// Append the round to this summary table
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Serialize)]
struct LoadOutput {
    framework: String,
    round: RoundReport,
    energy: EnergyArtifact,
    cpu_percent: Option<f64>,
    memory_mb: Option<f64>,
}

#[derive(Tabled)]
struct LabelRow {
    #[tabled(rename = "Endpoint")]
    label: String,
    #[tabled(rename = "Requests")]
    requests: u64,
    #[tabled(rename = "Failures")]
    failures: u64,
}

/// Run one constant-rate round against `base_url`
pub async fn run_round(base_url: &str, args: LoadArgs, format: OutputFormat) -> Result<()> {
    let selector = build_selector(&args.mix, args.weights.as_deref())?;
    let config = LoadConfig {
        request_timeout: Duration::from_millis(args.timeout_ms),
        max_concurrency: args.max_concurrency,
        seed: args.seed,
        ..LoadConfig::default()
    }
    .with_base_url(base_url);
    let generator = LoadGenerator::new(config, selector)?;
    let controller = RateController::constant(args.rps, Duration::from_secs(args.duration))?;

    let sampler: Option<Arc<dyn ResourceSampler>> = match &args.cgroup {
        Some(cgroup) => match create_sampler(&args.cgroup_root, cgroup).await {
            Ok(sampler) => Some(sampler),
            Err(e) => {
                print_warning(&format!("Resource sampling unavailable: {e}"));
                None
            }
        },
        None => None,
    };

    let accountant = energy_accountant(&args.rapl_zone, None);
    let (energy, (usage, round)) = accountant
        .measure(measure_usage(sampler.as_deref(), generator.run(controller)))
        .await;
    let report = round.report();

    if let Some(path) = &args.summary {
        let table = SummaryTable::new(path);
        let run_index = table.completed_runs(&args.framework)? + 1;
        table.append(&RunRecord {
            framework: args.framework.clone(),
            run_index,
            rps: report.achieved_rps,
            p50_ms: report.p50_ms,
            p95_ms: report.p95_ms,
            p99_ms: report.p99_ms,
            error_rate: report.error_rate,
            total_requests: report.total_requests,
            energy: energy.clone(),
            cpu_percent: usage.cpu_percent,
            memory_mb: usage.memory_mb,
        })?;
        if let OutputFormat::Table = format {
            print_success(&format!("Appended run {} to {}", run_index, path.display()));
        }
    }

    match format {
        OutputFormat::Json => print_json(&LoadOutput {
            framework: args.framework,
            round: report,
            energy: energy.artifact(),
            cpu_percent: usage.cpu_percent,
            memory_mb: usage.memory_mb,
        })?,
        OutputFormat::Table => {
            print_heading(&format!("Round: {}", args.framework));
            println!("Target rate:            {:.1} req/s", report.target_rps);
            println!(
                "Achieved rate:          {}",
                format!("{:.1} req/s", report.achieved_rps).cyan()
            );
            println!(
                "Requests:               {} ({} failed)",
                report.total_requests, report.failed_requests
            );
            println!("Error rate:             {}", color_error_rate(report.error_rate));
            println!(
                "Latency p50/p95/p99:    {} / {} / {}",
                format_ms(report.p50_ms),
                format_ms(report.p95_ms),
                format_ms(report.p99_ms)
            );
            println!(
                "Power:                  {}",
                match energy.power_watts() {
                    Some(w) => format!("{w:.2} W").green().to_string(),
                    None => "unavailable".yellow().to_string(),
                }
            );
            println!(
                "CPU / memory:           {}% / {} MB",
                format_optional(usage.cpu_percent, 1),
                format_optional(usage.memory_mb, 1)
            );
            println!();

            let rows: Vec<LabelRow> = report
                .per_label
                .iter()
                .map(|(label, counts)| LabelRow {
                    label: label.clone(),
                    requests: counts.requests,
                    failures: counts.failures,
                })
                .collect();
            print_table(&rows);
        }
    }

    Ok(())
}
