//! Offline index derivation from a summary table

use anyhow::{Context, Result};
use bench_lib::index::{
    derive_indices, Comparison, IndexConfig, PowerSource, SummaryTable, DEFAULT_HOURLY_COST_USD,
};
use bench_lib::models::BaselinePower;
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use crate::output::{
    format_ms, format_optional, print_heading, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Summary table written by the harness or `wb load --summary`
    #[arg(long, default_value = "results/summary.csv")]
    pub summary: PathBuf,

    /// Baseline JSON written by the harness or `wb baseline --output`
    #[arg(long)]
    pub baseline: Option<PathBuf>,

    /// Idle power in watts, used when no baseline file is given
    #[arg(long, conflicts_with = "baseline")]
    pub baseline_watts: Option<f64>,

    /// CPU% the throughput extrapolation scales to
    #[arg(long, default_value_t = 100.0)]
    pub cpu_headroom: f64,

    /// Reference instance cost in USD per hour
    #[arg(long, default_value_t = DEFAULT_HOURLY_COST_USD)]
    pub hourly_cost: f64,

    /// Power proxy in watts per CPU percent, for frameworks without energy readings
    #[arg(long)]
    pub watts_per_cpu_percent: Option<f64>,

    /// Write the index report JSON here
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Tabled)]
struct IndexRow {
    #[tabled(rename = "Framework")]
    framework: String,
    #[tabled(rename = "Runs")]
    runs: usize,
    #[tabled(rename = "RPS")]
    rps: String,
    #[tabled(rename = "p99")]
    p99: String,
    #[tabled(rename = "CPU %")]
    cpu: String,
    #[tabled(rename = "Net W")]
    net_watts: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "RPS/W")]
    rps_per_watt: String,
    #[tabled(rename = "RPS/$")]
    rps_per_dollar: String,
}

fn load_baseline(path: &Path) -> Result<BaselinePower> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read baseline {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse baseline")
}

fn source_label(source: PowerSource) -> String {
    match source {
        PowerSource::Rapl => "rapl".green().to_string(),
        PowerSource::CpuProxy => "cpu proxy".yellow().to_string(),
        PowerSource::Unavailable => "n/a".red().to_string(),
    }
}

/// Derive and print per-framework efficiency indices
pub fn analyze(args: AnalyzeArgs, format: OutputFormat) -> Result<()> {
    let baseline = match (&args.baseline, args.baseline_watts) {
        (Some(path), _) => load_baseline(path)?,
        (None, watts) => BaselinePower {
            watts,
            idle_ms: 0.0,
            measured_at_ms: 0,
        },
    };

    let config = IndexConfig {
        cpu_headroom_percent: args.cpu_headroom,
        hourly_cost_usd: args.hourly_cost,
        watts_per_cpu_percent: args.watts_per_cpu_percent,
        ..IndexConfig::default()
    };
    config.validate()?;

    let runs = SummaryTable::new(&args.summary).load()?;
    if runs.is_empty() {
        print_warning(&format!("No runs in {}", args.summary.display()));
        return Ok(());
    }
    let report = derive_indices(&runs, &baseline, &config);

    if let Some(path) = &args.output {
        let content = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_heading("Efficiency indices");
            println!(
                "Idle baseline:          {}",
                match baseline.watts {
                    Some(w) => format!("{w:.2} W"),
                    None => "unavailable".yellow().to_string(),
                }
            );
            println!();

            let rows: Vec<IndexRow> = report
                .frameworks
                .iter()
                .map(|f| IndexRow {
                    framework: f.framework.clone(),
                    runs: f.runs,
                    rps: format!("{:.1} ± {:.1}", f.median_rps, f.stddev_rps),
                    p99: format_ms(f.median_p99_ms),
                    cpu: format_optional(f.median_cpu_percent, 1),
                    net_watts: format_optional(f.net_power_watts, 2),
                    source: source_label(f.power_source),
                    rps_per_watt: format_optional(f.rps_per_watt, 2),
                    rps_per_dollar: format_optional(f.rps_per_dollar, 0),
                })
                .collect();
            print_table(&rows);
            println!();

            let rankings = &report.rankings;
            println!("{}", "Rankings".bold());
            println!("{}", "-".repeat(50));
            println!("By RPS:                 {}", rankings.by_rps.join(" > "));
            println!("By RPS/W:               {}", rankings.by_rps_per_watt.join(" > "));
            println!("By RPS/$:               {}", rankings.by_rps_per_dollar.join(" > "));
            if rankings.composite_differs {
                print_info("Efficiency rankings differ from the raw throughput ranking");
            }
            println!();

            if !report.comparisons.is_empty() {
                println!("{}", "Throughput differences (Mann-Whitney U)".bold());
                println!("{}", "-".repeat(50));
                for pair in &report.comparisons {
                    let verdict = match &pair.comparison {
                        Comparison::Tested {
                            u,
                            p_value,
                            significance,
                            ..
                        } => format!("U={u:.1} p={p_value:.4} {}", significance.marker()),
                        Comparison::InsufficientSamples { runs_a, runs_b } => {
                            format!("insufficient runs ({runs_a} vs {runs_b})")
                                .yellow()
                                .to_string()
                        }
                    };
                    println!(
                        "{} vs {}: {}",
                        pair.framework_a, pair.framework_b, verdict
                    );
                }
                println!();
            }

            for assumption in &report.assumptions {
                println!("{}", assumption.dimmed());
            }
            if let Some(path) = &args.output {
                print_success(&format!("Wrote {}", path.display()));
            }
        }
    }

    Ok(())
}
