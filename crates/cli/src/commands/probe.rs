//! Ad-hoc saturation staircase

use anyhow::Result;
use bench_lib::load::{LoadConfig, LoadGenerator, SeriesWriter};
use bench_lib::probe::{
    round_rate, write_analysis_csv, ProbeConfig, ProbeVerdict, SaturationAnalyzer,
    SaturationProbe, ThresholdAnalyzer,
};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tabled::Tabled;

use super::build_selector;
use crate::output::{
    color_class, color_error_rate, format_ms, print_heading, print_info, print_json, print_table,
    print_warning, OutputFormat,
};

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[arg(long, default_value = "target")]
    pub framework: String,

    /// First plateau rate
    #[arg(long, default_value_t = 200)]
    pub start: u32,

    /// Increment between plateaus
    #[arg(long, default_value_t = 200)]
    pub step: u32,

    /// Rate ceiling
    #[arg(long, default_value_t = 10_000)]
    pub max: u32,

    /// Ramp between plateaus, seconds
    #[arg(long, default_value_t = 2.0)]
    pub ramp: f64,

    /// Plateau hold, seconds
    #[arg(long, default_value_t = 30.0)]
    pub hold: f64,

    /// Unevaluated warm-up at the start rate, seconds (0 disables)
    #[arg(long, default_value_t = 10.0)]
    pub warmup: f64,

    /// Nominal error-rate threshold (fraction)
    #[arg(long, default_value_t = 0.01)]
    pub error_threshold: f64,

    /// Nominal p99 threshold in milliseconds
    #[arg(long, default_value_t = 1000.0)]
    pub p99_threshold_ms: f64,

    /// Fraction of the sustainable rate suggested for rounds
    #[arg(long, default_value_t = 0.7)]
    pub round_fraction: f64,

    #[arg(long, default_value = "read")]
    pub mix: String,

    #[arg(long)]
    pub weights: Option<String>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the per-second series CSV here
    #[arg(long)]
    pub series: Option<PathBuf>,

    /// Write the per-plateau analysis CSV here
    #[arg(long)]
    pub analysis: Option<PathBuf>,
}

#[derive(Tabled)]
struct PlateauRow {
    #[tabled(rename = "Target")]
    target: u32,
    #[tabled(rename = "Achieved")]
    achieved: String,
    #[tabled(rename = "p50")]
    p50: String,
    #[tabled(rename = "p99")]
    p99: String,
    #[tabled(rename = "Errors")]
    errors: String,
    #[tabled(rename = "Class")]
    class: String,
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| anyhow::anyhow!("invalid {name}: {value}"))
}

/// Run a staircase against `base_url` and report the sustainable rate
pub async fn run_probe(base_url: &str, args: ProbeArgs, format: OutputFormat) -> Result<()> {
    let selector = build_selector(&args.mix, args.weights.as_deref())?;
    let config = LoadConfig {
        seed: args.seed,
        ..LoadConfig::default()
    }
    .with_base_url(base_url);
    let generator = LoadGenerator::new(config, selector)?;

    let probe_config = ProbeConfig {
        start_rps: args.start,
        step_rps: args.step,
        max_rps: args.max,
        ramp_duration: seconds(args.ramp, "ramp")?,
        hold_duration: seconds(args.hold, "hold")?,
        warmup: seconds(args.warmup, "warm-up")?,
        error_threshold: args.error_threshold,
        p99_threshold_ms: args.p99_threshold_ms,
        ..ProbeConfig::default()
    };
    let analyzer = ThresholdAnalyzer::new(args.error_threshold, args.p99_threshold_ms);

    let mut probe = SaturationProbe::new(args.framework.clone(), probe_config)?;
    if let Some(path) = &args.series {
        probe = probe.with_series(SeriesWriter::open(path)?);
    }
    let report = probe.run(&generator).await?;
    let analysis = analyzer.analyze(&args.framework, &report.plateaus);
    if let Some(path) = &args.analysis {
        write_analysis_csv(path, &analysis)?;
    }

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "report": report,
            "analysis": analysis,
        }))?,
        OutputFormat::Table => {
            print_heading(&format!("Saturation probe: {}", args.framework));
            let rows: Vec<PlateauRow> = analysis
                .plateaus
                .iter()
                .map(|p| PlateauRow {
                    target: p.summary.target_rps,
                    achieved: format!("{:.1}", p.summary.achieved_rps),
                    p50: format_ms(p.summary.p50_ms),
                    p99: format_ms(p.summary.p99_ms),
                    errors: color_error_rate(p.summary.error_rate),
                    class: color_class(p.class),
                })
                .collect();
            print_table(&rows);
            println!();

            if let ProbeVerdict::Aborted { at_rps, reason, .. } = &report.verdict {
                print_warning(&format!("Aborted at {at_rps} req/s: {reason}"));
            }
            match analysis.sustainable_rps() {
                Some(rps) => {
                    println!(
                        "{} {}",
                        "Sustainable rate:".bold(),
                        format!("{rps} req/s").green().bold()
                    );
                    print_info(&format!(
                        "Suggested round rate: {:.1} req/s",
                        round_rate(rps, args.round_fraction)
                    ));
                }
                None => print_warning("No plateau stayed within the thresholds"),
            }
        }
    }

    Ok(())
}
