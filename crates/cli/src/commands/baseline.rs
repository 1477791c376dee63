//! Idle power baseline

use anyhow::{Context, Result};
use bench_lib::energy::{establish_baseline, DEFAULT_RAPL_ZONE};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use super::energy_accountant;
use crate::output::{print_heading, print_json, print_success, print_warning, OutputFormat};

#[derive(Debug, Args)]
pub struct BaselineArgs {
    /// Idle window in seconds
    #[arg(long, default_value_t = 30)]
    pub idle: u64,

    /// Powercap zone to read energy from
    #[arg(long, default_value = DEFAULT_RAPL_ZONE)]
    pub rapl_zone: PathBuf,

    /// Counter capacity when the zone does not report one
    #[arg(long)]
    pub max_range_uj: Option<u64>,

    /// Write the baseline JSON here
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

/// Measure idle power with no load applied
pub async fn measure_baseline(args: BaselineArgs, format: OutputFormat) -> Result<()> {
    let accountant = energy_accountant(&args.rapl_zone, args.max_range_uj);
    if let OutputFormat::Table = format {
        println!(
            "Measuring idle power for {}s from {}",
            args.idle,
            args.rapl_zone.display().to_string().cyan()
        );
    }

    let baseline = establish_baseline(&accountant, Duration::from_secs(args.idle)).await;

    if let Some(path) = &args.output {
        let content = serde_json::to_string_pretty(&baseline)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => print_json(&baseline)?,
        OutputFormat::Table => {
            print_heading("Idle baseline");
            match baseline.watts {
                Some(watts) => println!(
                    "{} {}",
                    "Idle power:".bold(),
                    format!("{watts:.2} W").green().bold()
                ),
                None => print_warning(
                    "Energy counter unavailable, net power and RPS/W cannot be computed",
                ),
            }
            if let Some(path) = &args.output {
                print_success(&format!("Wrote {}", path.display()));
            }
        }
    }

    Ok(())
}
