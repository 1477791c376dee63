//! wattbench CLI
//!
//! Ad-hoc rounds, saturation probes and idle baselines against a single
//! service, plus offline index derivation from a summary table.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{analyze, baseline, load, probe};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// wattbench CLI
#[derive(Parser)]
#[command(name = "wb")]
#[command(author, version, about = "Throughput and energy benchmarking for web services", long_about = None)]
pub struct Cli {
    /// Base URL of the service under test (can also be set via WB_BASE_URL env var)
    #[arg(long, env = "WB_BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one constant-rate round with energy accounting
    Load(load::LoadArgs),

    /// Step the rate up until the service saturates
    Probe(probe::ProbeArgs),

    /// Measure idle power with no load applied
    Baseline(baseline::BaselineArgs),

    /// Derive RPS/W and RPS/$ indices from a summary table
    Analyze(analyze::AnalyzeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Load(args) => load::run_round(&cli.base_url, args, cli.format).await?,
        Commands::Probe(args) => probe::run_probe(&cli.base_url, args, cli.format).await?,
        Commands::Baseline(args) => baseline::measure_baseline(args, cli.format).await?,
        Commands::Analyze(args) => analyze::analyze(args, cli.format)?,
    }

    Ok(())
}
