//! wattbench harness
//!
//! Runs one configured experiment end to end (baseline, saturation,
//! energy-accounted rounds, indices) while serving health and metrics.

use anyhow::Result;
use bench_lib::{
    energy::{EnergyAccountant, EnergyCounter, PowercapCounter},
    health::HealthRegistry,
    observability::{HarnessMetrics, StructuredLogger},
    pipeline::{Experiment, TargetOutcome},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wattbench_harness::{api, config::HarnessConfig};

const HARNESS_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting wattbench-harness");

    let config = HarnessConfig::load()?;
    let accountant = energy_accountant(&config);
    let api_port = config.api_port;
    let plan = config.into_plan()?;
    info!(
        experiment = %plan.name,
        targets = plan.targets.len(),
        rounds = plan.rounds,
        results_dir = %plan.results_dir.display(),
        "Harness configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;
    let metrics = HarnessMetrics::new();

    let logger = StructuredLogger::new(plan.name.clone());
    logger.log_startup(HARNESS_VERSION, plan.targets.len());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        plan.ledger_path(),
    ));
    let _api_handle = tokio::spawn(api::serve(api_port, app_state));

    let experiment = Experiment::new(plan, accountant)?.with_health(health_registry);

    tokio::select! {
        result = experiment.run() => {
            match result {
                Ok(outcome) => {
                    for target in &outcome.targets {
                        if let TargetOutcome::Unavailable { target, reason } = target {
                            warn!(target = %target, reason = %reason, "Target skipped");
                        }
                    }
                    let ranking = outcome.report.rankings.by_rps_per_watt.join(" > ");
                    info!(ranking = %ranking, "Experiment complete");
                    logger.log_shutdown("experiment complete");
                }
                Err(e) => {
                    error!(error = %e, "Experiment failed");
                    logger.log_shutdown("experiment failed");
                    return Err(e);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            logger.log_shutdown("SIGINT received");
            info!("Shutting down, completed stages are kept in the ledger");
        }
    }

    Ok(())
}

/// RAPL counter when the configured zone is readable
fn energy_accountant(config: &HarnessConfig) -> EnergyAccountant {
    match PowercapCounter::detect(&config.rapl_zone) {
        Ok(counter) => {
            let counter = match config.energy_max_range_uj {
                Some(max) => counter.with_max_range(max),
                None => counter,
            };
            info!(
                zone = %counter.zone().display(),
                source = counter.source(),
                "Energy counter detected"
            );
            EnergyAccountant::new(Arc::new(counter))
        }
        Err(e) => {
            warn!(error = %e, "Energy counter unavailable, power will be reported as unavailable");
            EnergyAccountant::unavailable()
        }
    }
}
