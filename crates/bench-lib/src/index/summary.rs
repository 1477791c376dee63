//! Append-only summary table, one CSV row per finalized round

use crate::models::{EnergyMeasurement, EnergyReading, EnergySample, RunRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Flat CSV form of a [`RunRecord`]; empty cells are unavailable values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub framework: String,
    pub run: u32,
    pub rps: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub error_rate: f64,
    pub total_requests: u64,
    pub energy_available: bool,
    pub counter_before_uj: Option<u64>,
    pub counter_after_uj: Option<u64>,
    pub max_range_uj: Option<u64>,
    pub window_start_ms: Option<i64>,
    pub window_end_ms: Option<i64>,
    pub energy_uj: Option<u64>,
    pub elapsed_ms: f64,
    pub power_watts: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<f64>,
    pub energy_note: Option<String>,
}

impl From<&RunRecord> for SummaryRow {
    fn from(record: &RunRecord) -> Self {
        let sample = record.energy.sample();
        Self {
            framework: record.framework.clone(),
            run: record.run_index,
            rps: record.rps,
            p50_ms: record.p50_ms,
            p95_ms: record.p95_ms,
            p99_ms: record.p99_ms,
            error_rate: record.error_rate,
            total_requests: record.total_requests,
            energy_available: record.energy.is_available(),
            counter_before_uj: sample.map(|s| s.counter_start_uj),
            counter_after_uj: sample.map(|s| s.counter_end_uj),
            max_range_uj: sample.map(|s| s.max_range_uj),
            window_start_ms: sample.map(|s| s.window_start_ms),
            window_end_ms: sample.map(|s| s.window_end_ms),
            energy_uj: record.energy.energy_uj(),
            elapsed_ms: record.energy.elapsed_ms,
            power_watts: record.energy.power_watts(),
            cpu_percent: record.cpu_percent,
            memory_mb: record.memory_mb,
            energy_note: match &record.energy.measurement {
                EnergyMeasurement::Unavailable { reason } => Some(reason.clone()),
                EnergyMeasurement::Measured { .. } => None,
            },
        }
    }
}

impl SummaryRow {
    pub fn into_record(self) -> RunRecord {
        let measured = match (
            self.energy_available,
            self.counter_before_uj,
            self.counter_after_uj,
            self.energy_uj,
            self.power_watts,
        ) {
            (true, Some(start), Some(end), Some(energy_uj), Some(power_watts)) => {
                Some(EnergyMeasurement::Measured {
                    sample: EnergySample {
                        counter_start_uj: start,
                        counter_end_uj: end,
                        window_start_ms: self.window_start_ms.unwrap_or_default(),
                        window_end_ms: self.window_end_ms.unwrap_or_default(),
                        max_range_uj: self.max_range_uj.unwrap_or(u64::MAX),
                    },
                    energy_uj,
                    power_watts,
                })
            }
            _ => None,
        };

        let measurement = measured.unwrap_or_else(|| EnergyMeasurement::Unavailable {
            reason: self
                .energy_note
                .unwrap_or_else(|| "energy not recorded".to_string()),
        });

        RunRecord {
            framework: self.framework,
            run_index: self.run,
            rps: self.rps,
            p50_ms: self.p50_ms,
            p95_ms: self.p95_ms,
            p99_ms: self.p99_ms,
            error_rate: self.error_rate,
            total_requests: self.total_requests,
            energy: EnergyReading {
                elapsed_ms: self.elapsed_ms,
                measurement,
            },
            cpu_percent: self.cpu_percent,
            memory_mb: self.memory_mb,
        }
    }
}

/// Append-only CSV table of finalized rounds
#[derive(Debug, Clone)]
pub struct SummaryTable {
    path: PathBuf,
}

impl SummaryTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one finalized round; rows are never rewritten
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open summary table {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(SummaryRow::from(record))
            .context("Failed to write summary row")?;
        writer.flush().context("Failed to flush summary table")?;
        Ok(())
    }

    /// All recorded rounds; a missing table is empty
    pub fn load(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open summary table {}", self.path.display()))?;

        reader
            .deserialize::<SummaryRow>()
            .map(|row| row.map(SummaryRow::into_record))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Malformed summary table {}", self.path.display()))
    }

    /// Highest run index recorded for `framework`, zero if none
    pub fn completed_runs(&self, framework: &str) -> Result<u32> {
        Ok(self
            .load()?
            .iter()
            .filter(|r| r.framework == framework)
            .map(|r| r.run_index)
            .max()
            .unwrap_or(0))
    }
}
