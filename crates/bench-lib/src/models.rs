//! Core data models shared by the load, probe, energy and index modules

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status recorded for requests that never produced an HTTP response
/// (timeout, refused connection, round deadline).
pub const STATUS_NO_RESPONSE: u16 = 0;

/// Why a request did not produce a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Per-request timeout elapsed
    Timeout,
    /// Connection refused or reset before a response
    Connect,
    /// Any other transport-level failure (body read, protocol)
    Transport,
    /// Still in flight when the round's hard deadline passed
    Deadline,
}

/// Outcome of one issued request. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub label: String,
    /// Scheduled issue time, epoch milliseconds
    pub issued_at_ms: i64,
    /// Scheduled issue time relative to the round start
    pub offset_ms: f64,
    /// From scheduled issue to last byte received; includes queueing delay
    pub duration_ms: f64,
    pub status_code: u16,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

/// Aggregate statistics of one staircase plateau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauSummary {
    pub target_rps: u32,
    pub achieved_rps: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Fraction in [0, 1]
    pub error_rate: f64,
    pub request_count: u64,
}

/// Per-label request counts within a round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub requests: u64,
    pub failures: u64,
}

/// Machine-readable result of one fixed-rate round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub target_rps: f64,
    pub achieved_rps: f64,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Fraction in [0, 1]
    pub error_rate: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub per_label: BTreeMap<String, LabelCounts>,
}

/// Raw counter readings bracketing a measurement window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergySample {
    pub counter_start_uj: u64,
    pub counter_end_uj: u64,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    /// Counter capacity; values wrap to zero when they reach it
    pub max_range_uj: u64,
}

impl EnergySample {
    /// Consumed energy, corrected for at most one counter wrap
    pub fn energy_uj(&self) -> u64 {
        crate::energy::energy_delta(self.counter_start_uj, self.counter_end_uj, self.max_range_uj)
    }
}

/// Energy measurement result, explicit about availability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnergyMeasurement {
    Measured {
        sample: EnergySample,
        energy_uj: u64,
        power_watts: f64,
    },
    Unavailable {
        reason: String,
    },
}

/// Energy accounted for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub elapsed_ms: f64,
    pub measurement: EnergyMeasurement,
}

impl EnergyReading {
    pub fn unavailable(elapsed_ms: f64, reason: impl Into<String>) -> Self {
        Self {
            elapsed_ms,
            measurement: EnergyMeasurement::Unavailable {
                reason: reason.into(),
            },
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.measurement, EnergyMeasurement::Measured { .. })
    }

    pub fn power_watts(&self) -> Option<f64> {
        match &self.measurement {
            EnergyMeasurement::Measured { power_watts, .. } => Some(*power_watts),
            EnergyMeasurement::Unavailable { .. } => None,
        }
    }

    pub fn energy_uj(&self) -> Option<u64> {
        match &self.measurement {
            EnergyMeasurement::Measured { energy_uj, .. } => Some(*energy_uj),
            EnergyMeasurement::Unavailable { .. } => None,
        }
    }

    pub fn sample(&self) -> Option<&EnergySample> {
        match &self.measurement {
            EnergyMeasurement::Measured { sample, .. } => Some(sample),
            EnergyMeasurement::Unavailable { .. } => None,
        }
    }

    /// Flat artifact form written next to each round
    pub fn artifact(&self) -> EnergyArtifact {
        EnergyArtifact {
            available: self.is_available(),
            counter_before_uj: self.sample().map(|s| s.counter_start_uj),
            counter_after_uj: self.sample().map(|s| s.counter_end_uj),
            elapsed_ms: self.elapsed_ms,
            energy_uj: self.energy_uj(),
            power_watts: self.power_watts(),
            reason: match &self.measurement {
                EnergyMeasurement::Unavailable { reason } => Some(reason.clone()),
                EnergyMeasurement::Measured { .. } => None,
            },
        }
    }
}

/// Energy artifact: before/after counters, elapsed time, derived values
/// and an explicit availability flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyArtifact {
    pub available: bool,
    pub counter_before_uj: Option<u64>,
    pub counter_after_uj: Option<u64>,
    pub elapsed_ms: f64,
    pub energy_uj: Option<u64>,
    pub power_watts: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Idle power floor, fixed for a whole experiment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselinePower {
    /// `None` when the energy counter was unavailable during the idle window
    pub watts: Option<f64>,
    pub idle_ms: f64,
    pub measured_at_ms: i64,
}

/// One finalized measurement round for one target service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub framework: String,
    pub run_index: u32,
    pub rps: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub error_rate: f64,
    pub total_requests: u64,
    pub energy: EnergyReading,
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<f64>,
}
