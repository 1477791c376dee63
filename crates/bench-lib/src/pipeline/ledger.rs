//! Persistent record of completed experiment stages
//!
//! Stored as JSON in the results directory so a re-run skips finished
//! stages and resumes rounds after the last recorded one.

use crate::models::BaselinePower;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Named experiment stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Baseline,
    Liveness(String),
    Saturation(String),
    Rounds(String),
    Indices,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Baseline => write!(f, "baseline"),
            Stage::Liveness(t) => write!(f, "liveness({t})"),
            Stage::Saturation(t) => write!(f, "saturation({t})"),
            Stage::Rounds(t) => write!(f, "rounds({t})"),
            Stage::Indices => write!(f, "indices"),
        }
    }
}

/// Last known state of a target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Pending,
    Live {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
    },
    Unavailable {
        reason: String,
    },
}

/// Per-target stage outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetProgress {
    pub status: TargetStatus,
    pub sustainable_rps: Option<u32>,
    pub round_rps: Option<f64>,
    pub completed_rounds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LedgerState {
    baseline: Option<BaselinePower>,
    #[serde(default)]
    targets: BTreeMap<String, TargetProgress>,
    #[serde(default)]
    indices_at_ms: Option<i64>,
}

/// Stage ledger bound to one file
#[derive(Debug)]
pub struct StageLedger {
    path: PathBuf,
    state: LedgerState,
}

impl StageLedger {
    /// Load the ledger at `path`; a missing file starts empty
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read ledger {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Malformed ledger {}", path.display()))?
        } else {
            LedgerState::default()
        };
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `stage` needs no further work given `rounds` per target
    pub fn is_done(&self, stage: &Stage, rounds: u32) -> bool {
        match stage {
            Stage::Baseline => self.state.baseline.is_some(),
            // liveness is always rechecked before a target's pending work
            Stage::Liveness(_) => false,
            Stage::Saturation(t) => self.target(t).round_rps.is_some(),
            Stage::Rounds(t) => self.target(t).completed_rounds >= rounds,
            Stage::Indices => self.state.indices_at_ms.is_some(),
        }
    }

    pub fn baseline(&self) -> Option<BaselinePower> {
        self.state.baseline
    }

    pub fn target(&self, name: &str) -> TargetProgress {
        self.state.targets.get(name).cloned().unwrap_or_default()
    }

    /// Every target with recorded progress
    pub fn targets(&self) -> &BTreeMap<String, TargetProgress> {
        &self.state.targets
    }

    pub fn indices_complete(&self) -> bool {
        self.state.indices_at_ms.is_some()
    }

    pub fn record_baseline(&mut self, baseline: BaselinePower) -> Result<()> {
        self.state.baseline = Some(baseline);
        self.save()
    }

    pub fn record_status(&mut self, target: &str, status: TargetStatus) -> Result<()> {
        self.entry(target).status = status;
        self.save()
    }

    pub fn record_saturation(
        &mut self,
        target: &str,
        sustainable_rps: u32,
        round_rps: f64,
    ) -> Result<()> {
        let entry = self.entry(target);
        entry.sustainable_rps = Some(sustainable_rps);
        entry.round_rps = Some(round_rps);
        self.save()
    }

    pub fn record_round(&mut self, target: &str, run_index: u32) -> Result<()> {
        let entry = self.entry(target);
        entry.completed_rounds = entry.completed_rounds.max(run_index);
        self.save()
    }

    pub fn record_indices(&mut self, at_ms: i64) -> Result<()> {
        self.state.indices_at_ms = Some(at_ms);
        self.save()
    }

    fn entry(&mut self, target: &str) -> &mut TargetProgress {
        self.state.targets.entry(target.to_string()).or_default()
    }

    /// Write through a temporary file so a crash never leaves half a ledger
    fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(&self.state).context("Failed to encode ledger")?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
