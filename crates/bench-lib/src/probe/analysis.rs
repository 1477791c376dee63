//! Sustainable-rate extraction from a plateau series
//!
//! The probe only guards against catastrophic failure; picking the rate
//! used for energy rounds is the job of a [`SaturationAnalyzer`].

use crate::models::PlateauSummary;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Health class of one plateau against the nominal thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateauClass {
    Ok,
    /// Within bounds but close to them
    Warn,
    Saturated,
}

/// Per-plateau verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauAnalysis {
    pub summary: PlateauSummary,
    pub class: PlateauClass,
    pub max_sustainable: bool,
}

/// Result of analyzing one staircase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaturationAnalysis {
    pub framework: String,
    pub plateaus: Vec<PlateauAnalysis>,
    /// Last plateau within the nominal thresholds
    pub last_ok: Option<PlateauSummary>,
    /// First plateau beyond them
    pub first_saturated: Option<PlateauSummary>,
}

impl SaturationAnalysis {
    pub fn sustainable_rps(&self) -> Option<u32> {
        self.last_ok.as_ref().map(|p| p.target_rps)
    }

    /// True when no plateau crossed the thresholds
    pub fn ceiling_reached(&self) -> bool {
        self.first_saturated.is_none()
    }
}

/// Picks the sustainable rate from a plateau series
pub trait SaturationAnalyzer: Send + Sync {
    fn analyze(&self, framework: &str, plateaus: &[PlateauSummary]) -> SaturationAnalysis;
}

/// Threshold rule: a plateau is saturated when its error rate or p99
/// reaches the nominal threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdAnalyzer {
    pub error_threshold: f64,
    pub p99_threshold_ms: f64,
}

impl Default for ThresholdAnalyzer {
    fn default() -> Self {
        Self {
            error_threshold: 0.01,
            p99_threshold_ms: 1000.0,
        }
    }
}

impl ThresholdAnalyzer {
    pub fn new(error_threshold: f64, p99_threshold_ms: f64) -> Self {
        Self {
            error_threshold,
            p99_threshold_ms,
        }
    }

    pub fn classify(&self, summary: &PlateauSummary) -> PlateauClass {
        if summary.error_rate >= self.error_threshold || summary.p99_ms >= self.p99_threshold_ms {
            PlateauClass::Saturated
        } else if summary.error_rate >= self.error_threshold * 0.5
            || summary.p99_ms >= self.p99_threshold_ms * 0.7
        {
            PlateauClass::Warn
        } else {
            PlateauClass::Ok
        }
    }
}

impl SaturationAnalyzer for ThresholdAnalyzer {
    fn analyze(&self, framework: &str, plateaus: &[PlateauSummary]) -> SaturationAnalysis {
        let mut last_ok = None;
        let mut first_saturated = None;
        let classes: Vec<PlateauClass> = plateaus.iter().map(|p| self.classify(p)).collect();

        for (summary, class) in plateaus.iter().zip(&classes) {
            if *class == PlateauClass::Saturated {
                if first_saturated.is_none() {
                    first_saturated = Some(summary.clone());
                }
            } else {
                last_ok = Some(summary.clone());
            }
        }

        let sustainable = last_ok.as_ref().map(|p: &PlateauSummary| p.target_rps);
        SaturationAnalysis {
            framework: framework.to_string(),
            plateaus: plateaus
                .iter()
                .zip(classes)
                .map(|(summary, class)| PlateauAnalysis {
                    max_sustainable: Some(summary.target_rps) == sustainable,
                    summary: summary.clone(),
                    class,
                })
                .collect(),
            last_ok,
            first_saturated,
        }
    }
}

/// Fixed rate for energy rounds: a fraction of the sustainable rate,
/// never below 1 req/s
pub fn round_rate(sustainable_rps: u32, fraction: f64) -> f64 {
    (sustainable_rps as f64 * fraction).max(1.0)
}

#[derive(Debug, Serialize)]
struct AnalysisRow<'a> {
    framework: &'a str,
    target_rps: u32,
    achieved_rps: f64,
    p50_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    error_rate: f64,
    request_count: u64,
    saturated: u8,
    max_sustainable: u8,
}

/// Write one row per plateau with its saturation flags
pub fn write_analysis_csv(path: impl AsRef<Path>, analysis: &SaturationAnalysis) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for plateau in &analysis.plateaus {
        let s = &plateau.summary;
        writer.serialize(AnalysisRow {
            framework: &analysis.framework,
            target_rps: s.target_rps,
            achieved_rps: s.achieved_rps,
            p50_ms: s.p50_ms,
            p95_ms: s.p95_ms,
            p99_ms: s.p99_ms,
            error_rate: s.error_rate,
            request_count: s.request_count,
            saturated: u8::from(plateau.class == PlateauClass::Saturated),
            max_sustainable: u8::from(plateau.max_sustainable),
        })?;
    }
    writer.flush()?;
    Ok(())
}
