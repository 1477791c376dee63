//! Saturation discovery
//!
//! A staircase probe that produces a clean per-plateau series with an
//! inline abort guard, and the analyzers that turn that series into a
//! sustainable request rate.

mod analysis;
mod saturation;

pub use analysis::{
    round_rate, write_analysis_csv, PlateauAnalysis, PlateauClass, SaturationAnalysis,
    SaturationAnalyzer, ThresholdAnalyzer,
};
pub use saturation::{Plateau, ProbeConfig, ProbeReport, ProbeState, ProbeVerdict, SaturationProbe};
