//! Open-loop load generation
//!
//! This module provides:
//! - Arrival scheduling at constant or linearly ramping rates
//! - A concurrent HTTP issuer with a bounded in-flight window
//! - Latency / error aggregation and per-second series output

mod generator;
mod schedule;
pub mod series;
mod stats;

pub use generator::{LoadConfig, LoadDriver, LoadGenerator, RoundResult};
pub use schedule::{IssueSchedule, RampSegment, RateController, RateShape};
pub use series::{per_second_rows, SeriesRow, SeriesWriter};
pub use stats::{round_report, summarize, LatencyHistogram, OutcomeStats};
