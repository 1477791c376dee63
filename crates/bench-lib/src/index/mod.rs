//! Composite efficiency indices
//!
//! Throughput per watt and per dollar, derived from repeated rounds and
//! the experiment's idle baseline, plus the append-only summary table
//! the rounds are recorded in.

mod calculator;
mod significance;
mod summary;

pub use calculator::{
    derive_indices, median, sample_stddev, FrameworkIndices, IndexConfig, IndexReport,
    PowerSource, Rankings, DEFAULT_HOURLY_COST_USD,
};
pub use significance::{
    mann_whitney_u, pairwise_comparisons, Comparison, MannWhitney, PValueMethod,
    PairwiseComparison, Significance,
};
pub use summary::{SummaryRow, SummaryTable};
