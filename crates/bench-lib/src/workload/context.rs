//! Per-run request context
//!
//! Replaces process-wide counters: every generator run owns one context
//! and hands it to the template builders.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default upper bound for random entity ids (seeded rows in the target store)
pub const DEFAULT_ID_RANGE: u32 = 10_000;

/// State shared by all request builders of one run
#[derive(Debug)]
pub struct RequestContext {
    run_id: String,
    sequence: AtomicU64,
    id_range: u32,
}

impl RequestContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            sequence: AtomicU64::new(0),
            id_range: DEFAULT_ID_RANGE,
        }
    }

    /// Set the number of pre-seeded rows ids are drawn from
    pub fn with_id_range(mut self, id_range: u32) -> Self {
        self.id_range = id_range.max(1);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Unique, monotonically increasing number within this run
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of sequence values handed out so far
    pub fn issued(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Random id of an existing row, in 1..=id_range
    pub fn random_id(&self) -> u32 {
        rand::thread_rng().gen_range(1..=self.id_range)
    }

    /// Uniform integer in lo..=hi
    pub fn random_in(&self, lo: u32, hi: u32) -> u32 {
        if hi <= lo {
            return lo;
        }
        rand::thread_rng().gen_range(lo..=hi)
    }
}
