//! Per-second time series for staircase plateaus
//!
//! Rows are appended to a CSV file and flushed after every plateau, so a
//! staircase that dies halfway is still analyzable.

use super::stats::summarize;
use crate::models::RequestOutcome;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// One sampling interval of one plateau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub framework: String,
    pub target_rps: u32,
    /// Start of the interval, epoch milliseconds
    pub timestamp_ms: i64,
    /// Interval index relative to the first outcome passed in
    pub second: u64,
    /// Successful responses completed in the interval
    pub rps: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub error_rate: f64,
    /// Requests completed in the interval, failed ones included
    pub requests: u64,
}

/// Bucket outcomes into one-second intervals by completion time
///
/// Intervals start at the earliest scheduled issue. A target that falls
/// behind pushes completions into later intervals, so `rps` drops below
/// the offered rate once it saturates.
pub fn per_second_rows(
    framework: &str,
    target_rps: u32,
    outcomes: &[RequestOutcome],
) -> Vec<SeriesRow> {
    let Some(first) = outcomes
        .iter()
        .map(|o| o.offset_ms)
        .min_by(|a, b| a.total_cmp(b))
    else {
        return Vec::new();
    };
    let origin_ms = outcomes
        .iter()
        .map(|o| o.issued_at_ms)
        .min()
        .unwrap_or_default();

    let mut buckets: BTreeMap<u64, Vec<&RequestOutcome>> = BTreeMap::new();
    for outcome in outcomes {
        let completed_ms = outcome.offset_ms + outcome.duration_ms;
        let second = ((completed_ms - first) / 1000.0).floor().max(0.0) as u64;
        buckets.entry(second).or_default().push(outcome);
    }

    buckets
        .into_iter()
        .map(|(second, bucket)| {
            let stats = summarize(bucket.iter().copied());
            SeriesRow {
                framework: framework.to_string(),
                target_rps,
                timestamp_ms: origin_ms + second as i64 * 1000,
                second,
                rps: stats.successes() as f64,
                p50_ms: stats.p50_ms,
                p95_ms: stats.p95_ms,
                p99_ms: stats.p99_ms,
                error_rate: stats.error_rate(),
                requests: stats.requests,
            }
        })
        .collect()
}

/// Append-only CSV writer for [`SeriesRow`]s
pub struct SeriesWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl SeriesWriter {
    /// Open `path` for appending; the header is written only to a new or
    /// empty file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let needs_header = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open series file {}", path.display()))?;

        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one plateau's rows and flush them to disk
    pub fn append(&mut self, rows: &[SeriesRow]) -> Result<()> {
        for row in rows {
            self.writer
                .serialize(row)
                .with_context(|| format!("Failed to write series row to {}", self.path.display()))?;
        }
        self.writer.flush().context("Failed to flush series file")?;
        Ok(())
    }
}

/// Read a series file back
pub fn read_series(path: impl AsRef<Path>) -> Result<Vec<SeriesRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open series file {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<SeriesRow>, _>>()
        .with_context(|| format!("Malformed series file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(offset_ms: f64, duration_ms: f64, success: bool) -> RequestOutcome {
        RequestOutcome {
            label: "json".to_string(),
            issued_at_ms: 1_700_000_000_000 + offset_ms as i64,
            offset_ms,
            duration_ms,
            status_code: if success { 200 } else { 503 },
            success,
            failure: None,
        }
    }

    #[test]
    fn test_buckets_by_second() {
        let mut outcomes: Vec<_> = (0..10).map(|i| outcome(i as f64 * 100.0, 2.0, true)).collect();
        outcomes.extend((0..5).map(|i| outcome(1000.0 + i as f64 * 200.0, 8.0, i != 0)));

        let rows = per_second_rows("actix", 200, &outcomes);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].second, 0);
        assert_eq!(rows[0].rps, 10.0);
        assert_eq!(rows[0].error_rate, 0.0);
        assert_eq!(rows[1].requests, 5);
        assert_eq!(rows[1].rps, 4.0);
        assert!((rows[1].error_rate - 0.2).abs() < 1e-12);
        assert_eq!(rows[1].timestamp_ms - rows[0].timestamp_ms, 1000);
    }

    #[test]
    fn test_buckets_relative_to_first_outcome() {
        // plateau started 32s into the staircase
        let outcomes = vec![outcome(32_000.0, 1.0, true), outcome(32_998.0, 1.0, true)];
        let rows = per_second_rows("gin", 400, &outcomes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].second, 0);
    }

    #[test]
    fn test_slow_responses_land_in_later_intervals() {
        // 10 req/s offered for 2s, every response takes 1.5s
        let outcomes: Vec<_> = (0..20).map(|i| outcome(i as f64 * 100.0, 1_500.0, true)).collect();
        let rows = per_second_rows("spring", 10, &outcomes);

        let seconds: Vec<u64> = rows.iter().map(|r| r.second).collect();
        let rps: Vec<f64> = rows.iter().map(|r| r.rps).collect();
        assert_eq!(seconds, vec![1, 2, 3]);
        assert_eq!(rps, vec![5.0, 10.0, 5.0]);
    }

    #[test]
    fn test_failed_completions_carry_no_throughput() {
        let outcomes: Vec<_> = (0..10).map(|i| outcome(i as f64 * 100.0, 5.0, false)).collect();
        let rows = per_second_rows("broken", 10, &outcomes);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].requests, 10);
        assert_eq!(rows[0].rps, 0.0);
        assert_eq!(rows[0].error_rate, 1.0);
    }

    #[test]
    fn test_empty_outcomes() {
        assert!(per_second_rows("x", 1, &[]).is_empty());
    }

    #[test]
    fn test_writer_appends_with_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series").join("probe.csv");

        let rows = per_second_rows("axum", 200, &[outcome(0.0, 1.0, true)]);
        {
            let mut writer = SeriesWriter::open(&path).unwrap();
            writer.append(&rows).unwrap();
        }
        {
            let mut writer = SeriesWriter::open(&path).unwrap();
            writer.append(&rows).unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("framework").count(), 1);

        let back = read_series(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0], rows[0]);
    }
}
