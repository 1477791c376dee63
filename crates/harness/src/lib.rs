//! Benchmark harness: configuration loading and the health/metrics API
//! served while an experiment runs

pub mod api;
pub mod config;
