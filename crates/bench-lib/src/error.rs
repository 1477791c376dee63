//! Error taxonomy for the benchmark engine
//!
//! Per-request failures are never errors: they are recorded as
//! non-success outcomes. Everything here is either rejected before load
//! is generated or degrades to an explicit "unavailable" marker.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration, rejected before any request is issued
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("endpoint table is empty")]
    NoTemplates,

    #[error("endpoint '{label}' has weight {weight}, expected 1..=100")]
    WeightOutOfRange { label: String, weight: u32 },

    #[error("endpoint weights sum to {sum}, expected exactly 100")]
    WeightSum { sum: u32 },

    #[error("duplicate endpoint label '{0}'")]
    DuplicateLabel(String),

    #[error("weight override names unknown endpoint '{0}'")]
    UnknownLabel(String),

    #[error("unknown workload mix '{0}'")]
    UnknownMix(String),

    #[error("invalid rate {0} req/s, must be a finite positive number")]
    InvalidRate(f64),

    #[error("invalid duration for {0}: must be greater than zero")]
    InvalidDuration(&'static str),

    #[error("invalid probe configuration: {0}")]
    InvalidProbe(String),

    #[error("invalid base url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("round count {0} must be at least 1")]
    InvalidRounds(u32),

    #[error("no targets configured")]
    NoTargets,

    #[error("duplicate target name '{0}'")]
    DuplicateTarget(String),

    #[error("invalid index parameter {name}: {value}")]
    InvalidIndexParameter { name: &'static str, value: f64 },
}

/// Target service could not be reached before its round
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target {base_url} unavailable after {attempts} liveness attempts: {last_error}")]
    Unavailable {
        base_url: String,
        attempts: u32,
        last_error: String,
    },
}

/// Hardware energy counter could not be used
#[derive(Debug, Error)]
pub enum EnergyError {
    #[error("energy counter not configured")]
    NotConfigured,

    #[error("failed to read energy counter {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("energy counter {path} holds unparsable value '{value}'")]
    Parse { path: PathBuf, value: String },

    #[error("energy counter range is zero")]
    ZeroRange,
}

/// Resource (CPU / memory) sampling failed
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("no cgroup configured for target")]
    NotConfigured,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {file}: '{value}'")]
    Parse { file: String, value: String },
}
