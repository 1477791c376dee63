//! Benchmark library for comparing web frameworks on throughput and energy
//!
//! This crate provides the core functionality for:
//! - Weighted endpoint workloads and open-loop load generation
//! - Saturation probing and sustainable-rate analysis
//! - RAPL energy accounting against an idle baseline
//! - Per-framework efficiency indices
//! - Health checks and observability

pub mod energy;
pub mod error;
pub mod health;
pub mod index;
pub mod load;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod probe;
pub mod resources;
pub mod workload;

pub use error::{ConfigError, EnergyError, SamplerError, TargetError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{HarnessMetrics, StructuredLogger};
