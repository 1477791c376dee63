//! CPU and memory sampling of the service under test
//!
//! Usage is read from the target's cgroup, v2 (unified hierarchy) or v1
//! (legacy controllers), with automatic detection. A missing or
//! unreadable cgroup degrades to an explicit unavailable marker.

mod cgroup_v1;
mod cgroup_v2;

#[cfg(test)]
mod tests;

pub use cgroup_v1::{detect_cgroup_version, CgroupV1Sampler, CgroupVersion};
pub use cgroup_v2::CgroupV2Sampler;

use crate::error::SamplerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Cumulative counters of one cgroup at one instant
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    /// Total CPU time consumed, microseconds
    pub cpu_usage_usec: u64,
    pub memory_bytes: u64,
    pub taken_at: Instant,
}

/// Resource usage over one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// 100% = one fully busy core
    pub cpu_percent: Option<f64>,
    /// Memory at the end of the window
    pub memory_mb: Option<f64>,
}

impl ResourceUsage {
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Usage between two snapshots of the same cgroup
    pub fn between(start: &ResourceSnapshot, end: &ResourceSnapshot) -> Self {
        let elapsed_usec = end
            .taken_at
            .saturating_duration_since(start.taken_at)
            .as_secs_f64()
            * 1_000_000.0;
        let cpu_percent = if elapsed_usec > 0.0 {
            let used = end.cpu_usage_usec.saturating_sub(start.cpu_usage_usec) as f64;
            Some(used / elapsed_usec * 100.0)
        } else {
            None
        };

        Self {
            cpu_percent,
            memory_mb: Some(end.memory_bytes as f64 / (1024.0 * 1024.0)),
        }
    }
}

/// Source of cumulative CPU / memory counters for one target
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn snapshot(&self) -> Result<ResourceSnapshot, SamplerError>;

    fn version(&self) -> CgroupVersion;
}

/// Run `window` between two snapshots
///
/// Any sampling failure, or no sampler at all, yields
/// [`ResourceUsage::unavailable`].
pub async fn measure_usage<F, T>(
    sampler: Option<&dyn ResourceSampler>,
    window: F,
) -> (ResourceUsage, T)
where
    F: Future<Output = T>,
{
    let Some(sampler) = sampler else {
        return (ResourceUsage::unavailable(), window.await);
    };

    let start = sampler.snapshot().await;
    let output = window.await;
    let end = sampler.snapshot().await;

    match (start, end) {
        (Ok(start), Ok(end)) => (ResourceUsage::between(&start, &end), output),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Resource sampling failed, usage unavailable");
            (ResourceUsage::unavailable(), output)
        }
    }
}

/// Create the sampler matching the host's cgroup layout
///
/// `cgroup` is the target's path relative to the hierarchy root, e.g.
/// `/system.slice/docker-<id>.scope`.
pub async fn create_sampler(
    cgroup_root: &Path,
    cgroup: &str,
) -> Result<Arc<dyn ResourceSampler>, SamplerError> {
    match detect_cgroup_version(cgroup_root).await {
        CgroupVersion::V2 => {
            info!(cgroup = %cgroup, "Detected cgroup v2, sampling unified hierarchy");
            Ok(Arc::new(CgroupV2Sampler::new(cgroup_root, cgroup)))
        }
        CgroupVersion::V1 => {
            info!(cgroup = %cgroup, "Detected cgroup v1, sampling cpuacct and memory controllers");
            Ok(Arc::new(CgroupV1Sampler::new(cgroup_root, cgroup)))
        }
        CgroupVersion::Unknown => Err(SamplerError::NotConfigured),
    }
}

/// Parse a single-integer cgroup file
pub(crate) async fn read_cgroup_value(path: &Path) -> Result<u64, SamplerError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SamplerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    content.trim().parse().map_err(|_| SamplerError::Parse {
        file: path.display().to_string(),
        value: content.trim().to_string(),
    })
}
