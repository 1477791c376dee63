//! cgroup v1 sampling (fallback)
//!
//! - cpuacct.usage (nanoseconds) from the cpuacct controller
//! - memory.usage_in_bytes from the memory controller

use super::{read_cgroup_value, ResourceSampler, ResourceSnapshot};
use crate::error::SamplerError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::Instant;

/// Sampler for one cgroup in the legacy per-controller hierarchy
pub struct CgroupV1Sampler {
    cpuacct_path: PathBuf,
    memory_path: PathBuf,
}

impl CgroupV1Sampler {
    pub fn new(cgroup_root: impl AsRef<Path>, cgroup: &str) -> Self {
        let root = cgroup_root.as_ref();
        Self {
            cpuacct_path: Self::controller_path(root, "cpuacct", cgroup),
            memory_path: Self::controller_path(root, "memory", cgroup),
        }
    }

    /// Full path of `cgroup` under one controller
    pub fn controller_path(root: &Path, controller: &str, cgroup: &str) -> PathBuf {
        root.join(controller).join(cgroup.trim_start_matches('/'))
    }
}

#[async_trait]
impl ResourceSampler for CgroupV1Sampler {
    async fn snapshot(&self) -> Result<ResourceSnapshot, SamplerError> {
        let usage_ns = read_cgroup_value(&self.cpuacct_path.join("cpuacct.usage")).await?;
        let taken_at = Instant::now();
        let memory_bytes =
            read_cgroup_value(&self.memory_path.join("memory.usage_in_bytes")).await?;

        Ok(ResourceSnapshot {
            cpu_usage_usec: usage_ns / 1_000,
            memory_bytes,
            taken_at,
        })
    }

    fn version(&self) -> CgroupVersion {
        CgroupVersion::V1
    }
}

/// Detect which cgroup version is mounted at `cgroup_root`
pub async fn detect_cgroup_version(cgroup_root: &Path) -> CgroupVersion {
    if fs::metadata(cgroup_root.join("cgroup.controllers")).await.is_ok() {
        return CgroupVersion::V2;
    }

    let v1_memory = cgroup_root.join("memory");
    let v1_cpuacct = cgroup_root.join("cpuacct");
    if fs::metadata(&v1_memory).await.is_ok() && fs::metadata(&v1_cpuacct).await.is_ok() {
        return CgroupVersion::V1;
    }

    CgroupVersion::Unknown
}

/// Cgroup version detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_path() {
        let path = CgroupV1Sampler::controller_path(Path::new("/sys/fs/cgroup"), "cpuacct", "/docker/abc");
        assert_eq!(path, PathBuf::from("/sys/fs/cgroup/cpuacct/docker/abc"));
    }

    #[tokio::test]
    async fn test_detect_cgroup_version_unknown() {
        let version = detect_cgroup_version(Path::new("/nonexistent/path")).await;
        assert_eq!(version, CgroupVersion::Unknown);
    }
}
