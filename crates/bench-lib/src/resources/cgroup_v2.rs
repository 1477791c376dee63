//! cgroup v2 sampling
//!
//! - cpu.stat `usage_usec` for cumulative CPU time
//! - memory.current for current memory usage

use super::{read_cgroup_value, CgroupVersion, ResourceSampler, ResourceSnapshot};
use crate::error::SamplerError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::Instant;

/// Sampler for one cgroup in the unified hierarchy
pub struct CgroupV2Sampler {
    cgroup_path: PathBuf,
}

impl CgroupV2Sampler {
    pub fn new(cgroup_root: impl AsRef<Path>, cgroup: &str) -> Self {
        Self {
            cgroup_path: cgroup_root.as_ref().join(cgroup.trim_start_matches('/')),
        }
    }

    pub fn cgroup_path(&self) -> &Path {
        &self.cgroup_path
    }

    /// Extract `usage_usec` from cpu.stat contents
    pub fn parse_cpu_stat(content: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("usage_usec"), Some(value)) => value.parse().ok(),
                _ => None,
            }
        })
    }
}

#[async_trait]
impl ResourceSampler for CgroupV2Sampler {
    async fn snapshot(&self) -> Result<ResourceSnapshot, SamplerError> {
        let stat_path = self.cgroup_path.join("cpu.stat");
        let stat = fs::read_to_string(&stat_path)
            .await
            .map_err(|source| SamplerError::Read {
                path: stat_path.clone(),
                source,
            })?;
        let taken_at = Instant::now();

        let cpu_usage_usec = Self::parse_cpu_stat(&stat).ok_or_else(|| SamplerError::Parse {
            file: stat_path.display().to_string(),
            value: "usage_usec missing".to_string(),
        })?;
        let memory_bytes = read_cgroup_value(&self.cgroup_path.join("memory.current")).await?;

        Ok(ResourceSnapshot {
            cpu_usage_usec,
            memory_bytes,
            taken_at,
        })
    }

    fn version(&self) -> CgroupVersion {
        CgroupVersion::V2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_stat() {
        let content = "usage_usec 5000000\nuser_usec 3000000\nsystem_usec 2000000\nnr_throttled 5\n";
        assert_eq!(CgroupV2Sampler::parse_cpu_stat(content), Some(5_000_000));
        assert_eq!(CgroupV2Sampler::parse_cpu_stat("nr_periods 1\n"), None);
    }

    #[test]
    fn test_cgroup_path_join() {
        let sampler = CgroupV2Sampler::new("/sys/fs/cgroup", "/system.slice/docker-abc.scope");
        assert_eq!(
            sampler.cgroup_path(),
            Path::new("/sys/fs/cgroup/system.slice/docker-abc.scope")
        );
    }
}
