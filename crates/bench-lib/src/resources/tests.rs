//! Sampling tests against mock cgroup filesystems

#[cfg(test)]
mod mock_cgroup_tests {
    use crate::resources::{
        create_sampler, detect_cgroup_version, measure_usage, CgroupVersion, ResourceSnapshot,
        ResourceUsage,
    };
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;
    use tokio::time::Instant;

    const CGROUP: &str = "/system.slice/docker-bench.scope";

    async fn create_mock_cgroup_v2(temp_dir: &TempDir) -> (PathBuf, PathBuf) {
        let root = temp_dir.path().to_path_buf();
        fs::write(root.join("cgroup.controllers"), "cpu memory io\n")
            .await
            .unwrap();

        let target = root.join(CGROUP.trim_start_matches('/'));
        fs::create_dir_all(&target).await.unwrap();
        fs::write(
            target.join("cpu.stat"),
            "usage_usec 5000000\nuser_usec 3000000\nsystem_usec 2000000\n",
        )
        .await
        .unwrap();
        fs::write(target.join("memory.current"), "104857600\n")
            .await
            .unwrap();

        (root, target)
    }

    async fn create_mock_cgroup_v1(temp_dir: &TempDir) -> PathBuf {
        let root = temp_dir.path().to_path_buf();
        let cpuacct = root.join("cpuacct").join(CGROUP.trim_start_matches('/'));
        let memory = root.join("memory").join(CGROUP.trim_start_matches('/'));
        fs::create_dir_all(&cpuacct).await.unwrap();
        fs::create_dir_all(&memory).await.unwrap();

        fs::write(cpuacct.join("cpuacct.usage"), "7000000000\n")
            .await
            .unwrap();
        fs::write(memory.join("memory.usage_in_bytes"), "52428800\n")
            .await
            .unwrap();
        root
    }

    #[tokio::test]
    async fn test_v2_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let (root, _) = create_mock_cgroup_v2(&temp_dir).await;

        assert_eq!(detect_cgroup_version(&root).await, CgroupVersion::V2);
        let sampler = create_sampler(&root, CGROUP).await.unwrap();
        assert_eq!(sampler.version(), CgroupVersion::V2);

        let snapshot = sampler.snapshot().await.unwrap();
        assert_eq!(snapshot.cpu_usage_usec, 5_000_000);
        assert_eq!(snapshot.memory_bytes, 104_857_600);
    }

    #[tokio::test]
    async fn test_v1_snapshot_converts_nanoseconds() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_cgroup_v1(&temp_dir).await;

        assert_eq!(detect_cgroup_version(&root).await, CgroupVersion::V1);
        let sampler = create_sampler(&root, CGROUP).await.unwrap();

        let snapshot = sampler.snapshot().await.unwrap();
        assert_eq!(snapshot.cpu_usage_usec, 7_000_000);
        assert_eq!(snapshot.memory_bytes, 52_428_800);
    }

    #[tokio::test]
    async fn test_unknown_hierarchy_is_not_configured() {
        let temp_dir = TempDir::new().unwrap();
        assert!(create_sampler(temp_dir.path(), CGROUP).await.is_err());
    }

    #[test]
    fn test_usage_between_snapshots() {
        let start = Instant::now();
        let a = ResourceSnapshot {
            cpu_usage_usec: 1_000_000,
            memory_bytes: 0,
            taken_at: start,
        };
        let b = ResourceSnapshot {
            cpu_usage_usec: 1_400_000,
            memory_bytes: 256 * 1024 * 1024,
            taken_at: start + Duration::from_secs(1),
        };

        let usage = ResourceUsage::between(&a, &b);
        assert!((usage.cpu_percent.unwrap() - 40.0).abs() < 1e-9);
        assert_eq!(usage.memory_mb, Some(256.0));

        // more than one core
        let c = ResourceSnapshot {
            cpu_usage_usec: 3_000_000,
            ..b
        };
        assert!((ResourceUsage::between(&a, &c).cpu_percent.unwrap() - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_measure_usage_over_window() {
        let temp_dir = TempDir::new().unwrap();
        let (root, target) = create_mock_cgroup_v2(&temp_dir).await;
        let sampler = create_sampler(&root, CGROUP).await.unwrap();

        let stat_path = target.join("cpu.stat");
        let (usage, ()) = measure_usage(Some(sampler.as_ref()), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fs::write(&stat_path, "usage_usec 5010000\n").await.unwrap();
        })
        .await;

        let cpu = usage.cpu_percent.unwrap();
        assert!(cpu > 0.0);
        assert_eq!(usage.memory_mb, Some(100.0));
    }

    #[tokio::test]
    async fn test_measure_usage_degrades_on_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (root, target) = create_mock_cgroup_v2(&temp_dir).await;
        let sampler = create_sampler(&root, CGROUP).await.unwrap();

        let memory = target.join("memory.current");
        let (usage, ()) = measure_usage(Some(sampler.as_ref()), async {
            fs::remove_file(&memory).await.unwrap();
        })
        .await;
        assert_eq!(usage, ResourceUsage::unavailable());

        let (usage, value) = measure_usage(None, async { 3 }).await;
        assert_eq!(value, 3);
        assert_eq!(usage.cpu_percent, None);
    }
}
