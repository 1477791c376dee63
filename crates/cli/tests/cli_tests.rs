//! CLI integration tests

use bench_lib::index::SummaryTable;
use bench_lib::models::{EnergyReading, RunRecord};
use std::process::Command;

fn wb() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wb"))
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = wb().arg("--help").output().expect("Failed to execute wb");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("energy benchmarking"), "Should show about text");
    for command in ["load", "probe", "baseline", "analyze"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

#[test]
fn test_cli_version() {
    let output = wb().arg("--version").output().expect("Failed to execute wb");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("wb"), "Should show binary name");
}

#[test]
fn test_probe_help_lists_staircase_flags() {
    let output = wb()
        .args(["probe", "--help"])
        .output()
        .expect("Failed to execute wb");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for flag in ["--start", "--step", "--hold", "--warmup", "--p99-threshold-ms"] {
        assert!(stdout.contains(flag), "Should show {flag}");
    }
}

#[test]
fn test_invalid_format_is_rejected() {
    let output = wb()
        .args(["--format", "yaml", "analyze"])
        .output()
        .expect("Failed to execute wb");

    assert!(!output.status.success());
}

fn record(framework: &str, run_index: u32, rps: f64, cpu: f64) -> RunRecord {
    RunRecord {
        framework: framework.to_string(),
        run_index,
        rps,
        p50_ms: 2.0,
        p95_ms: 5.0,
        p99_ms: 9.0,
        error_rate: 0.0,
        total_requests: (rps * 60.0) as u64,
        energy: EnergyReading::unavailable(60_000.0, "energy counter not configured"),
        cpu_percent: Some(cpu),
        memory_mb: Some(48.0),
    }
}

#[test]
fn test_analyze_uses_cpu_proxy_when_energy_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let summary = dir.path().join("summary.csv");
    let table = SummaryTable::new(&summary);
    for (i, rps) in [790.0, 800.0, 810.0].into_iter().enumerate() {
        table.append(&record("actix", i as u32 + 1, rps, 20.0)).unwrap();
    }

    let output = wb()
        .args(["--format", "json", "analyze", "--summary"])
        .arg(&summary)
        .args(["--watts-per-cpu-percent", "0.01"])
        .output()
        .expect("Failed to execute wb");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let actix = &report["frameworks"][0];
    assert_eq!(actix["framework"], "actix");
    assert_eq!(actix["runs"], 3);
    assert_eq!(actix["median_rps"], 800.0);
    assert_eq!(actix["power_source"], "cpu_proxy");
    assert!(actix["rps_per_watt"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_analyze_without_power_reports_cannot_compute() {
    let dir = tempfile::tempdir().unwrap();
    let summary = dir.path().join("summary.csv");
    SummaryTable::new(&summary)
        .append(&record("gin", 1, 500.0, 10.0))
        .unwrap();

    let output = wb()
        .args(["--format", "json", "analyze", "--summary"])
        .arg(&summary)
        .output()
        .expect("Failed to execute wb");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["frameworks"][0]["rps_per_watt"].is_null());
    assert_eq!(report["frameworks"][0]["power_source"], "unavailable");
}
