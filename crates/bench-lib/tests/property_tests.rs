// Property-based tests for the measurement core
//
// Properties tested:
// 1. Energy delta: counter wrap is handled for any start/end pair
// 2. Weighted selection: every draw in [0, 100) selects a template
// 3. Constant schedules: arrival count matches rate × duration
// 4. Saturation probe: plateaus increase strictly and never pass the ceiling

use async_trait::async_trait;
use bench_lib::energy::energy_delta;
use bench_lib::load::{LoadDriver, RateController, RoundResult};
use bench_lib::models::RequestOutcome;
use bench_lib::probe::{ProbeConfig, SaturationProbe};
use bench_lib::workload::{EndpointTemplate, WeightedEndpointSelector};
use proptest::prelude::*;
use std::time::Duration;

// Templates with weights spread evenly over 100, remainder on the last one
fn make_templates(count: u32) -> Vec<EndpointTemplate> {
    let share = 100 / count;
    (0..count)
        .map(|i| {
            let weight = if i == count - 1 {
                100 - share * (count - 1)
            } else {
                share
            };
            EndpointTemplate::get(format!("endpoint-{i}"), weight, "/json")
        })
        .collect()
}

// Driver whose latency jumps once the rate passes `knee`
struct KneeTarget {
    knee: f64,
}

#[async_trait]
impl LoadDriver for KneeTarget {
    async fn drive(&self, controller: RateController) -> RoundResult {
        let rate = controller.final_rate();
        let scheduled = controller.total_duration();
        let latency = if rate > self.knee { 60_000.0 } else { 3.0 };
        let outcomes: Vec<RequestOutcome> = controller
            .schedule()
            .map(|offset| RequestOutcome {
                label: "json".to_string(),
                issued_at_ms: offset.as_millis() as i64,
                offset_ms: offset.as_secs_f64() * 1000.0,
                duration_ms: latency,
                status_code: 200,
                success: true,
                failure: None,
            })
            .collect();

        RoundResult {
            target_rate: rate,
            planned: outcomes.len() as u64,
            scheduled,
            elapsed: scheduled,
            capacity: 16,
            outcomes,
        }
    }
}

// ============================================================================
// Property 1: Energy delta
// ============================================================================

proptest! {
    #[test]
    fn prop_energy_delta_without_wrap(start in 0u64..1_000_000, advance in 0u64..1_000_000) {
        let max = 10_000_000u64;
        prop_assert_eq!(energy_delta(start, start + advance, max), advance);
    }

    #[test]
    fn prop_energy_delta_with_one_wrap(
        max in 1_000u64..u32::MAX as u64,
        start_frac in 0.0f64..1.0,
        consumed_frac in 0.0f64..1.0,
    ) {
        let start = ((max - 1) as f64 * start_frac) as u64;
        let consumed = 1 + ((max - 1) as f64 * consumed_frac) as u64;
        let end = (start + consumed) % max;
        prop_assume!(end < start);

        prop_assert_eq!(energy_delta(start, end, max), consumed);
    }
}

#[test]
fn test_energy_delta_boundaries() {
    let max = 262_143_328_850u64;
    assert_eq!(energy_delta(5_000, 5_000, max), 0);
    assert_eq!(energy_delta(max - 1, 0, max), 1);
    assert_eq!(energy_delta(max - 10, 20, max), 30);
}

// ============================================================================
// Property 2: Weighted selection
// ============================================================================

proptest! {
    #[test]
    fn prop_selector_always_selects(count in 1u32..=10, draw in 0.0f64..100.0) {
        let selector = WeightedEndpointSelector::new(make_templates(count)).unwrap();
        let index = selector.select_index(draw);
        prop_assert!(index < count as usize);
    }

    #[test]
    fn prop_selector_follows_thresholds(count in 2u32..=10, draw in 0.0f64..100.0) {
        let templates = make_templates(count);
        let share = (100 / count) as f64;
        let selector = WeightedEndpointSelector::new(templates).unwrap();

        let expected = ((draw / share) as usize).min(count as usize - 1);
        prop_assert_eq!(selector.select_index(draw), expected);
    }
}

// ============================================================================
// Property 3: Constant schedules
// ============================================================================

proptest! {
    #[test]
    fn prop_constant_schedule_count(rate in 1.0f64..2_000.0, millis in 100u64..5_000) {
        let duration = Duration::from_millis(millis);
        let expected = rate * duration.as_secs_f64();
        let schedule: Vec<Duration> = RateController::constant(rate, duration)
            .unwrap()
            .schedule()
            .collect();

        let count = schedule.len() as f64;
        prop_assert!((count - expected).abs() <= 1.0, "count {} expected {}", count, expected);
        prop_assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(schedule.iter().all(|offset| *offset <= duration));
    }
}

// ============================================================================
// Property 4: Saturation probe staircase
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_probe_plateaus_are_monotonic(
        start in 2u32..50,
        step in 1u32..50,
        extra in 0u32..200,
        knee in 1.0f64..300.0,
    ) {
        let config = ProbeConfig {
            start_rps: start,
            step_rps: step,
            max_rps: start + extra,
            ramp_duration: Duration::from_millis(100),
            hold_duration: Duration::from_millis(500),
            warmup: Duration::ZERO,
            ..Default::default()
        };
        let max_rps = config.max_rps;

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = runtime.block_on(async {
            let mut probe = SaturationProbe::new("prop", config).unwrap();
            let report = probe.run(&KneeTarget { knee }).await.unwrap();

            let steps: Vec<u32> = report.plateaus.iter().map(|p| p.target_rps).collect();
            prop_assert!(!steps.is_empty());
            prop_assert_eq!(steps[0], start);
            prop_assert!(steps.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(steps.iter().all(|&s| s <= max_rps));
            prop_assert!(report.verdict.sustainable_rps() <= max_rps);
            Ok(())
        });
        result?;
    }
}
