//! Idle power baseline and net-power normalization

use super::EnergyAccountant;
use crate::models::BaselinePower;
use std::time::Duration;
use tracing::info;

/// Net power never drops below this, so indices never divide by zero
pub const DEFAULT_NET_POWER_FLOOR_WATTS: f64 = 0.001;

/// Measure power over `idle` with no generated load
///
/// Runs once per experiment, before any target is exercised.
pub async fn establish_baseline(accountant: &EnergyAccountant, idle: Duration) -> BaselinePower {
    let measured_at_ms = chrono::Utc::now().timestamp_millis();
    let (reading, ()) = accountant.measure(tokio::time::sleep(idle)).await;

    let baseline = BaselinePower {
        watts: reading.power_watts(),
        idle_ms: reading.elapsed_ms,
        measured_at_ms,
    };
    info!(
        watts = ?baseline.watts,
        idle_ms = baseline.idle_ms,
        "Idle baseline measured"
    );
    baseline
}

/// Load-attributable power: `power - baseline`, floored at `floor`
///
/// `None` when the baseline is unavailable; gross power is never passed
/// off as net power.
pub fn net_power(power_watts: f64, baseline: &BaselinePower, floor: f64) -> Option<f64> {
    baseline.watts.map(|idle| (power_watts - idle).max(floor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(watts: Option<f64>) -> BaselinePower {
        BaselinePower {
            watts,
            idle_ms: 10_000.0,
            measured_at_ms: 0,
        }
    }

    #[test]
    fn test_net_power() {
        assert_eq!(net_power(20.0, &baseline(Some(5.0)), 0.001), Some(15.0));
        assert_eq!(net_power(4.0, &baseline(Some(5.0)), 0.001), Some(0.001));
    }

    #[test]
    fn test_net_power_without_baseline() {
        assert_eq!(net_power(20.0, &baseline(None), 0.001), None);
    }

    #[tokio::test]
    async fn test_baseline_without_counter() {
        let baseline =
            establish_baseline(&EnergyAccountant::unavailable(), Duration::from_millis(10)).await;
        assert_eq!(baseline.watts, None);
        assert!(baseline.idle_ms >= 10.0);
    }
}
