//! Energy accounting around a measurement window

use super::{energy_delta, power_watts, EnergyCounter};
use crate::models::{EnergyMeasurement, EnergyReading, EnergySample};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Brackets a window of work with energy counter reads
#[derive(Clone, Default)]
pub struct EnergyAccountant {
    counter: Option<Arc<dyn EnergyCounter>>,
}

impl EnergyAccountant {
    pub fn new(counter: Arc<dyn EnergyCounter>) -> Self {
        Self {
            counter: Some(counter),
        }
    }

    /// Accountant that reports every window as unavailable
    pub fn unavailable() -> Self {
        Self { counter: None }
    }

    pub fn is_configured(&self) -> bool {
        self.counter.is_some()
    }

    /// Name of the counter source, if any
    pub fn source(&self) -> Option<&str> {
        self.counter.as_deref().map(|c| c.source())
    }

    /// Run `window`, reading the counter immediately before and after it
    ///
    /// The window must include any drain or cancellation grace period of
    /// the work it measures.
    pub async fn measure<F, T>(&self, window: F) -> (EnergyReading, T)
    where
        F: Future<Output = T>,
    {
        let Some(counter) = self.counter.as_deref() else {
            let start = Instant::now();
            let output = window.await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            return (
                EnergyReading::unavailable(elapsed_ms, "energy counter not configured"),
                output,
            );
        };

        // range is read outside the window so the bracket stays tight
        let range = counter.max_range_microjoules();

        let window_start_ms = chrono::Utc::now().timestamp_millis();
        let before = counter.read_microjoules();
        let start = Instant::now();

        let output = window.await;

        let after = counter.read_microjoules();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let window_end_ms = chrono::Utc::now().timestamp_millis();

        let reading = match (range, before, after) {
            (Ok(max_range_uj), Ok(counter_start_uj), Ok(counter_end_uj)) => {
                let sample = EnergySample {
                    counter_start_uj,
                    counter_end_uj,
                    window_start_ms,
                    window_end_ms,
                    max_range_uj,
                };
                Self::reading(sample, elapsed_ms)
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                warn!(
                    source = counter.source(),
                    error = %e,
                    "Energy counter unreadable, window reported as unavailable"
                );
                EnergyReading::unavailable(elapsed_ms, e.to_string())
            }
        };

        (reading, output)
    }

    /// Turn a raw sample into a reading over `elapsed_ms`
    pub fn reading(sample: EnergySample, elapsed_ms: f64) -> EnergyReading {
        let energy_uj = energy_delta(
            sample.counter_start_uj,
            sample.counter_end_uj,
            sample.max_range_uj,
        );
        if sample.counter_end_uj < sample.counter_start_uj {
            debug!(
                start = sample.counter_start_uj,
                end = sample.counter_end_uj,
                "Energy counter wrapped during window"
            );
        }

        match power_watts(energy_uj, elapsed_ms) {
            Some(power_watts) => EnergyReading {
                elapsed_ms,
                measurement: EnergyMeasurement::Measured {
                    sample,
                    energy_uj,
                    power_watts,
                },
            },
            None => EnergyReading::unavailable(elapsed_ms, "empty measurement window"),
        }
    }
}
