//! Hardware energy accounting
//!
//! Counters are read immediately before and after a measurement window.
//! Readings are explicit about availability: an unreadable counter yields
//! an "unavailable" reading, never a zero.

mod accountant;
mod baseline;
mod powercap;

pub use accountant::EnergyAccountant;
pub use baseline::{establish_baseline, net_power, DEFAULT_NET_POWER_FLOOR_WATTS};
pub use powercap::{PowercapCounter, DEFAULT_RAPL_ZONE};

use crate::error::EnergyError;

/// A monotonically increasing energy counter that wraps at a known range
pub trait EnergyCounter: Send + Sync {
    /// Current counter value in microjoules, without conversion
    fn read_microjoules(&self) -> Result<u64, EnergyError>;

    /// Value at which the counter wraps back to zero
    fn max_range_microjoules(&self) -> Result<u64, EnergyError>;

    /// Short name for artifacts and logs
    fn source(&self) -> &str;
}

/// Energy consumed between two readings, assuming at most one wrap
///
/// `end - start` when `end >= start`, otherwise `max_range - start + end`.
pub fn energy_delta(start: u64, end: u64, max_range: u64) -> u64 {
    if end >= start {
        end - start
    } else {
        max_range.saturating_sub(start).saturating_add(end)
    }
}

/// Average power in watts: `energy_uj / elapsed_ms / 1000`
///
/// `None` for an empty window.
pub fn power_watts(energy_uj: u64, elapsed_ms: f64) -> Option<f64> {
    if elapsed_ms > 0.0 && elapsed_ms.is_finite() {
        Some(energy_uj as f64 / elapsed_ms / 1000.0)
    } else {
        None
    }
}
