//! Linux powercap (RAPL) energy counter
//!
//! Reads `energy_uj` and `max_energy_range_uj` from a powercap zone such as
//! `/sys/class/powercap/intel-rapl:0`.

use super::EnergyCounter;
use crate::error::EnergyError;
use std::path::{Path, PathBuf};

/// Package-level RAPL zone on most Intel and recent AMD machines
pub const DEFAULT_RAPL_ZONE: &str = "/sys/class/powercap/intel-rapl:0";

/// Energy counter backed by a powercap zone directory
#[derive(Debug, Clone)]
pub struct PowercapCounter {
    zone: PathBuf,
    /// Overrides `max_energy_range_uj` when set
    max_range_override: Option<u64>,
}

impl PowercapCounter {
    pub fn new(zone: impl Into<PathBuf>) -> Self {
        Self {
            zone: zone.into(),
            max_range_override: None,
        }
    }

    /// Use a configured counter range instead of the zone's own
    pub fn with_max_range(mut self, max_range_uj: u64) -> Self {
        self.max_range_override = Some(max_range_uj);
        self
    }

    /// Counter for `zone` if its energy file can be read right now
    pub fn detect(zone: impl Into<PathBuf>) -> Result<Self, EnergyError> {
        let counter = Self::new(zone);
        counter.read_microjoules()?;
        Ok(counter)
    }

    pub fn zone(&self) -> &Path {
        &self.zone
    }

    fn read_value(&self, filename: &str) -> Result<u64, EnergyError> {
        let path = self.zone.join(filename);
        let content = std::fs::read_to_string(&path).map_err(|source| EnergyError::Read {
            path: path.clone(),
            source,
        })?;
        content.trim().parse().map_err(|_| EnergyError::Parse {
            path,
            value: content.trim().to_string(),
        })
    }
}

impl EnergyCounter for PowercapCounter {
    fn read_microjoules(&self) -> Result<u64, EnergyError> {
        self.read_value("energy_uj")
    }

    fn max_range_microjoules(&self) -> Result<u64, EnergyError> {
        let range = match self.max_range_override {
            Some(range) => range,
            None => self.read_value("max_energy_range_uj")?,
        };
        if range == 0 {
            return Err(EnergyError::ZeroRange);
        }
        Ok(range)
    }

    fn source(&self) -> &str {
        "rapl"
    }
}
