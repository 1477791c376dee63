//! CLI subcommand implementations

pub mod analyze;
pub mod baseline;
pub mod load;
pub mod probe;

use anyhow::{bail, Context, Result};
use bench_lib::energy::{EnergyAccountant, PowercapCounter};
use bench_lib::workload::{apply_weights, named_mix, WeightedEndpointSelector};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Parse `label=weight` pairs separated by commas
pub fn parse_weights(input: &str) -> Result<BTreeMap<String, u32>> {
    let mut weights = BTreeMap::new();
    for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((label, weight)) = pair.split_once('=') else {
            bail!("expected label=weight, got '{pair}'");
        };
        let weight: u32 = weight
            .trim()
            .parse()
            .with_context(|| format!("invalid weight for '{}'", label.trim()))?;
        weights.insert(label.trim().to_string(), weight);
    }
    Ok(weights)
}

/// Endpoint selector for a named mix with optional weight overrides
pub fn build_selector(mix: &str, weights: Option<&str>) -> Result<WeightedEndpointSelector> {
    let overrides = weights.map(parse_weights).transpose()?.unwrap_or_default();
    let templates = apply_weights(named_mix(mix)?, &overrides)?;
    Ok(WeightedEndpointSelector::new(templates)?)
}

/// RAPL accountant for `zone`, or the unavailable marker when unreadable
pub fn energy_accountant(zone: &Path, max_range_uj: Option<u64>) -> EnergyAccountant {
    match PowercapCounter::detect(zone) {
        Ok(counter) => {
            let counter = match max_range_uj {
                Some(max) => counter.with_max_range(max),
                None => counter,
            };
            EnergyAccountant::new(Arc::new(counter))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Energy counter unavailable");
            EnergyAccountant::unavailable()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weights() {
        let weights = parse_weights("db=50, json = 30,users=20").unwrap();
        assert_eq!(weights.get("db"), Some(&50));
        assert_eq!(weights.get("json"), Some(&30));
        assert_eq!(weights.len(), 3);

        assert!(parse_weights("db").is_err());
        assert!(parse_weights("db=x").is_err());
        assert!(parse_weights("").unwrap().is_empty());
    }

    #[test]
    fn test_build_selector_validates_sum() {
        assert!(build_selector("read", None).is_ok());
        assert!(build_selector("read", Some("db=10")).is_err());
        assert!(build_selector("read", Some("nope=10")).is_err());
        assert!(build_selector("bulk", None).is_err());
    }
}
