//! Weighted endpoint selection
//!
//! Maps a uniform draw in [0, 100) onto a template using cumulative
//! integer thresholds built once at construction.

use super::EndpointTemplate;
use crate::error::ConfigError;
use rand::Rng;
use std::collections::HashSet;

/// Total weight every table must add up to
pub const TOTAL_WEIGHT: u32 = 100;

/// Stateless weighted selector over a validated template table
#[derive(Debug, Clone)]
pub struct WeightedEndpointSelector {
    templates: Vec<EndpointTemplate>,
    /// thresholds[i] = sum of weights 0..=i
    thresholds: Vec<u32>,
}

impl WeightedEndpointSelector {
    /// Validate weights and build the cumulative threshold table
    pub fn new(templates: Vec<EndpointTemplate>) -> Result<Self, ConfigError> {
        if templates.is_empty() {
            return Err(ConfigError::NoTemplates);
        }

        let mut seen = HashSet::new();
        let mut thresholds = Vec::with_capacity(templates.len());
        let mut cumulative = 0u32;

        for template in &templates {
            if !(1..=TOTAL_WEIGHT).contains(&template.weight) {
                return Err(ConfigError::WeightOutOfRange {
                    label: template.label.clone(),
                    weight: template.weight,
                });
            }
            if !seen.insert(template.label.as_str()) {
                return Err(ConfigError::DuplicateLabel(template.label.clone()));
            }
            cumulative += template.weight;
            thresholds.push(cumulative);
        }

        if cumulative != TOTAL_WEIGHT {
            return Err(ConfigError::WeightSum { sum: cumulative });
        }

        Ok(Self {
            templates,
            thresholds,
        })
    }

    /// Index of the template selected by `draw`
    ///
    /// Any draw at or beyond the last lower threshold falls to the last
    /// template, so a valid draw always selects something.
    pub fn select_index(&self, draw: f64) -> usize {
        let last = self.templates.len() - 1;
        self.thresholds
            .iter()
            .position(|&t| draw < t as f64)
            .unwrap_or(last)
    }

    pub fn select(&self, draw: f64) -> &EndpointTemplate {
        &self.templates[self.select_index(draw)]
    }

    pub fn select_label(&self, draw: f64) -> &str {
        &self.select(draw).label
    }

    /// Select with a fresh uniform draw from `rng`
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &EndpointTemplate {
        self.select(rng.gen_range(0.0..TOTAL_WEIGHT as f64))
    }

    pub fn templates(&self) -> &[EndpointTemplate] {
        &self.templates
    }

    pub fn labels(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.label.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table(weights: &[(&'static str, u32)]) -> Vec<EndpointTemplate> {
        weights
            .iter()
            .map(|(label, w)| EndpointTemplate::get(*label, *w, "/"))
            .collect()
    }

    fn reference() -> WeightedEndpointSelector {
        WeightedEndpointSelector::new(table(&[
            ("db", 40),
            ("queries", 25),
            ("json", 20),
            ("users", 15),
        ]))
        .unwrap()
    }

    #[test]
    fn test_threshold_boundaries() {
        let selector = reference();
        assert_eq!(selector.select_label(0.0), "db");
        assert_eq!(selector.select_label(39.999), "db");
        assert_eq!(selector.select_label(40.0), "queries");
        assert_eq!(selector.select_label(64.9), "queries");
        assert_eq!(selector.select_label(65.0), "json");
        assert_eq!(selector.select_label(85.0), "users");
        assert_eq!(selector.select_label(99.999), "users");
    }

    #[test]
    fn test_out_of_range_draw_falls_to_last() {
        let selector = reference();
        assert_eq!(selector.select_label(100.0), "users");
        assert_eq!(selector.select_label(f64::NAN), "users");
    }

    #[test]
    fn test_rejects_bad_sum() {
        let err = WeightedEndpointSelector::new(table(&[("a", 50), ("b", 49)])).unwrap_err();
        assert_eq!(err, ConfigError::WeightSum { sum: 99 });
    }

    #[test]
    fn test_rejects_zero_weight_and_empty() {
        let err = WeightedEndpointSelector::new(table(&[("a", 100), ("b", 0)])).unwrap_err();
        assert!(matches!(err, ConfigError::WeightOutOfRange { weight: 0, .. }));

        assert_eq!(
            WeightedEndpointSelector::new(vec![]).unwrap_err(),
            ConfigError::NoTemplates
        );
    }

    #[test]
    fn test_rejects_duplicate_labels() {
        let err = WeightedEndpointSelector::new(table(&[("a", 50), ("a", 50)])).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateLabel("a".to_string()));
    }

    #[test]
    fn test_stratified_draws_match_weights_exactly() {
        let selector = reference();
        let mut counts = [0u32; 4];
        for i in 0..100_000u32 {
            let draw = i as f64 / 1000.0;
            counts[selector.select_index(draw)] += 1;
        }
        assert_eq!(counts, [40_000, 25_000, 20_000, 15_000]);
    }

    #[test]
    fn test_random_draws_converge_to_weights() {
        let selector = reference();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts = [0u64; 4];
        let n = 100_000u64;

        for _ in 0..n {
            let draw = rng.gen_range(0.0..100.0);
            counts[selector.select_index(draw)] += 1;
        }

        let expected = [40_000.0, 25_000.0, 20_000.0, 15_000.0];
        for (count, exp) in counts.iter().zip(expected) {
            // within one percentage point of the configured share
            assert!((*count as f64 - exp).abs() <= n as f64 * 0.01, "{count} vs {exp}");
        }

        // chi-square, 3 degrees of freedom, p = 0.001
        let chi2: f64 = counts
            .iter()
            .zip(expected)
            .map(|(c, e)| (*c as f64 - e).powi(2) / e)
            .sum();
        assert!(chi2 < 16.27, "chi2 = {chi2}");
    }
}
