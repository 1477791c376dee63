//! Pairwise significance of throughput differences
//!
//! Two-sided Mann-Whitney U over per-round RPS. Small samples without ties
//! use the exact null distribution; everything else uses the normal
//! approximation with tie and continuity correction.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Fewer rounds than this per framework are reported as insufficient
pub const MIN_SAMPLES: usize = 3;

/// Largest smaller sample for which the exact distribution is used
const EXACT_MAX_SAMPLES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueMethod {
    Exact,
    Asymptotic,
}

/// Conventional significance bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    /// p < 0.001
    VeryHigh,
    /// p < 0.01
    High,
    /// p < 0.05
    Significant,
    NotSignificant,
}

impl Significance {
    pub fn from_p_value(p: f64) -> Self {
        if p < 0.001 {
            Significance::VeryHigh
        } else if p < 0.01 {
            Significance::High
        } else if p < 0.05 {
            Significance::Significant
        } else {
            Significance::NotSignificant
        }
    }

    /// Star marker: `***`, `**`, `*` or `ns`
    pub fn marker(&self) -> &'static str {
        match self {
            Significance::VeryHigh => "***",
            Significance::High => "**",
            Significance::Significant => "*",
            Significance::NotSignificant => "ns",
        }
    }
}

/// Result of one two-sample test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MannWhitney {
    /// U statistic of the first sample
    pub u: f64,
    pub p_value: f64,
    pub method: PValueMethod,
}

/// Outcome of comparing two frameworks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Comparison {
    Tested {
        u: f64,
        p_value: f64,
        method: PValueMethod,
        significance: Significance,
    },
    InsufficientSamples {
        runs_a: usize,
        runs_b: usize,
    },
}

/// Throughput comparison of two frameworks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub framework_a: String,
    pub framework_b: String,
    pub comparison: Comparison,
}

impl PairwiseComparison {
    pub fn is_significant(&self) -> bool {
        matches!(
            self.comparison,
            Comparison::Tested { significance, .. } if significance != Significance::NotSignificant
        )
    }
}

/// Compare every pair of frameworks, in the given order
pub fn pairwise_comparisons(samples: &[(&str, Vec<f64>)]) -> Vec<PairwiseComparison> {
    let mut comparisons = Vec::new();
    for (i, (name_a, a)) in samples.iter().enumerate() {
        for (name_b, b) in &samples[i + 1..] {
            let comparison = if a.len() < MIN_SAMPLES || b.len() < MIN_SAMPLES {
                Comparison::InsufficientSamples {
                    runs_a: a.len(),
                    runs_b: b.len(),
                }
            } else {
                match mann_whitney_u(a, b) {
                    Some(test) => Comparison::Tested {
                        u: test.u,
                        p_value: test.p_value,
                        method: test.method,
                        significance: Significance::from_p_value(test.p_value),
                    },
                    None => Comparison::InsufficientSamples {
                        runs_a: a.len(),
                        runs_b: b.len(),
                    },
                }
            };
            comparisons.push(PairwiseComparison {
                framework_a: name_a.to_string(),
                framework_b: name_b.to_string(),
                comparison,
            });
        }
    }
    comparisons
}

/// Two-sided Mann-Whitney U test; `None` when a sample is empty
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Option<MannWhitney> {
    let (n1, n2) = (a.len(), b.len());
    if n1 == 0 || n2 == 0 {
        return None;
    }

    let mut pooled: Vec<(f64, bool)> = a
        .iter()
        .map(|&v| (v, true))
        .chain(b.iter().map(|&v| (v, false)))
        .collect();
    pooled.sort_by(|x, y| x.0.total_cmp(&y.0));

    // average ranks over ties; tie group sizes feed the variance correction
    let mut rank_sum_a = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < pooled.len() {
        let mut j = i + 1;
        while j < pooled.len() && pooled[j].0 == pooled[i].0 {
            j += 1;
        }
        let rank = (i + 1 + j) as f64 / 2.0;
        rank_sum_a += rank * pooled[i..j].iter().filter(|(_, in_a)| *in_a).count() as f64;
        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }

    let u1 = rank_sum_a - (n1 * (n1 + 1)) as f64 / 2.0;
    let u2 = (n1 * n2) as f64 - u1;
    let has_ties = tie_term > 0.0;

    let (p_value, method) = if !has_ties && n1.min(n2) <= EXACT_MAX_SAMPLES {
        let cdf = exact_cdf(u1.min(u2).round() as usize, n1, n2);
        ((2.0 * cdf).min(1.0), PValueMethod::Exact)
    } else {
        (asymptotic_p(u1.max(u2), n1, n2, tie_term), PValueMethod::Asymptotic)
    };

    Some(MannWhitney {
        u: u1,
        p_value,
        method,
    })
}

/// P(U <= u) under the null for samples of size `m` and `n`
///
/// The counts of U are the coefficients of the Gaussian binomial
/// `[m + n choose m]_q`, built as a product of `(1 - q^(n+i)) / (1 - q^i)`.
fn exact_cdf(u: usize, m: usize, n: usize) -> f64 {
    let (m, n) = (m.min(n), m.max(n));
    let degree = m * n;
    let mut counts = vec![0.0f64; degree + 1];
    counts[0] = 1.0;

    for i in 1..=m {
        let k = n + i;
        for d in (k..=degree).rev() {
            counts[d] -= counts[d - k];
        }
        for d in i..=degree {
            counts[d] += counts[d - i];
        }
    }

    let total: f64 = counts.iter().sum();
    let below: f64 = counts[..=u.min(degree)].iter().sum();
    below / total
}

fn asymptotic_p(u_max: f64, n1: usize, n2: usize, tie_term: f64) -> f64 {
    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let n = n1f + n2f;
    let mean = n1f * n2f / 2.0;
    let variance = n1f * n2f / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if !(variance > 0.0) {
        // every observation tied
        return 1.0;
    }

    let z = (u_max - mean - 0.5) / variance.sqrt();
    match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * (1.0 - normal.cdf(z))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}
