//! Inverse-distance weighting of candidate stations.

use serde::{Deserialize, Serialize};

/// Distances below this (meters) count as co-located.
const COLOCATED_EPSILON_M: f64 = 1e-6;

/// What to do when no candidate lies within the distance cutoff.
///
/// The same policy drives both the nearest-station search and the weighting,
/// so a point never gets stations from one stage that the other rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFallback {
    /// Leave the point without stations. It shows up as a coverage gap.
    #[default]
    CoverageGap,
    /// Keep every candidate that was found, regardless of distance.
    UseAllCandidates,
}

/// Result of weighting one reference point's candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct Weighted<T> {
    /// `(candidate, weight)` pairs in input order. Weights sum to 1 when non-empty.
    pub weights: Vec<(T, f64)>,
    /// Every candidate was beyond the distance cutoff.
    pub beyond_cutoff: bool,
}

/// Converts distances into normalized influence weights.
///
/// Pure: the output depends only on the arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightCalculator {
    pub power: f64,
    pub min_weight: f64,
    pub max_distance_m: f64,
    pub fallback: DistanceFallback,
}

impl Default for WeightCalculator {
    fn default() -> Self {
        Self {
            power: 2.0,
            min_weight: 0.1,
            max_distance_m: 100_000.0,
            fallback: DistanceFallback::CoverageGap,
        }
    }
}

impl WeightCalculator {
    /// Weights `candidates`, given as `(id, distance_m)` pairs.
    ///
    /// # Examples
    ///
    /// ```
    /// use coastal_htf::WeightCalculator;
    ///
    /// let weighted = WeightCalculator::default().calculate(&[("a", 1000.0), ("b", 2000.0)]);
    /// assert!((weighted.weights[0].1 - 0.8).abs() < 1e-12);
    /// assert!((weighted.weights[1].1 - 0.2).abs() < 1e-12);
    /// ```
    pub fn calculate<T: Clone>(&self, candidates: &[(T, f64)]) -> Weighted<T> {
        if candidates.is_empty() {
            return Weighted {
                weights: vec![],
                beyond_cutoff: false,
            };
        }

        let within: Vec<&(T, f64)> = candidates
            .iter()
            .filter(|(_, d)| *d <= self.max_distance_m)
            .collect();
        let beyond_cutoff = within.is_empty();
        let kept: Vec<&(T, f64)> = match (beyond_cutoff, self.fallback) {
            (false, _) => within,
            (true, DistanceFallback::UseAllCandidates) => candidates.iter().collect(),
            (true, DistanceFallback::CoverageGap) => {
                return Weighted {
                    weights: vec![],
                    beyond_cutoff,
                };
            }
        };

        let raw: Vec<f64> = if kept.iter().any(|(_, d)| *d < COLOCATED_EPSILON_M) {
            // Co-located stations take all the weight.
            kept.iter()
                .map(|(_, d)| if *d < COLOCATED_EPSILON_M { 1.0 } else { 0.0 })
                .collect()
        } else {
            // Relative to the nearest candidate so large powers cannot overflow.
            let nearest_ln = kept
                .iter()
                .map(|(_, d)| d.ln())
                .fold(f64::INFINITY, f64::min);
            kept.iter()
                .map(|(_, d)| (-self.power * (d.ln() - nearest_ln)).exp())
                .collect()
        };
        let normalized = normalize(&raw);

        let mut filtered: Vec<f64> = normalized
            .iter()
            .map(|w| if *w >= self.min_weight { *w } else { 0.0 })
            .collect();
        if filtered.iter().all(|w| *w == 0.0) {
            // Threshold removed everything; keep the strongest candidates.
            let best = normalized.iter().cloned().fold(0.0, f64::max);
            filtered = normalized
                .iter()
                .map(|w| if *w == best { *w } else { 0.0 })
                .collect();
        }
        let renormalized = normalize(&filtered);

        let weights = kept
            .into_iter()
            .zip(renormalized)
            .filter(|(_, w)| *w > 0.0)
            .map(|((id, _), w)| (id.clone(), w))
            .collect();

        Weighted {
            weights,
            beyond_cutoff,
        }
    }
}

fn normalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(weighted: &Weighted<&str>) -> f64 {
        weighted.weights.iter().map(|(_, w)| w).sum()
    }

    #[test]
    fn test_inverse_square_weights() {
        let weighted = WeightCalculator::default().calculate(&[("a", 1000.0), ("b", 2000.0)]);
        assert_eq!(weighted.weights.len(), 2);
        assert!((weighted.weights[0].1 - 0.8).abs() < 1e-12);
        assert!((weighted.weights[1].1 - 0.2).abs() < 1e-12);
        assert!(!weighted.beyond_cutoff);
    }

    #[test]
    fn test_min_weight_drop_and_renormalize() {
        // Normalized weights are ~0.775, ~0.194, ~0.031; the last is dropped.
        let weighted =
            WeightCalculator::default().calculate(&[("a", 1000.0), ("b", 2000.0), ("c", 5000.0)]);
        assert_eq!(weighted.weights.len(), 2);
        assert!((weighted.weights[0].1 - 0.8).abs() < 1e-12);
        assert!((weighted.weights[1].1 - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_weights_decrease_with_distance() {
        let calc = WeightCalculator {
            min_weight: 0.0,
            ..Default::default()
        };
        let weighted = calc.calculate(&[("a", 500.0), ("b", 800.0), ("c", 3000.0), ("d", 9000.0)]);
        assert!((sum(&weighted) - 1.0).abs() < 1e-12);
        for pair in weighted.weights.windows(2) {
            assert!(pair[0].1 > pair[1].1);
        }
    }

    #[test]
    fn test_zero_distance() {
        let weighted = WeightCalculator::default().calculate(&[("a", 0.0), ("b", 1500.0)]);
        assert_eq!(weighted.weights, vec![("a", 1.0)]);

        let shared = WeightCalculator::default().calculate(&[("a", 0.0), ("b", 0.0)]);
        assert_eq!(shared.weights, vec![("a", 0.5), ("b", 0.5)]);
    }

    #[test]
    fn test_cutoff_coverage_gap() {
        let weighted = WeightCalculator::default().calculate(&[("far", 150_000.0)]);
        assert!(weighted.weights.is_empty());
        assert!(weighted.beyond_cutoff);
    }

    #[test]
    fn test_cutoff_use_all_candidates() {
        let calc = WeightCalculator {
            fallback: DistanceFallback::UseAllCandidates,
            ..Default::default()
        };
        let weighted = calc.calculate(&[("far", 150_000.0), ("farther", 300_000.0)]);
        assert!(weighted.beyond_cutoff);
        assert!((weighted.weights[0].1 - 0.8).abs() < 1e-12);
        assert!((sum(&weighted) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cutoff_keeps_only_candidates_within() {
        let weighted = WeightCalculator::default().calculate(&[("near", 40_000.0), ("far", 120_000.0)]);
        assert_eq!(weighted.weights, vec![("near", 1.0)]);
    }

    #[test]
    fn test_threshold_never_empties_result() {
        let calc = WeightCalculator {
            min_weight: 0.5,
            ..Default::default()
        };
        let weighted = calc.calculate(&[("a", 1000.0), ("b", 1000.0), ("c", 1000.0)]);
        assert_eq!(weighted.weights.len(), 3);
        assert!((sum(&weighted) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_large_power_favors_nearest() {
        let calc = WeightCalculator {
            power: 400.0,
            ..Default::default()
        };
        let weighted = calc.calculate(&[("a", 1000.0), ("b", 2000.0)]);
        assert!(!weighted.weights.is_empty());
        assert_eq!(weighted.weights[0].0, "a");
        assert!((weighted.weights[0].1 - 1.0).abs() < 1e-12);
        assert!((sum(&weighted) - 1.0).abs() < 1e-12);

        let tied = calc.calculate(&[("a", 5000.0), ("b", 5000.0)]);
        assert_eq!(tied.weights, vec![("a", 0.5), ("b", 0.5)]);
    }

    #[test]
    fn test_deterministic() {
        let calc = WeightCalculator::default();
        let input = [("a", 1234.5), ("b", 6789.0), ("c", 2345.6)];
        assert_eq!(calc.calculate(&input), calc.calculate(&input));
    }
}
