//! Continuous merging: confidence-weighted mean with dispersion.

use serde::Serialize;
use serde_json::Value;

use super::{Conflict, MergeInputs, MergeOutcome, MergeStrategy, Provenance};
use crate::error::{MullionError, Result};

const DEFAULT_TOLERANCE: f64 = 0.1;

/// Spread of the branch values around the weighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispersion {
    /// Confidence-weighted variance.
    pub variance: f64,
    pub std_dev: f64,
    /// `max - min`.
    pub spread: f64,
    pub min: f64,
    pub max: f64,
}

/// See [`weighted_average`].
#[derive(Debug, Clone, Copy)]
pub struct WeightedAverage {
    tolerance: f64,
}

/// Confidence-weighted mean of numeric branch values.
///
/// Confidence is `1 / (1 + cv)` where `cv` is the coefficient of variation,
/// so identical values give 1.0 and wide disagreement drives it toward 0.
/// Branches further than `tolerance` (relative to the mean) from the mean
/// are reported as conflicts.
pub fn weighted_average() -> WeightedAverage {
    WeightedAverage {
        tolerance: DEFAULT_TOLERANCE,
    }
}

impl WeightedAverage {
    /// Relative distance from the mean at which a branch counts as a
    /// conflict. Absolute when the mean is 0.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }
}

impl<T: Copy + Into<f64>> MergeStrategy<T> for WeightedAverage {
    type Output = f64;

    fn name(&self) -> &'static str {
        "continuous.weighted_average"
    }

    fn merge(&self, inputs: &MergeInputs<'_, T>) -> Result<MergeOutcome<f64>> {
        let points: Vec<(f64, f64)> = inputs
            .items
            .iter()
            .map(|i| ((*i.value).into(), i.confidence))
            .collect();
        if let Some((value, _)) = points.iter().find(|(v, _)| !v.is_finite()) {
            return Err(MullionError::merge_input(format!(
                "cannot average non-finite value {value}"
            )));
        }

        let confidence_total: f64 = points.iter().map(|(_, w)| w).sum();
        let weight = |w: f64| if confidence_total > 0.0 { w } else { 1.0 };
        let total_weight: f64 = points.iter().map(|&(_, w)| weight(w)).sum();
        if total_weight <= 0.0 {
            return Err(MullionError::merge_input("no values to average"));
        }

        let min = points.iter().map(|&(v, _)| v).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|&(v, _)| v).fold(f64::NEG_INFINITY, f64::max);
        let unanimous = min == max;

        let mean = if unanimous {
            min
        } else {
            points.iter().map(|&(v, w)| v * weight(w)).sum::<f64>() / total_weight
        };
        let variance = points
            .iter()
            .map(|&(v, w)| weight(w) * (v - mean).powi(2))
            .sum::<f64>()
            / total_weight;
        let std_dev = variance.sqrt();

        let confidence = if unanimous {
            1.0
        } else if mean == 0.0 {
            1.0 / (1.0 + std_dev)
        } else {
            1.0 / (1.0 + std_dev / mean.abs())
        };

        let limit = if mean == 0.0 {
            self.tolerance
        } else {
            self.tolerance * mean.abs()
        };
        let mut conflicts = Vec::new();
        for (item, &(v, _)) in inputs.items.iter().zip(&points) {
            if (v - mean).abs() > limit {
                conflicts.push(Conflict {
                    branch: item.branch.to_string(),
                    field: None,
                    value: number(v),
                    winner: number(mean),
                    confidence: item.confidence,
                });
            }
        }
        let within = points.len() - conflicts.len();

        Ok(MergeOutcome {
            value: mean,
            confidence,
            conflicts,
            provenance: Provenance {
                contributing_branches: inputs.branches(),
                consensus_level: within as f64 / points.len() as f64,
                rejected_values: Vec::new(),
            },
            dispersion: Some(Dispersion {
                variance,
                std_dev,
                spread: max - min,
                min,
                max,
            }),
        })
    }
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_values;
    use crate::owned::Owned;

    fn estimates(points: &[(f64, f64)]) -> Vec<Owned<f64>> {
        points
            .iter()
            .map(|&(v, c)| Owned::with_confidence(v, "estimator", c).unwrap())
            .collect()
    }

    #[test]
    fn test_weighted_mean() {
        let merged =
            merge_values(&estimates(&[(10.0, 1.0), (20.0, 0.5), (30.0, 0.5)]), &weighted_average())
                .unwrap();
        let dispersion = merged.dispersion.unwrap();
        assert_eq!(*merged.value.value_ref(), 17.5);
        assert!(merged.value.confidence() < 1.0);
        assert_eq!(dispersion.min, 10.0);
        assert_eq!(dispersion.max, 30.0);
        assert_eq!(dispersion.spread, 20.0);
        assert!(dispersion.std_dev > 0.0);
    }

    #[test]
    fn test_identical_values_are_certain() {
        let merged =
            merge_values(&estimates(&[(3.0, 0.2), (3.0, 0.9), (3.0, 0.4)]), &weighted_average())
                .unwrap();
        assert_eq!(merged.value.confidence(), 1.0);
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.dispersion.unwrap().variance, 0.0);
    }

    #[test]
    fn test_tolerance_controls_conflicts() {
        let values = estimates(&[(100.0, 1.0), (104.0, 1.0), (150.0, 1.0)]);
        let loose = merge_values(&values, &weighted_average().with_tolerance(0.5)).unwrap();
        let strict = merge_values(&values, &weighted_average().with_tolerance(0.05)).unwrap();
        assert!(loose.conflicts.is_empty());
        assert_eq!(loose.provenance.consensus_level, 1.0);
        assert!(strict.conflicts.iter().any(|c| c.branch == "2"));
        assert!(strict.provenance.consensus_level < 1.0);
    }

    #[test]
    fn test_integer_inputs() {
        let values = vec![Owned::new(2u32, "a"), Owned::new(4u32, "a")];
        let merged = merge_values(&values, &weighted_average()).unwrap();
        assert_eq!(merged.dispersion.unwrap().min, 2.0);
    }
}
