//! Threshold consensus over equal values.

use serde::Serialize;
use tracing::warn;

use super::{
    MergeInputs, MergeOutcome, MergeStrategy, Provenance, RejectedValue, Tally, losers, to_value,
};
use crate::error::{MullionError, Result};

/// What to return when fewer than `k` branches agree.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConsensusFailure<T> {
    /// Fail the merge with [`MullionError::ConsensusNotMet`].
    #[default]
    Error,
    /// Return the plurality value with confidence 0.
    LowConfidence,
    /// Return this value with confidence 0; every branch is rejected.
    Default(T),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsensusOptions<T> {
    pub on_failure: ConsensusFailure<T>,
}

/// See [`require_consensus`].
#[derive(Debug, Clone)]
pub struct RequireConsensus<T> {
    required: usize,
    options: ConsensusOptions<T>,
}

/// Require at least `k` branches to return the same value.
///
/// The consensus level is always the size of the largest agreeing group
/// over the total branch count, failed branches included, whether or not
/// the threshold is met. Branches outside the winning group are reported
/// both as conflicts and as rejected values.
pub fn require_consensus<T>(k: usize) -> RequireConsensus<T> {
    RequireConsensus {
        required: k,
        options: ConsensusOptions {
            on_failure: ConsensusFailure::Error,
        },
    }
}

impl<T> RequireConsensus<T> {
    pub fn with_options(mut self, options: ConsensusOptions<T>) -> Self {
        self.options = options;
        self
    }

    pub fn on_failure(mut self, on_failure: ConsensusFailure<T>) -> Self {
        self.options.on_failure = on_failure;
        self
    }

    pub fn required(&self) -> usize {
        self.required
    }
}

impl<T: PartialEq + Clone + Serialize> MergeStrategy<T> for RequireConsensus<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        "require_consensus"
    }

    fn merge(&self, inputs: &MergeInputs<'_, T>) -> Result<MergeOutcome<T>> {
        let values: Vec<(&T, f64)> = inputs.items.iter().map(|i| (i.value, i.confidence)).collect();
        let tally = Tally::new(&values);
        let winner = tally
            .by_count()
            .ok_or_else(|| MullionError::merge_input("no values to compare"))?;
        let agreeing = winner.members.len();
        let total = inputs.total_branches.max(inputs.items.len());
        let consensus_level = agreeing as f64 / total as f64;

        let winner_value = inputs.items[winner.first].value;
        let (conflicts, rejected_values) = losers(inputs, winner, &to_value(winner_value)?)?;
        let contributing_branches: Vec<String> = winner
            .members
            .iter()
            .map(|&m| inputs.items[m].branch.to_string())
            .collect();

        if agreeing >= self.required {
            return Ok(MergeOutcome {
                value: winner_value.clone(),
                confidence: tally.share(winner),
                conflicts,
                provenance: Provenance {
                    contributing_branches,
                    consensus_level,
                    rejected_values,
                },
                dispersion: None,
            });
        }

        warn!(
            required = self.required,
            achieved = agreeing,
            total,
            "consensus not met"
        );
        match &self.options.on_failure {
            ConsensusFailure::Error => Err(MullionError::ConsensusNotMet {
                required: self.required,
                achieved: agreeing,
                total,
            }),
            ConsensusFailure::LowConfidence => Ok(MergeOutcome {
                value: winner_value.clone(),
                confidence: 0.0,
                conflicts,
                provenance: Provenance {
                    contributing_branches,
                    consensus_level,
                    rejected_values,
                },
                dispersion: None,
            }),
            ConsensusFailure::Default(fallback) => {
                let mut rejected = Vec::with_capacity(inputs.items.len());
                for item in &inputs.items {
                    rejected.push(RejectedValue {
                        branch: item.branch.to_string(),
                        value: to_value(item.value)?,
                        confidence: item.confidence,
                    });
                }
                Ok(MergeOutcome {
                    value: fallback.clone(),
                    confidence: 0.0,
                    conflicts,
                    provenance: Provenance {
                        contributing_branches: Vec::new(),
                        consensus_level,
                        rejected_values: rejected,
                    },
                    dispersion: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_values;
    use crate::owned::Owned;
    use pretty_assertions::assert_eq;

    fn answers(values: &[&str]) -> Vec<Owned<String>> {
        values
            .iter()
            .map(|v| Owned::with_confidence(v.to_string(), "q", 0.8).unwrap())
            .collect()
    }

    #[test]
    fn test_threshold_met() {
        let merged = merge_values(&answers(&["A", "A", "B"]), &require_consensus(2)).unwrap();
        assert_eq!(merged.value.value_ref(), "A");
        assert!((merged.provenance.consensus_level - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(merged.provenance.rejected_values.len(), 1);
        assert_eq!(merged.conflicts.len(), 1);
    }

    #[test]
    fn test_error_policy() {
        let err = merge_values(&answers(&["A", "B", "C"]), &require_consensus(2)).unwrap_err();
        assert!(matches!(
            err,
            MullionError::ConsensusNotMet {
                required: 2,
                achieved: 1,
                total: 3
            }
        ));
    }

    #[test]
    fn test_low_confidence_policy() {
        let strategy = require_consensus(2).on_failure(ConsensusFailure::LowConfidence);
        let merged = merge_values(&answers(&["A", "B", "C", "D"]), &strategy).unwrap();
        assert_eq!(merged.value.confidence(), 0.0);
        assert_eq!(merged.value.value_ref(), "A");
        assert_eq!(merged.provenance.rejected_values.len(), 3);
        assert_eq!(merged.provenance.consensus_level, 0.25);
    }

    #[test]
    fn test_default_policy() {
        let strategy = require_consensus(3)
            .on_failure(ConsensusFailure::Default("unknown".to_string()));
        let merged = merge_values(&answers(&["A", "A", "B"]), &strategy).unwrap();
        assert_eq!(merged.value.value_ref(), "unknown");
        assert_eq!(merged.value.confidence(), 0.0);
        assert_eq!(merged.provenance.rejected_values.len(), 3);
    }

    #[test]
    fn test_fully_divergent_with_low_threshold() {
        let merged = merge_values(&answers(&["A", "B", "C", "D"]), &require_consensus(1)).unwrap();
        assert_eq!(merged.value.value_ref(), "A");
        assert_eq!(merged.provenance.rejected_values.len(), 3);
        assert_eq!(merged.provenance.consensus_level, 0.25);
    }
}
