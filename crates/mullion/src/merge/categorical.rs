//! Categorical merging: confidence-weighted vote over equal values.

use serde::Serialize;

use super::{MergeInputs, MergeOutcome, MergeStrategy, Provenance, Tally, losers, to_value};
use crate::error::{MullionError, Result};

/// See [`weighted_vote`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedVote;

/// Group equal values, weight each group by the summed confidence of its
/// members and pick the heaviest. Ties go to the group seen first.
///
/// The merged confidence is the winner's share of the total weight, so a
/// unanimous vote yields exactly 1.0. Every branch outside the winning group
/// is reported as a conflict.
pub fn weighted_vote() -> WeightedVote {
    WeightedVote
}

impl<T: PartialEq + Clone + Serialize> MergeStrategy<T> for WeightedVote {
    type Output = T;

    fn name(&self) -> &'static str {
        "categorical.weighted_vote"
    }

    fn merge(&self, inputs: &MergeInputs<'_, T>) -> Result<MergeOutcome<T>> {
        let values: Vec<(&T, f64)> = inputs.items.iter().map(|i| (i.value, i.confidence)).collect();
        let tally = Tally::new(&values);
        let winner = tally
            .by_weight()
            .ok_or_else(|| MullionError::merge_input("nothing to vote on"))?;
        let winner_value = inputs.items[winner.first].value;
        let share = tally.share(winner);
        let (conflicts, _) = losers(inputs, winner, &to_value(winner_value)?)?;

        Ok(MergeOutcome {
            value: winner_value.clone(),
            confidence: share,
            conflicts,
            provenance: Provenance {
                contributing_branches: winner
                    .members
                    .iter()
                    .map(|&m| inputs.items[m].branch.to_string())
                    .collect(),
                consensus_level: share,
                rejected_values: Vec::new(),
            },
            dispersion: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{MergeItem, merge_values};
    use crate::owned::Owned;
    use pretty_assertions::assert_eq;

    fn owned(value: &str, confidence: f64) -> Owned<String> {
        Owned::with_confidence(value.to_string(), "branch", confidence).unwrap()
    }

    #[test]
    fn test_unanimous_vote_is_certain() {
        let values = vec![owned("yes", 0.3), owned("yes", 0.7), owned("yes", 0.55)];
        let merged = merge_values(&values, &weighted_vote()).unwrap();
        assert_eq!(merged.value.confidence(), 1.0);
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.provenance.consensus_level, 1.0);
    }

    #[test]
    fn test_weighted_majority() {
        let values = vec![owned("cat", 0.9), owned("dog", 0.4), owned("dog", 0.4)];
        let merged = merge_values(&values, &weighted_vote()).unwrap();
        assert!((merged.value.confidence() - 0.9 / 1.7).abs() < 1e-12);
        assert_eq!(merged.conflicts.len(), 2);
        assert_eq!(merged.conflicts[0].branch, "1");
        assert_eq!(merged.conflicts[0].winner, serde_json::json!("cat"));
        assert_eq!(merged.provenance.contributing_branches, vec!["0".to_string()]);
    }

    #[test]
    fn test_tie_break_is_declaration_order() {
        let values = vec![owned("b", 0.5), owned("a", 0.5)];
        let merged = merge_values(&values, &weighted_vote()).unwrap();
        assert_eq!(merged.conflicts[0].winner, serde_json::json!("b"));
    }

    #[test]
    fn test_single_branch() {
        let inputs = MergeInputs::new(
            vec![MergeItem {
                branch: "only",
                value: &42,
                confidence: 0.2,
            }],
            1,
        );
        let outcome = weighted_vote().merge(&inputs).unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.provenance.consensus_level, 1.0);
        assert!(outcome.conflicts.is_empty());
    }
}
