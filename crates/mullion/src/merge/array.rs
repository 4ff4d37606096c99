//! Array merging: union with exact-value deduplication.

use super::{MergeInputs, MergeOutcome, MergeStrategy, Provenance};
use crate::error::Result;

/// See [`concat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Concat;

/// Union of all branch arrays, deduplicated by equality, in first-seen
/// order.
///
/// A union has no losing branch, so no conflicts are reported. Confidence
/// and consensus level are the average share of branches that produced each
/// element: 1.0 when every branch returned the same set.
pub fn concat() -> Concat {
    Concat
}

impl<E: PartialEq + Clone> MergeStrategy<Vec<E>> for Concat {
    type Output = Vec<E>;

    fn name(&self) -> &'static str {
        "array.concat"
    }

    fn merge(&self, inputs: &MergeInputs<'_, Vec<E>>) -> Result<MergeOutcome<Vec<E>>> {
        let mut union: Vec<&E> = Vec::new();
        for item in &inputs.items {
            for element in item.value {
                if !union.contains(&element) {
                    union.push(element);
                }
            }
        }

        let branches = inputs.items.len() as f64;
        let agreement = if union.is_empty() || branches == 0.0 {
            1.0
        } else {
            union
                .iter()
                .map(|&element| {
                    let holders = inputs
                        .items
                        .iter()
                        .filter(|item| item.value.contains(element))
                        .count();
                    holders as f64 / branches
                })
                .sum::<f64>()
                / union.len() as f64
        };

        Ok(MergeOutcome {
            value: union.into_iter().cloned().collect(),
            confidence: agreement,
            conflicts: Vec::new(),
            provenance: Provenance {
                contributing_branches: inputs.branches(),
                consensus_level: agreement,
                rejected_values: Vec::new(),
            },
            dispersion: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_values;
    use crate::owned::Owned;
    use pretty_assertions::assert_eq;

    fn tags(values: &[&str]) -> Owned<Vec<String>> {
        Owned::new(values.iter().map(|v| v.to_string()).collect(), "tags")
    }

    #[test]
    fn test_union_first_seen_order() {
        let merged = merge_values(
            &[tags(&["rust", "async"]), tags(&["async", "tokio"]), tags(&["rust"])],
            &concat(),
        )
        .unwrap();
        assert_eq!(
            merged.value.value_ref(),
            &vec!["rust".to_string(), "async".to_string(), "tokio".to_string()]
        );
        assert!(merged.conflicts.is_empty());
        // rust 2/3, async 2/3, tokio 1/3
        assert!((merged.value.confidence() - 5.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_identical_arrays() {
        let merged = merge_values(&[tags(&["a", "b"]), tags(&["b", "a"])], &concat()).unwrap();
        assert_eq!(merged.value.confidence(), 1.0);
    }

    #[test]
    fn test_duplicates_within_a_branch() {
        let merged = merge_values(&[tags(&["x", "x", "y"])], &concat()).unwrap();
        assert_eq!(merged.value.value_ref().len(), 2);
        assert_eq!(merged.provenance.consensus_level, 1.0);
    }
}
