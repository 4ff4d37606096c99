//! Merge: reduce branch results to one value in the `merged` scope.
//!
//! Every strategy sees the successful branches in declaration order plus
//! the total branch count, and reports the winner, the disagreements it
//! saw and how much of the fork agreed.

pub mod array;
pub mod categorical;
pub mod consensus;
pub mod continuous;
pub mod custom;
pub mod object;

pub use array::concat;
pub use categorical::weighted_vote;
pub use consensus::{ConsensusFailure, ConsensusOptions, require_consensus};
pub use continuous::{Dispersion, weighted_average};
pub use custom::custom;
pub use object::fieldwise;

use mullion_telemetry::{EndSpanOptions, SpanContext, StartSpanOptions, TraceCollector, attributes};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{MullionError, Result};
use crate::fork::ForkResult;
use crate::owned::{Confidence, MERGED_SCOPE, Owned, ScopeName};

/// One successful branch as seen by a strategy.
#[derive(Debug, Clone, Copy)]
pub struct MergeItem<'a, T> {
    pub branch: &'a str,
    pub value: &'a T,
    pub confidence: f64,
}

/// Strategy input: successful branches in order, plus the fork size.
#[derive(Debug, Clone)]
pub struct MergeInputs<'a, T> {
    pub items: Vec<MergeItem<'a, T>>,
    /// Includes failed branches.
    pub total_branches: usize,
}

impl<'a, T> MergeInputs<'a, T> {
    pub fn new(items: Vec<MergeItem<'a, T>>, total_branches: usize) -> Self {
        Self {
            items,
            total_branches,
        }
    }

    pub fn branches(&self) -> Vec<String> {
        self.items.iter().map(|i| i.branch.to_string()).collect()
    }

    pub(crate) fn mean_confidence(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.items.iter().map(|i| i.confidence).sum::<f64>() / self.items.len() as f64
    }
}

/// A branch that disagreed with the winner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub branch: String,
    /// Field name for per-field strategies.
    pub field: Option<String>,
    pub value: Value,
    pub winner: Value,
    pub confidence: f64,
}

/// A branch value left out of the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedValue {
    pub branch: String,
    pub value: Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub contributing_branches: Vec<String>,
    /// Agreement behind the result, in `[0, 1]`.
    pub consensus_level: f64,
    pub rejected_values: Vec<RejectedValue>,
}

/// What a strategy returns before it is wrapped in the merged scope.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<O> {
    pub value: O,
    pub confidence: f64,
    pub conflicts: Vec<Conflict>,
    pub provenance: Provenance,
    pub dispersion: Option<Dispersion>,
}

/// The merged value and its audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult<O> {
    /// Stamped with the `merged` scope and the fork's trace id.
    pub value: Owned<O>,
    pub conflicts: Vec<Conflict>,
    pub provenance: Provenance,
    /// Only for numeric strategies.
    pub dispersion: Option<Dispersion>,
}

/// Reduces branch values of type `T`.
pub trait MergeStrategy<T> {
    type Output;

    fn name(&self) -> &'static str;

    fn merge(&self, inputs: &MergeInputs<'_, T>) -> Result<MergeOutcome<Self::Output>>;
}

/// Merge the successful branches of `fork`.
///
/// Fails with [`MullionError::NoSuccessfulBranches`] when every branch failed.
pub fn merge<T, S>(fork: &ForkResult<T>, strategy: &S) -> Result<MergeResult<S::Output>>
where
    S: MergeStrategy<T>,
{
    let items = fork
        .results
        .iter()
        .filter_map(|r| {
            r.value().map(|owned| MergeItem {
                branch: r.name.as_str(),
                value: owned.value_ref(),
                confidence: owned.confidence(),
            })
        })
        .collect();
    let inputs = MergeInputs::new(items, fork.results.len());
    run(
        strategy,
        &inputs,
        &fork.trace_id,
        fork.collector.as_ref(),
        fork.span.as_ref(),
    )
}

/// Merge plain owned values, named `"0"`, `"1"`, ... by position.
///
/// The result keeps the first value's trace id.
pub fn merge_values<T, S>(values: &[Owned<T>], strategy: &S) -> Result<MergeResult<S::Output>>
where
    S: MergeStrategy<T>,
{
    let names: Vec<String> = (0..values.len()).map(|i| i.to_string()).collect();
    let items = values
        .iter()
        .zip(&names)
        .map(|(owned, name)| MergeItem {
            branch: name.as_str(),
            value: owned.value_ref(),
            confidence: owned.confidence(),
        })
        .collect();
    let inputs = MergeInputs::new(items, values.len());
    let trace_id = values
        .first()
        .map(|v| v.trace_id().to_string())
        .unwrap_or_else(crate::owned::new_trace_id);
    run(strategy, &inputs, &trace_id, None, None)
}

fn run<T, S>(
    strategy: &S,
    inputs: &MergeInputs<'_, T>,
    trace_id: &str,
    collector: Option<&TraceCollector>,
    parent: Option<&SpanContext>,
) -> Result<MergeResult<S::Output>>
where
    S: MergeStrategy<T>,
{
    if inputs.items.is_empty() {
        return Err(MullionError::NoSuccessfulBranches {
            failed: inputs.total_branches,
        });
    }

    let span = collector.map(|collector| {
        let mut options = StartSpanOptions::new("mullion.merge")
            .trace_id(trace_id)
            .attribute(attributes::MERGE_STRATEGY, strategy.name());
        if let Some(parent) = parent {
            options = options.parent(parent);
        }
        collector.start_span(options)
    });

    let outcome = strategy.merge(inputs).and_then(|outcome| {
        let confidence = Confidence::checked(outcome.confidence, "merged value")?;
        Ok((outcome, confidence))
    });

    let (outcome, confidence) = match outcome {
        Ok(parts) => parts,
        Err(err) => {
            warn!(strategy = strategy.name(), error = %err, "merge failed");
            if let (Some(collector), Some(span)) = (collector, span) {
                collector.end_span(span, EndSpanOptions::error(err.to_string()));
            }
            return Err(err);
        }
    };

    info!(
        strategy = strategy.name(),
        branches = inputs.items.len(),
        conflicts = outcome.conflicts.len(),
        consensus = outcome.provenance.consensus_level,
        confidence = confidence.get(),
        "merged branch results"
    );
    if let (Some(collector), Some(span)) = (collector, span) {
        collector.end_span(
            span,
            EndSpanOptions::ok()
                .attribute(attributes::MERGE_CONSENSUS_LEVEL, outcome.provenance.consensus_level)
                .attribute(attributes::MERGE_CONFLICTS, outcome.conflicts.len())
                .attribute(attributes::CONFIDENCE, confidence.get()),
        );
    }

    Ok(MergeResult {
        value: Owned::from_parts(
            outcome.value,
            confidence,
            ScopeName::new(MERGED_SCOPE),
            trace_id.to_string(),
        ),
        conflicts: outcome.conflicts,
        provenance: outcome.provenance,
        dispersion: outcome.dispersion,
    })
}

/// Equality groups in first-seen order.
#[derive(Debug)]
pub(crate) struct Tally {
    pub groups: Vec<Group>,
    pub total_weight: f64,
}

#[derive(Debug)]
pub(crate) struct Group {
    /// Position of the first member.
    pub first: usize,
    pub members: Vec<usize>,
    pub weight: f64,
}

impl Tally {
    /// Group `values` by equality, weighting each by its confidence. When
    /// every confidence is 0 each value counts as 1.
    pub fn new<V: PartialEq>(values: &[(&V, f64)]) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        for (position, (value, _)) in values.iter().enumerate() {
            match groups.iter_mut().find(|g| values[g.first].0 == *value) {
                Some(group) => group.members.push(position),
                None => groups.push(Group {
                    first: position,
                    members: vec![position],
                    weight: 0.0,
                }),
            }
        }
        let confidence_total: f64 = values.iter().map(|(_, c)| c).sum();
        let by_count = confidence_total <= 0.0;
        for group in &mut groups {
            group.weight = if by_count {
                group.members.len() as f64
            } else {
                group.members.iter().map(|&m| values[m].1).sum()
            };
        }
        let total_weight = groups.iter().map(|g| g.weight).sum();
        Self {
            groups,
            total_weight,
        }
    }

    /// Heaviest group; the earliest wins ties.
    pub fn by_weight(&self) -> Option<&Group> {
        self.groups
            .iter()
            .fold(None, |best: Option<&Group>, g| match best {
                Some(b) if b.weight >= g.weight => Some(b),
                _ => Some(g),
            })
    }

    /// Largest group by member count; the earliest wins ties.
    pub fn by_count(&self) -> Option<&Group> {
        self.groups
            .iter()
            .fold(None, |best: Option<&Group>, g| match best {
                Some(b) if b.members.len() >= g.members.len() => Some(b),
                _ => Some(g),
            })
    }

    /// Weight share of `group`, exactly 1.0 when there is a single group.
    pub fn share(&self, group: &Group) -> f64 {
        if self.groups.len() == 1 || self.total_weight <= 0.0 {
            1.0
        } else {
            group.weight / self.total_weight
        }
    }
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Conflicts and rejections for every item outside `winner`.
pub(crate) fn losers<T: Serialize>(
    inputs: &MergeInputs<'_, T>,
    winner: &Group,
    winner_value: &Value,
) -> Result<(Vec<Conflict>, Vec<RejectedValue>)> {
    let mut conflicts = Vec::new();
    let mut rejected = Vec::new();
    for (position, item) in inputs.items.iter().enumerate() {
        if winner.members.contains(&position) {
            continue;
        }
        let value = to_value(item.value)?;
        conflicts.push(Conflict {
            branch: item.branch.to_string(),
            field: None,
            value: value.clone(),
            winner: winner_value.clone(),
            confidence: item.confidence,
        });
        rejected.push(RejectedValue {
            branch: item.branch.to_string(),
            value,
            confidence: item.confidence,
        });
    }
    Ok((conflicts, rejected))
}
