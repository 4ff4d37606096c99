//! Field-wise merging of structured values.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{Conflict, MergeInputs, MergeOutcome, MergeStrategy, Provenance, Tally, to_value};
use crate::error::{MullionError, Result};

/// See [`fieldwise`].
#[derive(Debug)]
pub struct Fieldwise<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Fieldwise<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Fieldwise<T> {}

/// Run a weighted vote on every field independently.
///
/// Values must serialize to JSON objects. Fields are visited in first-seen
/// order; a branch that lacks a field does not vote on it. Each per-field
/// disagreement becomes its own [`Conflict`] carrying the field name. The
/// merged confidence is the mean of the per-field vote shares and the
/// consensus level is the fraction of fields every voter agreed on.
pub fn fieldwise<T>() -> Fieldwise<T> {
    Fieldwise {
        _marker: PhantomData,
    }
}

impl<T: Serialize + DeserializeOwned> MergeStrategy<T> for Fieldwise<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        "object.fieldwise"
    }

    fn merge(&self, inputs: &MergeInputs<'_, T>) -> Result<MergeOutcome<T>> {
        let mut objects = Vec::with_capacity(inputs.items.len());
        for item in &inputs.items {
            match to_value(item.value)? {
                Value::Object(map) => objects.push(map),
                other => {
                    return Err(MullionError::merge_input(format!(
                        "fieldwise merge needs objects, branch '{}' produced {}",
                        item.branch,
                        kind(&other)
                    )));
                }
            }
        }

        let mut fields: Vec<&String> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                if !fields.contains(&key) {
                    fields.push(key);
                }
            }
        }

        let mut merged = Map::new();
        let mut conflicts = Vec::new();
        let mut shares = Vec::with_capacity(fields.len());
        let mut agreed = 0usize;

        for field in fields {
            let voters: Vec<(usize, &Value)> = objects
                .iter()
                .enumerate()
                .filter_map(|(position, object)| object.get(field).map(|v| (position, v)))
                .collect();
            let ballots: Vec<(&Value, f64)> = voters
                .iter()
                .map(|&(position, value)| (value, inputs.items[position].confidence))
                .collect();
            let tally = Tally::new(&ballots);
            let Some(winner) = tally.by_weight() else {
                continue;
            };
            let winner_value = ballots[winner.first].0.clone();

            for (ballot, &(position, value)) in voters.iter().enumerate() {
                if winner.members.contains(&ballot) {
                    continue;
                }
                let item = &inputs.items[position];
                conflicts.push(Conflict {
                    branch: item.branch.to_string(),
                    field: Some(field.clone()),
                    value: value.clone(),
                    winner: winner_value.clone(),
                    confidence: item.confidence,
                });
            }

            if tally.groups.len() == 1 {
                agreed += 1;
            }
            shares.push(tally.share(winner));
            merged.insert(field.clone(), winner_value);
        }

        let field_count = shares.len();
        let (confidence, consensus_level) = if field_count == 0 {
            (1.0, 1.0)
        } else {
            (
                shares.iter().sum::<f64>() / field_count as f64,
                agreed as f64 / field_count as f64,
            )
        };

        let value = serde_json::from_value(Value::Object(merged)).map_err(|err| {
            MullionError::merge_input(format!("merged fields do not form a valid value: {err}"))
        })?;

        Ok(MergeOutcome {
            value,
            confidence,
            conflicts,
            provenance: Provenance {
                contributing_branches: inputs.branches(),
                consensus_level,
                rejected_values: Vec::new(),
            },
            dispersion: None,
        })
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
