//! Caller-supplied reducers.

use std::marker::PhantomData;

use super::{MergeInputs, MergeOutcome, MergeStrategy, Provenance};
use crate::error::{MullionError, Result};

/// See [`custom`].
pub struct Custom<T, O, E, F> {
    reduce: F,
    _marker: PhantomData<fn(&T) -> std::result::Result<O, E>>,
}

impl<T, O, E, F> std::fmt::Debug for Custom<T, O, E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Custom").finish_non_exhaustive()
    }
}

/// Merge with `reduce`, called on the successful branch values in order.
///
/// The result is wrapped like every other strategy: confidence is the mean
/// branch confidence and every successful branch contributes. An error from
/// `reduce` comes back as [`MullionError::CustomMerge`] with the original
/// error as its source.
pub fn custom<T, O, E, F>(reduce: F) -> Custom<T, O, E, F>
where
    F: Fn(&[&T]) -> std::result::Result<O, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    Custom {
        reduce,
        _marker: PhantomData,
    }
}

impl<T, O, E, F> MergeStrategy<T> for Custom<T, O, E, F>
where
    F: Fn(&[&T]) -> std::result::Result<O, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    type Output = O;

    fn name(&self) -> &'static str {
        "custom"
    }

    fn merge(&self, inputs: &MergeInputs<'_, T>) -> Result<MergeOutcome<O>> {
        let values: Vec<&T> = inputs.items.iter().map(|i| i.value).collect();
        let value = (self.reduce)(&values).map_err(|err| MullionError::CustomMerge(Box::new(err)))?;
        Ok(MergeOutcome {
            value,
            confidence: inputs.mean_confidence(),
            conflicts: Vec::new(),
            provenance: Provenance {
                contributing_branches: inputs.branches(),
                consensus_level: 1.0,
                rejected_values: Vec::new(),
            },
            dispersion: None,
        })
    }
}
