//! Explicit scope transfer.
//!
//! Bridging is always legal: it copies the value, confidence and trace id
//! into a new [`Owned`] stamped with the target scope. The input is never
//! modified. The trace id is carried through any number of bridges, so it
//! identifies where a value originally came from.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MullionError, Result};
use crate::owned::{Owned, ScopeName, SemanticValue};

/// Audit record for one bridge. Produced alongside the value, never stored on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMetadata {
    pub source: ScopeName,
    pub target: ScopeName,
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Options for [`bridge_multiple`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOptions {
    /// Fail unless every input shares one scope.
    pub require_same_scope: bool,
}

impl BridgeOptions {
    pub fn same_scope() -> Self {
        Self {
            require_same_scope: true,
        }
    }
}

/// Move `owned` into `target` without an enclosing scope.
pub fn bridge<T: Clone>(owned: &Owned<T>, target: impl Into<ScopeName>) -> Owned<T> {
    let target = target.into();
    debug!(
        source = %owned.scope(),
        target = %target,
        trace_id = owned.trace_id(),
        "bridging value"
    );
    owned.restamp(target)
}

/// Move a [`SemanticValue`] into `target`, keeping alternatives and reasoning.
pub fn bridge_semantic<T: Clone>(
    value: &SemanticValue<T>,
    target: impl Into<ScopeName>,
) -> SemanticValue<T> {
    SemanticValue::from_parts(
        bridge(value.owned(), target),
        value.alternatives().to_vec(),
        value.reasoning().to_string(),
    )
}

/// Bridge a batch of values into `target`, preserving order.
///
/// With `require_same_scope`, fails with [`MullionError::MixedScopes`]
/// listing every distinct source scope when they differ.
pub fn bridge_multiple<T: Clone>(
    values: &[Owned<T>],
    target: impl Into<ScopeName>,
    options: BridgeOptions,
) -> Result<Vec<Owned<T>>> {
    if options.require_same_scope {
        let scopes: BTreeSet<&str> = values.iter().map(|v| v.scope().as_str()).collect();
        if scopes.len() > 1 {
            return Err(MullionError::MixedScopes {
                scopes: scopes.into_iter().map(str::to_string).collect(),
            });
        }
    }
    let target = target.into();
    Ok(values.iter().map(|v| bridge(v, target.clone())).collect())
}

/// Bridge and return an audit record describing the transfer.
pub fn bridge_with_metadata<T: Clone>(
    owned: &Owned<T>,
    target: impl Into<ScopeName>,
    reason: Option<&str>,
) -> (Owned<T>, BridgeMetadata) {
    let target = target.into();
    let metadata = BridgeMetadata {
        source: owned.scope().clone(),
        target: target.clone(),
        timestamp: Utc::now(),
        trace_id: owned.trace_id().to_string(),
        reason: reason.map(str::to_string),
    };
    (bridge(owned, target), metadata)
}
