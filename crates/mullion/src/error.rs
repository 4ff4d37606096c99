//! Error types.

use thiserror::Error;

use crate::catalog::CatalogValidationError;
use crate::schema::ValidationError;

/// Result type for mullion operations.
pub type Result<T> = std::result::Result<T, MullionError>;

/// Errors raised at trust boundaries and by the fork/merge/catalog engines.
#[derive(Debug, Error)]
pub enum MullionError {
    /// A value was used in a scope it was not stamped for.
    #[error(
        "Scope mismatch: value belongs to scope '{actual}' but was used in scope '{expected}'. \
         Use bridge() to move it into '{expected}' explicitly."
    )]
    ScopeMismatch { expected: String, actual: String },

    /// Confidence outside [0, 1] (or NaN).
    #[error("confidence {value} for {context} is outside [0, 1]")]
    ConfidenceRange { value: f64, context: String },

    /// `require_consensus` could not find enough agreeing branches.
    #[error("consensus not met: {achieved}/{total} branches agree, {required} required")]
    ConsensusNotMet {
        required: usize,
        achieved: usize,
        total: usize,
    },

    /// Branches declared incompatible output schemas.
    #[error("schema conflict between fork branches: {}", branches.join(", "))]
    SchemaConflict { branches: Vec<String> },

    /// A runtime catalog payload was rejected.
    #[error(transparent)]
    CatalogValidation(#[from] CatalogValidationError),

    /// A scoped cache saw a key or value from another scope.
    #[error("scoped cache '{cache_scope}' refused {operation} for scope '{found}'")]
    CacheScopeViolation {
        operation: &'static str,
        cache_scope: String,
        found: String,
    },

    /// A value was sent to a sink that does not accept its scope.
    #[error(
        "value from scope '{scope}' is not allowed in this sink (allowed: {})",
        allowed.join(", ")
    )]
    UnsafeSink { scope: String, allowed: Vec<String> },

    /// `bridge_multiple` with `require_same_scope` saw several scopes.
    #[error("bridge_multiple requires a single source scope, found: {}", scopes.join(", "))]
    MixedScopes { scopes: Vec<String> },

    /// Model output failed schema validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The inference collaborator failed or is missing.
    #[error("inference error: {0}")]
    Inference(String),

    /// Every fork branch failed.
    #[error("no successful branches to merge ({failed} failed)")]
    NoSuccessfulBranches { failed: usize },

    /// Fork was misconfigured.
    #[error("invalid fork: {0}")]
    InvalidFork(String),

    /// Branch values could not be merged by the chosen strategy.
    #[error("merge input error: {0}")]
    MergeInput(String),

    /// A custom merge reducer returned an error; the original is the source.
    #[error("custom merge failed: {0}")]
    CustomMerge(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MullionError {
    /// Create a scope mismatch error
    pub fn scope_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        MullionError::ScopeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        MullionError::Inference(msg.into())
    }

    /// Create an invalid fork error
    pub fn invalid_fork(msg: impl Into<String>) -> Self {
        MullionError::InvalidFork(msg.into())
    }

    /// Create a merge input error
    pub fn merge_input(msg: impl Into<String>) -> Self {
        MullionError::MergeInput(msg.into())
    }

    /// True for violations of a trust boundary (scope, sink or cache).
    pub fn is_boundary_violation(&self) -> bool {
        matches!(
            self,
            MullionError::ScopeMismatch { .. }
                | MullionError::CacheScopeViolation { .. }
                | MullionError::UnsafeSink { .. }
                | MullionError::MixedScopes { .. }
        )
    }
}
