use std::time::Duration;

use mullion_telemetry::{SpanContext, TraceCollector};
use serde::Serialize;
use thiserror::Error;

use crate::error::MullionError;
use crate::metrics::{CacheStats, TokenUsage, ratio};
use crate::owned::{Owned, ScopeName};

/// A branch that did not produce a value.
#[derive(Debug, Error)]
#[error("branch '{branch}' failed: {error}")]
pub struct BranchFailure {
    pub branch: String,
    #[source]
    pub error: MullionError,
}

/// Outcome of one branch, in declaration order.
#[derive(Debug)]
pub struct BranchResult<T> {
    pub name: String,
    pub index: usize,
    /// The branch's own scope, `<parent>.<name>`.
    pub scope: ScopeName,
    pub outcome: Result<Owned<T>, BranchFailure>,
    /// Usage recorded in the branch scope.
    pub usage: TokenUsage,
    /// `None` when the branch recorded no usage.
    pub cache: Option<CacheStats>,
    pub duration: Duration,
}

impl<T> BranchResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&Owned<T>> {
        self.outcome.as_ref().ok()
    }
}

/// What happened during the warmup pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    pub scope: ScopeName,
    /// Set when the first declared branch doubled as the warmup.
    pub branch: Option<String>,
    pub usage: TokenUsage,
    pub cache: Option<CacheStats>,
    /// Error message when the warmup failed. The fork still ran.
    pub failure: Option<String>,
    pub duration: Duration,
}

impl WarmupReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Aggregated cache outcome of a cache-optimized fork.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkCacheMetrics {
    /// Prompt tokens across branches.
    pub total_tokens: u64,
    pub cached_tokens: u64,
    /// `cached_tokens / total_tokens`.
    pub overall_hit_ratio: f64,
    /// Mean of the per-branch hit ratios.
    pub average_hit_ratio: f64,
    /// Tokens spent by the warmup pass.
    pub warmup_tokens: u64,
    pub estimated_saved_usd: f64,
}

impl ForkCacheMetrics {
    pub(crate) fn from_branches<T>(
        branches: &[BranchResult<T>],
        warmup: Option<&WarmupReport>,
    ) -> Self {
        let stats: Vec<&CacheStats> = branches.iter().filter_map(|b| b.cache.as_ref()).collect();
        let total_tokens = stats.iter().map(|s| s.total_tokens).sum();
        let cached_tokens = stats.iter().map(|s| s.cached_tokens).sum();
        let average_hit_ratio = if stats.is_empty() {
            0.0
        } else {
            stats.iter().map(|s| s.cache_hit_ratio).sum::<f64>() / stats.len() as f64
        };
        Self {
            total_tokens,
            cached_tokens,
            overall_hit_ratio: ratio(cached_tokens, total_tokens),
            average_hit_ratio,
            warmup_tokens: warmup.map(|w| w.usage.total_tokens()).unwrap_or(0),
            estimated_saved_usd: stats.iter().map(|s| s.estimated_saved_usd).sum(),
        }
    }
}

/// Branches that declared a schema different from the first declared one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaConflictReport {
    /// The reference branch first, then every branch that disagrees with it.
    pub branches: Vec<String>,
}

/// Everything a fork produced.
#[derive(Debug)]
pub struct ForkResult<T> {
    /// One entry per branch, in declaration order.
    pub results: Vec<BranchResult<T>>,
    /// Only set for cache-optimized forks.
    pub cache_metrics: Option<ForkCacheMetrics>,
    pub warmup: Option<WarmupReport>,
    /// Set when branches disagreed on schema and the policy was `Warn`.
    pub schema_conflict: Option<SchemaConflictReport>,
    pub trace_id: String,
    pub(crate) collector: Option<TraceCollector>,
    pub(crate) span: Option<SpanContext>,
}

impl<T> ForkResult<T> {
    pub fn successes(&self) -> Vec<&Owned<T>> {
        self.results.iter().filter_map(|r| r.value()).collect()
    }

    pub fn failures(&self) -> Vec<&BranchFailure> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err())
            .collect()
    }

    pub fn all_failed(&self) -> bool {
        self.results.iter().all(|r| !r.is_success())
    }

    /// Usage summed over branches and any dedicated warmup task.
    pub fn total_usage(&self) -> TokenUsage {
        let branches = self.results.iter().map(|r| &r.usage);
        let warmup = self
            .warmup
            .iter()
            .filter(|w| w.branch.is_none())
            .map(|w| &w.usage);
        TokenUsage::sum(branches.chain(warmup))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
