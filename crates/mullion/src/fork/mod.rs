//! Fork: run several scoped branches and collect their results in order.
//!
//! Two strategies:
//! - [`ForkStrategy::FastParallel`] starts every branch at once.
//! - [`ForkStrategy::CacheOptimized`] runs a warmup pass to completion
//!   first, so the provider's prompt cache is populated before the other
//!   branches start concurrently.
//!
//! Branch failures never abort the fork. They are recorded on the
//! [`BranchResult`] and the remaining branches still run to completion; a
//! fork in which every branch failed is still `Ok`. A warmup failure is
//! logged, recorded in the [`WarmupReport`] and the branches run anyway
//! without the cache benefit.

mod branch;
mod options;
mod result;

pub use branch::{Branch, WarmupTask};
pub use options::{ForkOptions, ForkStrategy, SchemaConflictPolicy, Warmup};
pub use result::{
    BranchFailure, BranchResult, ForkCacheMetrics, ForkResult, SchemaConflictReport, WarmupReport,
};

use std::collections::HashSet;

use futures::future::join_all;
use mullion_telemetry::{EndSpanOptions, SpanContext, StartSpanOptions, attributes};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{MullionError, Result};
use crate::metrics::{CacheStats, TokenUsage};
use crate::owned::{Owned, ScopeName};
use crate::scope::ScopeContext;

const WARMUP_SCOPE: &str = "warmup";

impl ScopeContext {
    /// Run `branches` as child scopes of this one. See [`fork`].
    pub async fn fork<T: Send + 'static>(
        &self,
        options: ForkOptions,
        branches: Vec<Branch<T>>,
    ) -> Result<ForkResult<T>> {
        fork(self, options, branches).await
    }
}

/// Run `branches` under `options.strategy`.
///
/// Fails before anything runs when the branch list is empty, names are
/// duplicated or unusable, or (with [`SchemaConflictPolicy::Error`]) the
/// branches declare different schemas.
pub async fn fork<T: Send + 'static>(
    ctx: &ScopeContext,
    options: ForkOptions,
    branches: Vec<Branch<T>>,
) -> Result<ForkResult<T>> {
    validate_branches(&branches, &options.strategy)?;

    let schema_conflict = detect_schema_conflict(&branches);
    if let Some(conflict) = &schema_conflict {
        match options.schema_conflict {
            SchemaConflictPolicy::Error => {
                return Err(MullionError::SchemaConflict {
                    branches: conflict.branches.clone(),
                });
            }
            SchemaConflictPolicy::Warn => {
                warn!(
                    scope = %ctx.name(),
                    branches = ?conflict.branches,
                    "fork branches declare different schemas"
                );
            }
        }
    }

    let model = options
        .model
        .clone()
        .or_else(|| ctx.session().default_model().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    let strategy_name = options.strategy.name();
    let cache_optimized = matches!(options.strategy, ForkStrategy::CacheOptimized(_));
    let warmup_name = match &options.strategy {
        ForkStrategy::FastParallel => "none",
        ForkStrategy::CacheOptimized(warmup) => warmup.name(),
    };

    let span = ctx.collector().map(|collector| {
        let mut start = StartSpanOptions::new("mullion.fork")
            .trace_id(ctx.trace_id())
            .attribute(attributes::SCOPE_NAME, ctx.name().as_str())
            .attribute(attributes::FORK_STRATEGY, strategy_name)
            .attribute(attributes::FORK_WARMUP, warmup_name)
            .attribute(attributes::FORK_BRANCH_COUNT, branches.len());
        if let Some(parent) = ctx.span() {
            start = start.parent(parent);
        }
        collector.start_span(start)
    });

    info!(
        scope = %ctx.name(),
        strategy = strategy_name,
        warmup = warmup_name,
        branches = branches.len(),
        "starting fork"
    );

    let runner = Runner {
        ctx,
        span: span.as_ref(),
        model: &model,
    };

    let mut warmup = None;
    let results = match options.strategy {
        ForkStrategy::FastParallel | ForkStrategy::CacheOptimized(Warmup::None) => {
            runner.run_all(branches.into_iter().enumerate()).await
        }
        ForkStrategy::CacheOptimized(Warmup::FirstBranch) => {
            let mut branches = branches.into_iter().enumerate();
            let mut results = Vec::new();
            if let Some((index, first)) = branches.next() {
                let first = runner.run_branch(index, first).await;
                warmup = Some(first_branch_report(&first));
                results.push(first);
            }
            results.extend(runner.run_all(branches).await);
            results
        }
        ForkStrategy::CacheOptimized(Warmup::Explicit(task)) => {
            warmup = Some(runner.run_warmup(task).await);
            runner.run_all(branches.into_iter().enumerate()).await
        }
    };

    if let Some(failure) = warmup.as_ref().and_then(|w| w.failure.as_ref()) {
        warn!(
            scope = %ctx.name(),
            error = %failure,
            "warmup failed; branches ran without a primed cache"
        );
    }

    let cache_metrics =
        cache_optimized.then(|| ForkCacheMetrics::from_branches(&results, warmup.as_ref()));
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - succeeded;

    info!(scope = %ctx.name(), succeeded, failed, "fork finished");

    if let (Some(collector), Some(span)) = (ctx.collector(), span.clone()) {
        let mut end = if succeeded > 0 {
            EndSpanOptions::ok()
        } else {
            EndSpanOptions::error("all branches failed")
        };
        end = end
            .attribute(attributes::FORK_SUCCEEDED, succeeded)
            .attribute(attributes::FORK_FAILED, failed);
        if let Some(metrics) = &cache_metrics {
            end = end
                .attribute(attributes::CACHE_HIT_RATIO, metrics.overall_hit_ratio)
                .attribute(attributes::CACHE_CACHED_TOKENS, metrics.cached_tokens)
                .attribute(attributes::CACHE_SAVED_USD, metrics.estimated_saved_usd);
        }
        collector.end_span(span, end);
    }

    Ok(ForkResult {
        results,
        cache_metrics,
        warmup,
        schema_conflict,
        trace_id: ctx.trace_id().to_string(),
        collector: ctx.collector().cloned(),
        span,
    })
}

fn validate_branches<T>(branches: &[Branch<T>], strategy: &ForkStrategy) -> Result<()> {
    if branches.is_empty() {
        return Err(MullionError::invalid_fork("fork needs at least one branch"));
    }
    let mut seen = HashSet::new();
    for branch in branches {
        if branch.name.is_empty() || branch.name.contains('.') {
            return Err(MullionError::invalid_fork(format!(
                "branch name '{}' must be non-empty and must not contain '.'",
                branch.name
            )));
        }
        if !seen.insert(branch.name.as_str()) {
            return Err(MullionError::invalid_fork(format!(
                "duplicate branch name '{}'",
                branch.name
            )));
        }
    }
    if matches!(strategy, ForkStrategy::CacheOptimized(Warmup::Explicit(_)))
        && seen.contains(WARMUP_SCOPE)
    {
        return Err(MullionError::invalid_fork(
            "branch name 'warmup' is reserved when an explicit warmup task is used",
        ));
    }
    Ok(())
}

fn detect_schema_conflict<T>(branches: &[Branch<T>]) -> Option<SchemaConflictReport> {
    let mut declared = branches
        .iter()
        .filter_map(|b| b.schema.as_ref().map(|s| (b.name.as_str(), s)));
    let (reference_name, reference) = declared.next()?;
    let differing: Vec<String> = declared
        .filter(|(_, schema)| *schema != reference)
        .map(|(name, _)| name.to_string())
        .collect();
    if differing.is_empty() {
        return None;
    }
    let mut names = vec![reference_name.to_string()];
    names.extend(differing);
    Some(SchemaConflictReport { branches: names })
}

fn first_branch_report<T>(first: &BranchResult<T>) -> WarmupReport {
    WarmupReport {
        scope: first.scope.clone(),
        branch: Some(first.name.clone()),
        usage: first.usage,
        cache: first.cache.clone(),
        failure: first
            .outcome
            .as_ref()
            .err()
            .map(|f| f.error.to_string()),
        duration: first.duration,
    }
}

struct Runner<'a> {
    ctx: &'a ScopeContext,
    span: Option<&'a SpanContext>,
    model: &'a str,
}

impl Runner<'_> {
    /// Start every branch together and wait for all of them.
    async fn run_all<T: Send + 'static>(
        &self,
        branches: impl Iterator<Item = (usize, Branch<T>)>,
    ) -> Vec<BranchResult<T>> {
        join_all(branches.map(|(index, branch)| self.run_branch(index, branch))).await
    }

    async fn run_branch<T: Send + 'static>(
        &self,
        index: usize,
        branch: Branch<T>,
    ) -> BranchResult<T> {
        let Branch { name, run, .. } = branch;
        let scope = ScopeName::new(format!("{}.{}", self.ctx.name(), name));
        let child = self.ctx.child(scope.clone());
        let span = self.start_span("mullion.fork.branch", &scope, |options| {
            options
                .attribute(attributes::FORK_BRANCH_INDEX, index)
                .attribute(attributes::FORK_BRANCH_NAME, name.as_str())
        });

        debug!(branch = %name, scope = %scope, index, "starting branch");
        let started = Instant::now();
        let outcome = child.clone().enter(run).await.and_then(|owned: Owned<T>| {
            if owned.scope() == &scope {
                Ok(owned)
            } else {
                Err(MullionError::scope_mismatch(scope.as_str(), owned.scope().as_str()))
            }
        });
        let duration = started.elapsed();
        let (usage, cache) = self.usage_of(&child);

        let outcome = outcome.map_err(|error| {
            warn!(branch = %name, scope = %scope, error = %error, "branch failed");
            BranchFailure {
                branch: name.clone(),
                error,
            }
        });
        self.end_span(span, outcome.as_ref().err().map(|f| f.error.to_string()), |end| {
            match (&outcome, &cache) {
                (Ok(owned), Some(cache)) => end
                    .attribute(attributes::CONFIDENCE, owned.confidence())
                    .attribute(attributes::CACHE_HIT_RATIO, cache.cache_hit_ratio),
                (Ok(owned), None) => end.attribute(attributes::CONFIDENCE, owned.confidence()),
                _ => end,
            }
        });

        BranchResult {
            name,
            index,
            scope,
            outcome,
            usage,
            cache,
            duration,
        }
    }

    async fn run_warmup(&self, task: WarmupTask) -> WarmupReport {
        let scope = ScopeName::new(format!("{}.{}", self.ctx.name(), WARMUP_SCOPE));
        let child = self.ctx.child(scope.clone());
        let span = self.start_span("mullion.fork.warmup", &scope, |options| options);

        debug!(scope = %scope, "running warmup");
        let started = Instant::now();
        let failure = child.clone().enter(task.run).await.err().map(|e| e.to_string());
        let duration = started.elapsed();
        let (usage, cache) = self.usage_of(&child);
        self.end_span(span, failure.clone(), |end| end);

        WarmupReport {
            scope,
            branch: None,
            usage,
            cache,
            failure,
            duration,
        }
    }

    fn usage_of(&self, child: &ScopeContext) -> (TokenUsage, Option<CacheStats>) {
        let calls = child.usage();
        let usage = TokenUsage::sum(calls.iter());
        let cache = (!calls.is_empty()).then(|| self.ctx.catalog().cache_stats(&usage, self.model));
        (usage, cache)
    }

    fn start_span(
        &self,
        name: &str,
        scope: &ScopeName,
        configure: impl FnOnce(StartSpanOptions) -> StartSpanOptions,
    ) -> Option<SpanContext> {
        let collector = self.ctx.collector()?;
        let mut options = StartSpanOptions::new(name)
            .trace_id(self.ctx.trace_id())
            .attribute(attributes::SCOPE_NAME, scope.as_str());
        if let Some(parent) = self.span {
            options = options.parent(parent);
        }
        Some(collector.start_span(configure(options)))
    }

    fn end_span(
        &self,
        span: Option<SpanContext>,
        error: Option<String>,
        configure: impl FnOnce(EndSpanOptions) -> EndSpanOptions,
    ) {
        let (Some(collector), Some(span)) = (self.ctx.collector(), span) else {
            return;
        };
        let options = match error {
            Some(message) => EndSpanOptions::error(message),
            None => EndSpanOptions::ok(),
        };
        collector.end_span(span, configure(options));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEventKind, MockInference};
    use crate::schema::TypedSchema;
    use crate::scope::Session;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn session(mock: Arc<MockInference>) -> Session {
        Session::builder()
            .shared_inference(mock)
            .default_model("claude-3-5-sonnet-20241022")
            .build()
    }

    fn text_branch(name: &str, prompt: &str) -> Branch<String> {
        Branch::infer(name, TypedSchema::<String>::new(), prompt)
    }

    #[tokio::test]
    async fn test_results_in_declaration_order() {
        let mock = Arc::new(
            MockInference::new()
                .with_scope_reply("a", json!("alpha"))
                .with_scope_reply("b", json!("beta"))
                .with_scope_reply("c", json!("gamma")),
        );
        let result = session(mock)
            .scope("root", |ctx| async move {
                ctx.fork(
                    ForkOptions::fast_parallel(),
                    vec![
                        text_branch("a", "p"),
                        text_branch("b", "p"),
                        text_branch("c", "p"),
                    ],
                )
                .await
            })
            .await
            .unwrap();

        let names: Vec<_> = result.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        let scopes: Vec<_> = result.results.iter().map(|r| r.scope.to_string()).collect();
        assert_eq!(scopes, vec!["root.a", "root.b", "root.c"]);
        let stamped: Vec<_> = result
            .successes()
            .iter()
            .map(|o| o.scope().to_string())
            .collect();
        assert_eq!(stamped, scopes);
        assert!(result.cache_metrics.is_none());
    }

    #[tokio::test]
    async fn test_branch_failure_is_captured() {
        let mock = Arc::new(
            MockInference::new()
                .with_reply(json!("ok"))
                .with_scope_failure("bad", "upstream timeout"),
        );
        let result = session(mock)
            .scope("root", |ctx| async move {
                ctx.fork(
                    ForkOptions::fast_parallel(),
                    vec![text_branch("good", "p"), text_branch("bad", "p")],
                )
                .await
            })
            .await
            .unwrap();

        assert_eq!(result.successes().len(), 1);
        let failures = result.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].branch, "bad");
        assert!(failures[0].to_string().contains("upstream timeout"));
        assert!(!result.all_failed());
    }

    #[tokio::test]
    async fn test_validation_failure_is_a_branch_failure() {
        let mock = Arc::new(MockInference::new().with_reply(json!(42)));
        let result = session(mock)
            .scope("root", |ctx| async move {
                ctx.fork(ForkOptions::fast_parallel(), vec![text_branch("only", "p")])
                    .await
            })
            .await
            .unwrap();
        assert!(result.all_failed());
        assert!(matches!(
            result.failures()[0].error,
            MullionError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_foreign_scope_value_rejected() {
        let result = crate::scope::scope("root", |ctx| async move {
            ctx.fork(
                ForkOptions::fast_parallel(),
                vec![Branch::new("leaky", |_ctx| async move {
                    Ok(Owned::new(1, "elsewhere"))
                })],
            )
            .await
        })
        .await
        .unwrap();
        let failure = &result.failures()[0].error;
        assert!(matches!(failure, MullionError::ScopeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_invalid_forks_rejected_up_front() {
        let empty = crate::scope::scope("root", |ctx| async move {
            ctx.fork::<String>(ForkOptions::fast_parallel(), Vec::new()).await
        })
        .await;
        assert!(matches!(empty, Err(MullionError::InvalidFork(_))));

        let mock = Arc::new(MockInference::new());
        let duplicate = session(mock.clone())
            .scope("root", |ctx| async move {
                ctx.fork(
                    ForkOptions::fast_parallel(),
                    vec![text_branch("x", "p"), text_branch("x", "p")],
                )
                .await
            })
            .await;
        assert!(matches!(duplicate, Err(MullionError::InvalidFork(_))));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_schema_conflict_detected_before_execution() {
        let mock = Arc::new(MockInference::new().with_reply(json!("x")));
        let err = session(mock.clone())
            .scope("root", |ctx| async move {
                let number = Branch::infer("number", TypedSchema::<u32>::new(), "p");
                let text = Branch::infer("text", TypedSchema::<u32>::new(), "p")
                    .with_schema(json!({"type": "string"}));
                ctx.fork(ForkOptions::fast_parallel(), vec![number, text]).await
            })
            .await
            .unwrap_err();
        match err {
            MullionError::SchemaConflict { branches } => {
                assert_eq!(branches, vec!["number".to_string(), "text".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_schema_conflict_warn_policy_runs() {
        let mock = Arc::new(MockInference::new().with_reply(json!(7)));
        let result = session(mock.clone())
            .scope("root", |ctx| async move {
                let a = Branch::infer("a", TypedSchema::<u32>::new(), "p");
                let b = Branch::infer("b", TypedSchema::<u32>::new(), "p")
                    .with_schema(json!({"type": "integer", "minimum": 5}));
                ctx.fork(
                    ForkOptions::fast_parallel().with_schema_conflict(SchemaConflictPolicy::Warn),
                    vec![a, b],
                )
                .await
            })
            .await
            .unwrap();
        assert_eq!(mock.call_count(), 2);
        assert!(result.schema_conflict.is_some());
        assert_eq!(result.successes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_branch_warmup_is_a_barrier() {
        let mock = Arc::new(
            MockInference::new()
                .with_reply(json!("done"))
                .with_latency(Duration::from_millis(50)),
        );
        let result = session(mock.clone())
            .scope("root", |ctx| async move {
                ctx.fork(
                    ForkOptions::cache_optimized(Warmup::FirstBranch),
                    vec![
                        text_branch("first", "p"),
                        text_branch("second", "p"),
                        text_branch("third", "p"),
                    ],
                )
                .await
            })
            .await
            .unwrap();

        let first_end = mock.event_position("first", MockEventKind::End).unwrap();
        for other in ["second", "third"] {
            let start = mock.event_position(other, MockEventKind::Start).unwrap();
            assert!(first_end < start, "{other} started before warmup finished");
        }
        let warmup = result.warmup.as_ref().unwrap();
        assert_eq!(warmup.branch.as_deref(), Some("first"));
        assert!(warmup.succeeded());
        assert!(result.cache_metrics.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_optimized_hits_more_than_fast_parallel() {
        let context = "shared document ".repeat(400);
        let run = |options: ForkOptions| {
            let context = context.clone();
            async move {
                let mock = Arc::new(
                    MockInference::new()
                        .with_reply(json!("answer"))
                        .with_latency(Duration::from_millis(20))
                        .with_prompt_cache(1024),
                );
                session(mock)
                    .scope("root", |ctx| async move {
                        let branches = ["q1", "q2", "q3"]
                            .into_iter()
                            .map(|q| text_branch(q, &format!("{context}\n\n{q}")))
                            .collect();
                        ctx.fork(options, branches).await
                    })
                    .await
                    .unwrap()
            }
        };

        let parallel = run(ForkOptions::fast_parallel()).await;
        let cached = run(ForkOptions::cache_optimized(Warmup::FirstBranch)).await;

        let hits = |fork: &ForkResult<String>| {
            fork.results
                .iter()
                .filter_map(|r| r.cache.as_ref())
                .map(|c| c.cached_tokens)
                .sum::<u64>()
        };
        assert_eq!(hits(&parallel), 0);
        assert!(hits(&cached) > 0);
        let metrics = cached.cache_metrics.unwrap();
        assert!(metrics.overall_hit_ratio > 0.5);
        assert!(metrics.estimated_saved_usd > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_warmup_failure_is_not_fatal() {
        let mock = Arc::new(
            MockInference::new()
                .with_reply(json!("fine"))
                .with_scope_failure("warmup", "cache write refused"),
        );
        let result = session(mock.clone())
            .scope("root", |ctx| async move {
                ctx.fork(
                    ForkOptions::cache_optimized(Warmup::Explicit(WarmupTask::prompt("context"))),
                    vec![text_branch("a", "p"), text_branch("b", "p")],
                )
                .await
            })
            .await
            .unwrap();

        let warmup = result.warmup.as_ref().unwrap();
        assert!(!warmup.succeeded());
        assert_eq!(warmup.scope, ScopeName::from("root.warmup"));
        assert_eq!(result.successes().len(), 2);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_reserved_warmup_name() {
        let warmup = WarmupTask::new(|_| async { Ok(()) });
        let err = crate::scope::scope("root", |ctx| async move {
            ctx.fork(
                ForkOptions::cache_optimized(Warmup::Explicit(warmup)),
                vec![Branch::new("warmup", |ctx: ScopeContext| async move {
                    Ok(Owned::new(1, ctx.name().clone()))
                })],
            )
            .await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MullionError::InvalidFork(_)));
    }
}
