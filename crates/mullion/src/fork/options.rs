use super::branch::WarmupTask;

/// How the cache is primed before the concurrent branches start.
#[derive(Debug, Default)]
pub enum Warmup {
    /// Run a dedicated task first.
    Explicit(WarmupTask),
    /// The first declared branch runs alone, then the rest.
    #[default]
    FirstBranch,
    None,
}

impl Warmup {
    pub fn name(&self) -> &'static str {
        match self {
            Warmup::Explicit(_) => "explicit",
            Warmup::FirstBranch => "first-branch",
            Warmup::None => "none",
        }
    }
}

/// Execution strategy for a fork.
#[derive(Debug, Default)]
pub enum ForkStrategy {
    /// Start every branch at once.
    #[default]
    FastParallel,
    /// Finish the warmup before any other branch starts.
    CacheOptimized(Warmup),
}

impl ForkStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ForkStrategy::FastParallel => "fast-parallel",
            ForkStrategy::CacheOptimized(_) => "cache-optimized",
        }
    }
}

/// What to do when branches declare different output schemas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaConflictPolicy {
    /// Refuse to run the fork.
    #[default]
    Error,
    /// Log, record the conflict on the result and run anyway.
    Warn,
}

/// Fork configuration.
#[derive(Debug, Default)]
pub struct ForkOptions {
    pub strategy: ForkStrategy,
    pub schema_conflict: SchemaConflictPolicy,
    /// Model used to price branch usage; defaults to the session model.
    pub model: Option<String>,
}

impl ForkOptions {
    pub fn fast_parallel() -> Self {
        Self::default()
    }

    pub fn cache_optimized(warmup: Warmup) -> Self {
        Self {
            strategy: ForkStrategy::CacheOptimized(warmup),
            ..Default::default()
        }
    }

    pub fn with_schema_conflict(mut self, policy: SchemaConflictPolicy) -> Self {
        self.schema_conflict = policy;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}
