//! Span attribute names.
//!
//! Exporters key off these exact strings, so they are part of the public
//! contract.

pub const SCOPE_NAME: &str = "mullion.scope.name";
pub const SCOPE_PARENT: &str = "mullion.scope.parent";
pub const SCOPE_DEPTH: &str = "mullion.scope.depth";

pub const BRIDGE_SOURCE: &str = "mullion.bridge.source";
pub const BRIDGE_TARGET: &str = "mullion.bridge.target";
pub const BRIDGE_REASON: &str = "mullion.bridge.reason";

pub const CONFIDENCE: &str = "mullion.confidence";

pub const FORK_STRATEGY: &str = "mullion.fork.strategy";
pub const FORK_WARMUP: &str = "mullion.fork.warmup";
pub const FORK_BRANCH_COUNT: &str = "mullion.fork.branch_count";
pub const FORK_BRANCH_INDEX: &str = "mullion.fork.branch_index";
pub const FORK_BRANCH_NAME: &str = "mullion.fork.branch_name";
pub const FORK_SUCCEEDED: &str = "mullion.fork.succeeded";
pub const FORK_FAILED: &str = "mullion.fork.failed";

pub const MERGE_STRATEGY: &str = "mullion.merge.strategy";
pub const MERGE_CONSENSUS_LEVEL: &str = "mullion.merge.consensus_level";
pub const MERGE_CONFLICTS: &str = "mullion.merge.conflicts";

pub const CACHE_HIT_RATIO: &str = "mullion.cache.hit_ratio";
pub const CACHE_CACHED_TOKENS: &str = "mullion.cache.cached_tokens";
pub const CACHE_SAVED_USD: &str = "mullion.cache.saved_usd";

pub const COST_TOTAL_USD: &str = "mullion.cost.total_usd";

pub const GEN_AI_SYSTEM: &str = "gen_ai.system";
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
