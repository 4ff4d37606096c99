//! Scope-tagged values for LLM pipelines.
//!
//! Provides:
//! - [`Owned`] and [`SemanticValue`]: model output stamped with the scope it
//!   came from, a validated confidence and a trace id
//! - Scopes that refuse foreign values until they are explicitly bridged
//! - A scoped cache and sink helpers that keep values out of the wrong place
//! - Fork/merge execution with prompt-cache-aware warmup
//! - A pricing and cache-capability catalog with cost calculation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mullion::{Session, TypedSchema};
//!
//! # async fn run(client: impl mullion::InferenceClient + 'static) -> mullion::Result<()> {
//! let session = Session::builder()
//!     .inference(client)
//!     .default_model("claude-3-5-sonnet-20241022")
//!     .build();
//!
//! let summary = session
//!     .scope("admin", |admin| async move {
//!         let schema = TypedSchema::<String>::new();
//!         admin.infer(&schema, "Summarise the ticket").await
//!     })
//!     .await?;
//!
//! session
//!     .scope("public", |public| async move {
//!         // `public.use_value(&summary)` fails: it belongs to "admin".
//!         let visible = public.bridge(&summary);
//!         println!("{}", public.use_value(&visible)?);
//!         Ok(())
//!     })
//!     .await
//! # }
//! ```

pub mod bridge;
pub mod catalog;
pub mod cost;
pub mod error;
pub mod fork;
pub mod inference;
pub mod merge;
pub mod metrics;
pub mod mock;
pub mod owned;
pub mod schema;
pub mod scope;
pub mod scoped_cache;
pub mod sink;
pub mod tokens;

pub use bridge::{
    BridgeMetadata, BridgeOptions, bridge, bridge_multiple, bridge_semantic, bridge_with_metadata,
};
pub use catalog::{
    CacheCapabilities, CacheTtl, CatalogDocument, CatalogInfo, CatalogLoadError,
    CatalogValidationError, MatchRule, ModelCatalog, ModelPricing, PricingOverrides, Provider,
    Resolution, get_cache_capabilities, get_pricing,
};
pub use cost::{
    CostBreakdown, EstimateOptions, calculate_cache_write_pricing, calculate_cost,
    cache_write_multiplier, estimate_cost,
};
pub use error::{MullionError, Result};
pub use fork::{
    Branch, BranchFailure, BranchResult, ForkCacheMetrics, ForkOptions, ForkResult, ForkStrategy,
    SchemaConflictPolicy, Warmup, WarmupReport, WarmupTask, fork,
};
pub use inference::{InferenceClient, InferenceRequest, InferenceResponse};
pub use merge::{
    Conflict, MergeResult, MergeStrategy, Provenance, RejectedValue, merge, merge_values,
};
pub use metrics::{
    CacheStats, TokenUsage, parse_anthropic_usage, parse_gemini_usage, parse_openai_usage,
    parse_usage,
};
pub use owned::{
    Alternative, Confidence, MERGED_SCOPE, Owned, OwnedBuilder, ScopeName, SemanticValue,
};
pub use schema::{FnSchema, Schema, TypedSchema, ValidationError};
pub use scope::{ScopeContext, Session, SessionBuilder, scope};
pub use scoped_cache::{CacheKey, ScopedCache, ScopedCacheOptions};
pub use sink::{OwnedSummary, Redacted, assert_safe_for, redact, summarize};
pub use tokens::estimate_tokens;

pub use mullion_telemetry as telemetry;
