//! Model pricing and prompt-cache capabilities.
//!
//! Resolution precedence, highest first:
//!
//! 1. a validated runtime catalog entry
//! 2. a caller-supplied override
//! 3. the pinned baseline, matched by the rules in [`matching`]
//!
//! Unknown models get conservative defaults: priced at the top of their
//! family and never credited with cache features they may not have.

pub mod baseline;
mod matching;
mod provider;
mod runtime;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use provider::Provider;
pub use runtime::{
    CatalogDocument, CatalogInfo, CatalogLoadError, CatalogModel, CatalogPricing,
    CatalogValidationError, MAX_BREAKPOINTS, MIN_CACHEABLE_TOKENS, SUPPORTED_SCHEMA_VERSION,
};

use runtime::RuntimeCatalog;

const FETCH_TIMEOUT_SECS: u64 = 10;

/// Model pricing per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    /// Catalog key the prices belong to.
    pub model: String,
    pub provider: Provider,
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    #[serde(default)]
    pub cache_read_per_mtok: f64,
    /// Price of a default (shortest-TTL) cache write.
    #[serde(default)]
    pub cache_write_per_mtok: f64,
    /// Date the prices were observed.
    pub as_of_date: String,
}

impl ModelPricing {
    pub fn new(
        model: impl Into<String>,
        provider: Provider,
        input_per_mtok: f64,
        output_per_mtok: f64,
    ) -> Self {
        Self {
            model: model.into(),
            provider,
            input_per_mtok,
            output_per_mtok,
            cache_read_per_mtok: 0.0,
            cache_write_per_mtok: 0.0,
            as_of_date: baseline::BASELINE_SNAPSHOT_DATE.to_string(),
        }
    }

    /// Add caching costs.
    pub fn with_caching(mut self, read_per_mtok: f64, write_per_mtok: f64) -> Self {
        self.cache_read_per_mtok = read_per_mtok;
        self.cache_write_per_mtok = write_per_mtok;
        self
    }

    pub fn as_of(mut self, date: impl Into<String>) -> Self {
        self.as_of_date = date.into();
        self
    }
}

/// Cache lifetime for explicit cache writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheTtl {
    #[default]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

/// What prompt caching a model supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheCapabilities {
    pub supports_caching: bool,
    /// The provider caches prefixes without request markup.
    pub automatic: bool,
    /// Explicit cache breakpoints allowed per request.
    pub max_breakpoints: u32,
    pub supports_ttl: bool,
    pub ttl_options: Vec<CacheTtl>,
    /// Shortest prefix the provider will cache.
    pub min_tokens: u64,
    pub supports_tool_caching: bool,
}

impl CacheCapabilities {
    /// No caching at all.
    pub fn none() -> Self {
        Self {
            supports_caching: false,
            automatic: false,
            max_breakpoints: 0,
            supports_ttl: false,
            ttl_options: Vec::new(),
            min_tokens: 4096,
            supports_tool_caching: false,
        }
    }

    /// Restricted capabilities for a recognised provider but unknown model.
    fn family_default(provider: Provider) -> Self {
        match provider {
            Provider::Anthropic => Self {
                supports_caching: true,
                max_breakpoints: 1,
                ..Self::none()
            },
            _ => Self::none(),
        }
    }
}

impl Default for CacheCapabilities {
    fn default() -> Self {
        Self::none()
    }
}

/// Which rule produced a pricing answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    RuntimeCatalog,
    CallerOverride,
    Exact,
    KnownPrefix,
    DatedAlias,
    Family,
    ProviderDefault,
    GlobalDefault,
}

impl MatchRule {
    /// True when the answer came from a fallback rather than a known entry.
    pub fn is_fallback(&self) -> bool {
        matches!(self, MatchRule::ProviderDefault | MatchRule::GlobalDefault)
    }
}

/// Pricing plus how it was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub requested: String,
    pub pricing: ModelPricing,
    pub rule: MatchRule,
}

/// Caller-supplied pricing, keyed by exact model name.
pub type PricingOverrides = HashMap<String, ModelPricing>;

/// Pricing and capability resolver.
///
/// Holds an optional runtime catalog. Loading a new catalog swaps it in
/// atomically after validation; a failed load leaves the old one active.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    runtime: RwLock<Option<Arc<RuntimeCatalog>>>,
}

static SHARED: OnceLock<Arc<ModelCatalog>> = OnceLock::new();

impl ModelCatalog {
    /// Baseline-only catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide catalog for callers that do not inject their own.
    pub fn shared() -> Arc<ModelCatalog> {
        SHARED.get_or_init(|| Arc::new(ModelCatalog::new())).clone()
    }

    fn runtime(&self) -> Option<Arc<RuntimeCatalog>> {
        self.runtime.read().clone()
    }

    /// Resolve pricing and report which rule matched.
    pub fn resolve_pricing(&self, model: &str, overrides: Option<&PricingOverrides>) -> Resolution {
        let runtime = self.runtime();
        let runtime_pricing = |key: &str| {
            runtime
                .as_ref()
                .and_then(|rt| rt.get(key))
                .and_then(|entry| entry.pricing.clone())
        };
        let override_pricing = |key: &str| overrides.and_then(|o| o.get(key)).cloned();
        let found = |pricing, rule| Resolution {
            requested: model.to_string(),
            pricing,
            rule,
        };

        if let Some(pricing) = runtime_pricing(model) {
            return found(pricing, MatchRule::RuntimeCatalog);
        }
        if let Some(pricing) = override_pricing(model) {
            return found(pricing, MatchRule::CallerOverride);
        }

        let matched = matching::resolve(model);
        if let Some(key) = matched.key {
            if let Some(pricing) = runtime_pricing(key) {
                return found(pricing, MatchRule::RuntimeCatalog);
            }
            if let Some(pricing) = override_pricing(key) {
                return found(pricing, MatchRule::CallerOverride);
            }
        }
        if matched.rule.is_fallback() {
            warn!(
                model,
                resolved = %matched.pricing.model,
                rule = ?matched.rule,
                "no pricing for model, using fallback"
            );
        }
        found(matched.pricing, matched.rule)
    }

    /// Pricing for `model`.
    pub fn get_pricing(&self, model: &str, overrides: Option<&PricingOverrides>) -> ModelPricing {
        self.resolve_pricing(model, overrides).pricing
    }

    /// Cache capabilities for `model`.
    pub fn get_cache_capabilities(&self, model: &str) -> CacheCapabilities {
        let runtime = self.runtime();
        let runtime_caps = |key: &str| {
            runtime
                .as_ref()
                .and_then(|rt| rt.get(key))
                .and_then(|entry| entry.capabilities.clone())
        };
        if let Some(caps) = runtime_caps(model) {
            return caps;
        }

        let matched = matching::resolve(model);
        if let Some(caps) = matched.key.and_then(runtime_caps) {
            return caps;
        }
        match matched.rule {
            MatchRule::GlobalDefault => CacheCapabilities::none(),
            MatchRule::ProviderDefault => {
                CacheCapabilities::family_default(matched.pricing.provider)
            }
            _ => baseline::capabilities(
                matched.pricing.provider,
                &matched.pricing.model,
                &matched.pricing,
            ),
        }
    }

    /// Validate `doc` and make it the active runtime catalog.
    pub fn set_runtime_catalog(
        &self,
        doc: CatalogDocument,
    ) -> Result<CatalogInfo, CatalogValidationError> {
        match runtime::validate(doc) {
            Ok(catalog) => {
                let info = catalog.info.clone();
                *self.runtime.write() = Some(Arc::new(catalog));
                info!(
                    models = info.model_count,
                    snapshot = %info.snapshot_date,
                    "runtime catalog loaded"
                );
                Ok(info)
            }
            Err(err) => {
                warn!(
                    issues = err.issues.len(),
                    error = %err,
                    "runtime catalog rejected, keeping previous data"
                );
                Err(err)
            }
        }
    }

    /// Parse and apply an inline JSON catalog.
    pub fn load_json(&self, json: &str) -> Result<CatalogInfo, CatalogLoadError> {
        let doc = runtime::parse_document(json).inspect_err(|err| {
            warn!(error = %err, "runtime catalog rejected, keeping previous data");
        })?;
        Ok(self.set_runtime_catalog(doc)?)
    }

    /// Read and apply a catalog file.
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<CatalogInfo, CatalogLoadError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.inspect_err(|err| {
            warn!(path = %path.display(), error = %err, "failed to read runtime catalog");
        })?;
        self.load_json(&json)
    }

    /// Fetch and apply a catalog over HTTP.
    pub async fn fetch_url(&self, url: &str) -> Result<CatalogInfo, CatalogLoadError> {
        let fetch = async {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()?;
            client.get(url).send().await?.error_for_status()?.text().await
        };
        let json = fetch.await.inspect_err(|err| {
            warn!(url, error = %err, "failed to fetch runtime catalog");
        })?;
        self.load_json(&json)
    }

    /// Drop the runtime catalog and fall back to the baseline.
    pub fn clear_runtime_catalog(&self) {
        if self.runtime.write().take().is_some() {
            info!("runtime catalog cleared");
        }
    }

    /// Summary of the active runtime catalog, if one is loaded.
    pub fn runtime_catalog_info(&self) -> Option<CatalogInfo> {
        self.runtime().map(|rt| rt.info.clone())
    }
}

/// [`ModelCatalog::get_pricing`] on the shared catalog.
pub fn get_pricing(model: &str, overrides: Option<&PricingOverrides>) -> ModelPricing {
    ModelCatalog::shared().get_pricing(model, overrides)
}

/// [`ModelCatalog::get_cache_capabilities`] on the shared catalog.
pub fn get_cache_capabilities(model: &str) -> CacheCapabilities {
    ModelCatalog::shared().get_cache_capabilities(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn catalog_json(input: f64) -> String {
        json!({
            "schemaVersion": 1,
            "snapshotDate": "2025-12-01",
            "sources": [],
            "generatedAt": "2025-12-01T00:00:00Z",
            "models": [{"model": "gpt-4", "provider": "openai",
                        "pricing": {"inputPerMtok": input, "outputPerMtok": 60.0}}]
        })
        .to_string()
    }

    #[test]
    fn test_precedence_runtime_over_override_over_baseline() {
        let catalog = ModelCatalog::new();
        let mut overrides = PricingOverrides::new();
        overrides.insert(
            "gpt-4".to_string(),
            ModelPricing::new("gpt-4", Provider::OpenAi, 20.0, 40.0),
        );

        let base = catalog.resolve_pricing("gpt-4", None);
        assert_eq!(base.rule, MatchRule::Exact);
        assert_eq!(base.pricing.input_per_mtok, 30.0);

        let over = catalog.resolve_pricing("gpt-4", Some(&overrides));
        assert_eq!(over.rule, MatchRule::CallerOverride);
        assert_eq!(over.pricing.input_per_mtok, 20.0);

        catalog.load_json(&catalog_json(25.0)).unwrap();
        let rt = catalog.resolve_pricing("gpt-4", Some(&overrides));
        assert_eq!(rt.rule, MatchRule::RuntimeCatalog);
        assert_eq!(rt.pricing.input_per_mtok, 25.0);

        // Fuzzy names land on the runtime entry for the key they resolve to.
        let fuzzy = catalog.resolve_pricing("gpt-4-0613", None);
        assert_eq!(fuzzy.rule, MatchRule::RuntimeCatalog);
        assert_eq!(fuzzy.pricing.input_per_mtok, 25.0);
    }

    #[test]
    fn test_failed_load_keeps_previous_catalog() {
        let catalog = ModelCatalog::new();
        catalog.load_json(&catalog_json(25.0)).unwrap();
        let before = catalog.runtime_catalog_info().unwrap();

        assert!(matches!(
            catalog.load_json("{not json"),
            Err(CatalogLoadError::Invalid(_))
        ));
        assert!(catalog.load_json(&catalog_json(-5.0)).is_err());

        assert_eq!(catalog.runtime_catalog_info(), Some(before));
        assert_eq!(catalog.get_pricing("gpt-4", None).input_per_mtok, 25.0);

        catalog.clear_runtime_catalog();
        assert!(catalog.runtime_catalog_info().is_none());
        assert_eq!(catalog.get_pricing("gpt-4", None).input_per_mtok, 30.0);
    }

    #[test]
    fn test_capabilities() {
        let catalog = ModelCatalog::new();
        let sonnet = catalog.get_cache_capabilities("claude-3-5-sonnet-20241022");
        assert_eq!(sonnet.max_breakpoints, 4);
        assert!(sonnet.supports_ttl);
        assert_eq!(sonnet.min_tokens, 1024);
        assert_eq!(catalog.get_cache_capabilities("claude-3-haiku-20240307").min_tokens, 2048);

        let mini = catalog.get_cache_capabilities("gpt-4o-mini");
        assert!(mini.automatic);
        assert_eq!(mini.max_breakpoints, 0);
        assert!(!mini.supports_ttl);

        assert_eq!(catalog.get_cache_capabilities("mistral-large"), CacheCapabilities::none());

        let unknown_claude = catalog.get_cache_capabilities("claude-instant-1");
        assert_eq!(unknown_claude.max_breakpoints, 1);
        assert!(!unknown_claude.supports_ttl);
    }

    #[test]
    fn test_opus_latest_resolves() {
        let pricing = ModelCatalog::new().get_pricing("claude-opus-latest", None);
        assert_eq!(pricing.provider, Provider::Anthropic);
        assert!(pricing.model.contains("opus"));
    }
}
