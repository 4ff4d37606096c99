//! Runtime catalog payloads and their validation.
//!
//! A payload is parsed and validated as a whole. Anything wrong with it
//! rejects the whole document; nothing is partially applied.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::matching::normalize;
use super::{CacheCapabilities, CacheTtl, ModelPricing, Provider};
use crate::error::MullionError;

/// Schema version this build understands.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// Largest number of cache breakpoints any provider accepts.
pub const MAX_BREAKPOINTS: u32 = 4;

/// Smallest cacheable prefix any provider accepts.
pub const MIN_CACHEABLE_TOKENS: u64 = 1024;

/// A runtime catalog payload was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("runtime catalog rejected: {}", issues.join("; "))]
pub struct CatalogValidationError {
    pub issues: Vec<String>,
}

impl CatalogValidationError {
    fn single(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

/// Loading a runtime catalog failed; the previous catalog is still active.
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to fetch catalog: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Invalid(#[from] CatalogValidationError),
}

impl From<CatalogLoadError> for MullionError {
    fn from(err: CatalogLoadError) -> Self {
        match err {
            CatalogLoadError::Io(e) => MullionError::Io(e),
            CatalogLoadError::Http(e) => MullionError::Http(e),
            CatalogLoadError::Invalid(e) => MullionError::CatalogValidation(e),
        }
    }
}

/// Catalog document as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    pub schema_version: u32,
    /// `YYYY-MM-DD` date the prices were observed.
    pub snapshot_date: String,
    #[serde(default)]
    pub sources: Vec<String>,
    /// RFC 3339 timestamp.
    pub generated_at: String,
    pub models: Vec<CatalogModel>,
}

/// One model override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogModel {
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub pricing: Option<CatalogPricing>,
    #[serde(default)]
    pub capabilities: Option<CacheCapabilities>,
}

/// Prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    #[serde(default)]
    pub cache_read_per_mtok: f64,
    #[serde(default)]
    pub cache_write_per_mtok: f64,
}

/// Summary of the active runtime catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogInfo {
    pub schema_version: u32,
    pub snapshot_date: NaiveDate,
    pub sources: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub model_count: usize,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeEntry {
    pub pricing: Option<ModelPricing>,
    pub capabilities: Option<CacheCapabilities>,
}

/// A validated catalog, keyed by normalized model name.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeCatalog {
    pub info: CatalogInfo,
    pub entries: HashMap<String, RuntimeEntry>,
}

impl RuntimeCatalog {
    pub fn get(&self, model: &str) -> Option<&RuntimeEntry> {
        self.entries.get(&normalize(model))
    }
}

/// Parse a JSON payload, reporting the path of the first structural error.
pub(crate) fn parse_document(json: &str) -> Result<CatalogDocument, CatalogValidationError> {
    let deserializer = &mut serde_json::Deserializer::from_str(json);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = err.path().to_string();
        CatalogValidationError::single(format!("{path}: {}", err.into_inner()))
    })
}

/// Validate every field of `doc`, collecting all issues before rejecting.
pub(crate) fn validate(doc: CatalogDocument) -> Result<RuntimeCatalog, CatalogValidationError> {
    let mut issues = Vec::new();

    if doc.schema_version != SUPPORTED_SCHEMA_VERSION {
        issues.push(format!(
            "schemaVersion {} is not supported (expected {SUPPORTED_SCHEMA_VERSION})",
            doc.schema_version
        ));
    }
    let snapshot_date = NaiveDate::parse_from_str(&doc.snapshot_date, "%Y-%m-%d")
        .map_err(|_| issues.push(format!("snapshotDate '{}' is not YYYY-MM-DD", doc.snapshot_date)))
        .ok();
    let generated_at = DateTime::parse_from_rfc3339(&doc.generated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| issues.push(format!("generatedAt '{}' is not RFC 3339", doc.generated_at)))
        .ok();
    if doc.models.is_empty() {
        issues.push("models must not be empty".to_string());
    }

    let mut seen = HashSet::new();
    let mut entries = HashMap::new();
    for (index, model) in doc.models.iter().enumerate() {
        let at = format!("models[{index}]");
        let key = normalize(&model.model);
        if key.is_empty() {
            issues.push(format!("{at}: model name is empty"));
            continue;
        }
        if !seen.insert(key.clone()) {
            issues.push(format!("{at}: duplicate model '{}'", model.model));
            continue;
        }
        let Some(provider) = Provider::parse(&model.provider) else {
            issues.push(format!("{at}: unknown provider '{}'", model.provider));
            continue;
        };
        let detected = Provider::detect(&key);
        if detected != Provider::Unknown && detected != provider {
            issues.push(format!(
                "{at}: '{}' looks like a {detected} model but is declared as {provider}",
                model.model
            ));
        }
        if model.pricing.is_none() && model.capabilities.is_none() {
            issues.push(format!("{at}: needs pricing or capabilities"));
        }
        if let Some(pricing) = &model.pricing {
            check_pricing(&at, pricing, &mut issues);
        }
        if let Some(caps) = &model.capabilities {
            check_capabilities(&at, provider, caps, &mut issues);
        }

        entries.insert(
            key,
            RuntimeEntry {
                pricing: model.pricing.map(|p| {
                    ModelPricing::new(
                        model.model.trim(),
                        provider,
                        p.input_per_mtok,
                        p.output_per_mtok,
                    )
                    .with_caching(p.cache_read_per_mtok, p.cache_write_per_mtok)
                    .as_of(doc.snapshot_date.clone())
                }),
                capabilities: model.capabilities.clone(),
            },
        );
    }

    match (snapshot_date, generated_at) {
        (Some(snapshot_date), Some(generated_at)) if issues.is_empty() => Ok(RuntimeCatalog {
            info: CatalogInfo {
                schema_version: doc.schema_version,
                snapshot_date,
                sources: doc.sources,
                generated_at,
                model_count: entries.len(),
                loaded_at: Utc::now(),
            },
            entries,
        }),
        _ => Err(CatalogValidationError { issues }),
    }
}

fn check_pricing(at: &str, pricing: &CatalogPricing, issues: &mut Vec<String>) {
    for (field, value) in [
        ("inputPerMtok", pricing.input_per_mtok),
        ("outputPerMtok", pricing.output_per_mtok),
        ("cacheReadPerMtok", pricing.cache_read_per_mtok),
        ("cacheWritePerMtok", pricing.cache_write_per_mtok),
    ] {
        if !value.is_finite() || value < 0.0 {
            issues.push(format!("{at}.pricing.{field}: {value} is not a non-negative price"));
        }
    }
}

fn check_capabilities(
    at: &str,
    provider: Provider,
    caps: &CacheCapabilities,
    issues: &mut Vec<String>,
) {
    if caps.max_breakpoints > MAX_BREAKPOINTS {
        issues.push(format!(
            "{at}.capabilities.maxBreakpoints: {} exceeds {MAX_BREAKPOINTS}",
            caps.max_breakpoints
        ));
    }
    if caps.supports_caching && caps.min_tokens < MIN_CACHEABLE_TOKENS {
        issues.push(format!(
            "{at}.capabilities.minTokens: {} is below {MIN_CACHEABLE_TOKENS}",
            caps.min_tokens
        ));
    }
    if !caps.supports_caching
        && (caps.max_breakpoints > 0 || caps.supports_ttl || caps.supports_tool_caching)
    {
        issues.push(format!(
            "{at}.capabilities: cache features declared while supportsCaching is false"
        ));
    }
    if provider != Provider::Anthropic
        && (caps.max_breakpoints > 0 || caps.supports_ttl || caps.supports_tool_caching)
    {
        issues.push(format!(
            "{at}.capabilities: explicit breakpoints, TTLs and tool caching are anthropic-only"
        ));
    }
    if !caps.supports_ttl && !caps.ttl_options.is_empty() {
        issues.push(format!("{at}.capabilities.ttlOptions: set while supportsTtl is false"));
    }
    if caps.supports_ttl && !caps.ttl_options.contains(&CacheTtl::FiveMinutes) {
        issues.push(format!("{at}.capabilities.ttlOptions: must include 5m"));
    }
}
