//! Pinned pricing and cache capabilities.
//!
//! Prices are USD per million tokens as published on the snapshot date.
//! A runtime catalog overrides them without a release.

use super::Provider::{Anthropic, Gemini, OpenAi};
use super::{CacheCapabilities, CacheTtl, ModelPricing, Provider};

/// Date the pinned table was last checked against provider price pages.
pub const BASELINE_SNAPSHOT_DATE: &str = "2025-11-24";

pub(crate) struct BaselineEntry {
    pub model: &'static str,
    pub provider: Provider,
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl BaselineEntry {
    pub fn to_pricing(&self) -> ModelPricing {
        ModelPricing::new(self.model, self.provider, self.input, self.output)
            .with_caching(self.cache_read, self.cache_write)
            .as_of(BASELINE_SNAPSHOT_DATE)
    }
}

const fn entry(
    model: &'static str,
    provider: Provider,
    input: f64,
    output: f64,
    cache_read: f64,
    cache_write: f64,
) -> BaselineEntry {
    BaselineEntry {
        model,
        provider,
        input,
        output,
        cache_read,
        cache_write,
    }
}

pub(crate) static BASELINE: &[BaselineEntry] = &[
    // OpenAI: automatic caching, no write surcharge.
    entry("gpt-4", OpenAi, 30.0, 60.0, 0.0, 0.0),
    entry("gpt-4-turbo", OpenAi, 10.0, 30.0, 0.0, 0.0),
    entry("gpt-4o", OpenAi, 2.5, 10.0, 1.25, 0.0),
    entry("gpt-4o-mini", OpenAi, 0.15, 0.6, 0.075, 0.0),
    entry("gpt-4.1", OpenAi, 2.0, 8.0, 0.5, 0.0),
    entry("gpt-4.1-mini", OpenAi, 0.4, 1.6, 0.1, 0.0),
    entry("o1", OpenAi, 15.0, 60.0, 7.5, 0.0),
    entry("o1-mini", OpenAi, 1.1, 4.4, 0.55, 0.0),
    entry("o3-mini", OpenAi, 1.1, 4.4, 0.55, 0.0),
    entry("gpt-3.5-turbo", OpenAi, 0.5, 1.5, 0.0, 0.0),
    // Anthropic: reads at 0.1x input, 5-minute writes at 1.25x input.
    entry("claude-3-5-sonnet-20241022", Anthropic, 3.0, 15.0, 0.3, 3.75),
    entry("claude-3-5-haiku-20241022", Anthropic, 0.8, 4.0, 0.08, 1.0),
    entry("claude-3-opus-20240229", Anthropic, 15.0, 75.0, 1.5, 18.75),
    entry("claude-3-haiku-20240307", Anthropic, 0.25, 1.25, 0.03, 0.3),
    entry("claude-sonnet-4-20250514", Anthropic, 3.0, 15.0, 0.3, 3.75),
    entry("claude-opus-4-20250514", Anthropic, 15.0, 75.0, 1.5, 18.75),
    entry("claude-opus-4-1-20250805", Anthropic, 15.0, 75.0, 1.5, 18.75),
    entry("claude-sonnet-4-5-20250929", Anthropic, 3.0, 15.0, 0.3, 3.75),
    entry("claude-haiku-4-5-20251001", Anthropic, 1.0, 5.0, 0.1, 1.25),
    entry("claude-opus-4-5-20251101", Anthropic, 5.0, 25.0, 0.5, 6.25),
    // Gemini: explicit context caching, writes billed as ordinary input.
    entry("gemini-1.5-pro", Gemini, 1.25, 5.0, 0.3125, 1.25),
    entry("gemini-1.5-flash", Gemini, 0.075, 0.3, 0.01875, 0.075),
    entry("gemini-2.0-flash", Gemini, 0.1, 0.4, 0.025, 0.1),
];

pub(crate) fn find(model: &str) -> Option<&'static BaselineEntry> {
    BASELINE.iter().find(|e| e.model == model)
}

/// Entry used when only the provider family is known. Deliberately the
/// most expensive tier so estimates err high.
pub(crate) fn provider_default(provider: Provider) -> Option<&'static BaselineEntry> {
    match provider {
        Provider::Anthropic => find("claude-opus-4-20250514"),
        Provider::OpenAi => find("gpt-4"),
        Provider::Gemini => find("gemini-1.5-pro"),
        Provider::Unknown => None,
    }
}

/// Last-resort pricing for models nobody recognises. No cache discounts.
pub(crate) fn global_default(model: &str) -> ModelPricing {
    ModelPricing::new(model, Provider::Unknown, 10.0, 30.0).as_of(BASELINE_SNAPSHOT_DATE)
}

/// Capabilities for a resolved baseline model.
pub(crate) fn capabilities(
    provider: Provider,
    model: &str,
    pricing: &ModelPricing,
) -> CacheCapabilities {
    match provider {
        Provider::Anthropic => CacheCapabilities {
            supports_caching: true,
            automatic: false,
            max_breakpoints: 4,
            supports_ttl: true,
            ttl_options: vec![CacheTtl::FiveMinutes, CacheTtl::OneHour],
            min_tokens: if model.contains("haiku") { 2048 } else { 1024 },
            supports_tool_caching: true,
        },
        Provider::OpenAi if pricing.cache_read_per_mtok > 0.0 => CacheCapabilities {
            supports_caching: true,
            automatic: true,
            max_breakpoints: 0,
            supports_ttl: false,
            ttl_options: Vec::new(),
            min_tokens: 1024,
            supports_tool_caching: false,
        },
        Provider::Gemini => CacheCapabilities {
            supports_caching: true,
            automatic: false,
            max_breakpoints: 0,
            supports_ttl: false,
            ttl_options: Vec::new(),
            min_tokens: if model.starts_with("gemini-1.5") { 32_768 } else { 4096 },
            supports_tool_caching: false,
        },
        _ => CacheCapabilities::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_keys_unique_and_priced() {
        let mut seen = std::collections::HashSet::new();
        for e in BASELINE {
            assert!(seen.insert(e.model), "duplicate baseline key {}", e.model);
            assert!(e.input > 0.0 && e.output > 0.0, "{} has no price", e.model);
            assert_eq!(Provider::detect(e.model), e.provider, "{}", e.model);
        }
    }

    #[test]
    fn test_provider_defaults_exist() {
        for provider in [Provider::Anthropic, Provider::OpenAi, Provider::Gemini] {
            let entry = provider_default(provider).unwrap();
            assert_eq!(entry.provider, provider);
        }
        assert!(provider_default(Provider::Unknown).is_none());
    }

    #[test]
    fn test_legacy_openai_models_do_not_cache() {
        let gpt4 = find("gpt-4").unwrap().to_pricing();
        assert!(!capabilities(Provider::OpenAi, "gpt-4", &gpt4).supports_caching);
        let gpt4o = find("gpt-4o").unwrap().to_pricing();
        assert!(capabilities(Provider::OpenAi, "gpt-4o", &gpt4o).automatic);
    }
}
