//! Token usage and normalized cache statistics.
//!
//! Each provider reports caching differently. The parsers here turn raw
//! usage payloads into one [`TokenUsage`] shape, and [`CacheStats`] adds the
//! hit ratio and estimated savings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{ModelCatalog, Provider};
use crate::error::Result;
use crate::schema::ValidationError;

/// Normalized token counts for one model call.
///
/// `input_tokens` is the whole prompt, including tokens served from cache
/// and tokens written to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_read_tokens: None,
            cache_write_tokens: None,
        }
    }

    pub fn with_cache_read(mut self, tokens: u64) -> Self {
        self.cache_read_tokens = Some(tokens);
        self
    }

    pub fn with_cache_write(mut self, tokens: u64) -> Self {
        self.cache_write_tokens = Some(tokens);
        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Field-wise sum.
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        let sum = |a: Option<u64>, b: Option<u64>| match (a, b) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        };
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_read_tokens: sum(self.cache_read_tokens, other.cache_read_tokens),
            cache_write_tokens: sum(self.cache_write_tokens, other.cache_write_tokens),
        }
    }

    pub fn sum<'a>(usages: impl IntoIterator<Item = &'a TokenUsage>) -> TokenUsage {
        usages
            .into_iter()
            .fold(TokenUsage::default(), |acc, u| acc.add(u))
    }

    /// Anthropic `usage`: `input_tokens` excludes cache traffic, which is
    /// reported in `cache_creation_input_tokens` and `cache_read_input_tokens`.
    pub fn from_anthropic(raw: &Value) -> Result<Self> {
        let obj = usage_object(raw, "anthropic")?;
        let read = count(obj, "cache_read_input_tokens");
        let write = count(obj, "cache_creation_input_tokens");
        Ok(Self {
            input_tokens: count(obj, "input_tokens") + read + write,
            output_tokens: count(obj, "output_tokens"),
            cache_read_tokens: Some(read),
            cache_write_tokens: Some(write),
        })
    }

    /// OpenAI chat (`prompt_tokens`) or responses (`input_tokens`) usage.
    /// Cached tokens are a subset of the prompt count.
    pub fn from_openai(raw: &Value) -> Result<Self> {
        let obj = usage_object(raw, "openai")?;
        let (input, output, details) = if obj.contains_key("prompt_tokens") {
            ("prompt_tokens", "completion_tokens", "prompt_tokens_details")
        } else {
            ("input_tokens", "output_tokens", "input_tokens_details")
        };
        let cached = obj
            .get(details)
            .and_then(Value::as_object)
            .map(|d| count(d, "cached_tokens"))
            .unwrap_or(0);
        Ok(Self {
            input_tokens: count(obj, input),
            output_tokens: count(obj, output),
            cache_read_tokens: Some(cached),
            cache_write_tokens: None,
        })
    }

    /// Gemini `usageMetadata`. `promptTokenCount` includes cached content.
    pub fn from_gemini(raw: &Value) -> Result<Self> {
        let obj = usage_object(raw, "gemini")?;
        Ok(Self {
            input_tokens: count(obj, "promptTokenCount"),
            output_tokens: count(obj, "candidatesTokenCount"),
            cache_read_tokens: Some(count(obj, "cachedContentTokenCount")),
            cache_write_tokens: None,
        })
    }

    /// Dispatch on provider. Unknown providers use the OpenAI shape.
    pub fn from_provider(provider: Provider, raw: &Value) -> Result<Self> {
        match provider {
            Provider::Anthropic => Self::from_anthropic(raw),
            Provider::Gemini => Self::from_gemini(raw),
            Provider::OpenAi | Provider::Unknown => Self::from_openai(raw),
        }
    }
}

fn usage_object<'a>(raw: &'a Value, provider: &str) -> Result<&'a serde_json::Map<String, Value>> {
    raw.as_object().ok_or_else(|| {
        ValidationError::root(format!("{provider} usage payload must be an object")).into()
    })
}

fn count(obj: &serde_json::Map<String, Value>, key: &str) -> u64 {
    obj.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Provider-agnostic cache outcome for one or more calls.
///
/// `cached_tokens + fresh_tokens == total_tokens` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub provider: Provider,
    pub model: String,
    /// Prompt tokens.
    pub total_tokens: u64,
    /// Prompt tokens served from cache.
    pub cached_tokens: u64,
    /// Prompt tokens processed at the full input rate.
    pub fresh_tokens: u64,
    /// Tokens that did not have to be reprocessed at full price.
    pub saved_tokens: u64,
    pub cache_write_tokens: u64,
    /// `cached_tokens / total_tokens`, 0 when there were no tokens.
    pub cache_hit_ratio: f64,
    /// Input-rate price of the cached tokens minus their cache-read price.
    pub estimated_saved_usd: f64,
}

impl CacheStats {
    /// Build stats from normalized usage using the shared catalog.
    pub fn from_usage(usage: &TokenUsage, model: &str) -> Self {
        ModelCatalog::shared().cache_stats(usage, model)
    }

    /// Combine stats from several calls. Ratios are recomputed from the sums.
    pub fn aggregate(stats: &[CacheStats]) -> CacheStats {
        let provider = stats
            .first()
            .map(|s| s.provider)
            .filter(|p| stats.iter().all(|s| s.provider == *p))
            .unwrap_or_default();
        let model = stats
            .first()
            .map(|s| s.model.clone())
            .filter(|m| stats.iter().all(|s| &s.model == m))
            .unwrap_or_else(|| "mixed".to_string());

        let total_tokens = stats.iter().map(|s| s.total_tokens).sum();
        let cached_tokens = stats.iter().map(|s| s.cached_tokens).sum();
        CacheStats {
            provider,
            model,
            total_tokens,
            cached_tokens,
            fresh_tokens: stats.iter().map(|s| s.fresh_tokens).sum(),
            saved_tokens: stats.iter().map(|s| s.saved_tokens).sum(),
            cache_write_tokens: stats.iter().map(|s| s.cache_write_tokens).sum(),
            cache_hit_ratio: ratio(cached_tokens, total_tokens),
            estimated_saved_usd: stats.iter().map(|s| s.estimated_saved_usd).sum(),
        }
    }
}

pub(crate) fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl ModelCatalog {
    /// Normalize `usage` into [`CacheStats`] priced against `model`.
    pub fn cache_stats(&self, usage: &TokenUsage, model: &str) -> CacheStats {
        let pricing = self.get_pricing(model, None);
        let total_tokens = usage.input_tokens;
        let cached_tokens = usage.cache_read_tokens.unwrap_or(0).min(total_tokens);
        let discount = (pricing.input_per_mtok - pricing.cache_read_per_mtok).max(0.0);
        CacheStats {
            provider: Provider::detect(model),
            model: model.to_string(),
            total_tokens,
            cached_tokens,
            fresh_tokens: total_tokens - cached_tokens,
            saved_tokens: if discount > 0.0 { cached_tokens } else { 0 },
            cache_write_tokens: usage.cache_write_tokens.unwrap_or(0),
            cache_hit_ratio: ratio(cached_tokens, total_tokens),
            estimated_saved_usd: cached_tokens as f64 * discount / 1_000_000.0,
        }
    }

    /// Parse a raw provider usage payload into [`CacheStats`].
    pub fn parse_usage(&self, provider: Provider, raw: &Value, model: &str) -> Result<CacheStats> {
        Ok(self.cache_stats(&TokenUsage::from_provider(provider, raw)?, model))
    }
}

/// Parse an Anthropic `usage` object.
pub fn parse_anthropic_usage(raw: &Value, model: &str) -> Result<CacheStats> {
    ModelCatalog::shared().parse_usage(Provider::Anthropic, raw, model)
}

/// Parse an OpenAI `usage` object.
pub fn parse_openai_usage(raw: &Value, model: &str) -> Result<CacheStats> {
    ModelCatalog::shared().parse_usage(Provider::OpenAi, raw, model)
}

/// Parse a Gemini `usageMetadata` object.
pub fn parse_gemini_usage(raw: &Value, model: &str) -> Result<CacheStats> {
    ModelCatalog::shared().parse_usage(Provider::Gemini, raw, model)
}

/// Parse a usage payload for any provider.
pub fn parse_usage(provider: Provider, raw: &Value, model: &str) -> Result<CacheStats> {
    ModelCatalog::shared().parse_usage(provider, raw, model)
}
