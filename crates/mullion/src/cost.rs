//! Cost calculation with and without prompt caching.
//!
//! Savings are reported as computed. A single call that writes a large
//! prefix to cache and never reads it back costs more than the uncached
//! call, and that shows up as negative savings.

use serde::{Deserialize, Serialize};

use crate::catalog::{CacheTtl, ModelCatalog, Provider};
use crate::metrics::{CacheStats, TokenUsage};

const PER_MILLION: f64 = 1_000_000.0;

fn per_mtok(tokens: u64, rate: f64) -> f64 {
    tokens as f64 * rate / PER_MILLION
}

/// USD cost of one call or an aggregate of calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub model: String,
    pub provider: Provider,
    /// Input tokens not served from cache, at the input rate.
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_read_cost: f64,
    pub cache_write_cost: f64,
    pub total_cost: f64,
    /// What the same tokens cost with caching off.
    pub no_cache_cost: f64,
    /// `no_cache_cost - total_cost`; negative when caching cost more.
    pub savings: f64,
    /// Savings as a percentage of `no_cache_cost`, 0 when that is 0.
    pub savings_percent: f64,
}

impl CostBreakdown {
    fn finish(mut self) -> Self {
        self.savings = self.no_cache_cost - self.total_cost;
        self.savings_percent = if self.no_cache_cost > 0.0 {
            self.savings / self.no_cache_cost * 100.0
        } else {
            0.0
        };
        self
    }

    /// Sum several breakdowns. Percentages are recomputed from the totals.
    pub fn aggregate(costs: &[CostBreakdown]) -> CostBreakdown {
        let model = costs
            .first()
            .map(|c| c.model.clone())
            .filter(|m| costs.iter().all(|c| &c.model == m))
            .unwrap_or_else(|| "mixed".to_string());
        let provider = costs
            .first()
            .map(|c| c.provider)
            .filter(|p| costs.iter().all(|c| c.provider == *p))
            .unwrap_or_default();
        let sum = |f: fn(&CostBreakdown) -> f64| costs.iter().map(f).sum::<f64>();
        CostBreakdown {
            model,
            provider,
            input_cost: sum(|c| c.input_cost),
            output_cost: sum(|c| c.output_cost),
            cache_read_cost: sum(|c| c.cache_read_cost),
            cache_write_cost: sum(|c| c.cache_write_cost),
            total_cost: sum(|c| c.total_cost),
            no_cache_cost: sum(|c| c.no_cache_cost),
            savings: 0.0,
            savings_percent: 0.0,
        }
        .finish()
    }
}

/// Options for [`ModelCatalog::estimate_cost`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EstimateOptions {
    pub use_cache: bool,
    /// Fraction of input expected to be read from cache, clamped to `[0, 1]`.
    pub expected_hit_rate: f64,
}

impl EstimateOptions {
    /// Steady-state estimate with `hit_rate` of the input served from cache.
    pub fn cached(hit_rate: f64) -> Self {
        Self {
            use_cache: true,
            expected_hit_rate: hit_rate,
        }
    }
}

/// Multiplier on the base input price for a cache write.
pub fn cache_write_multiplier(provider: Provider, ttl: CacheTtl) -> f64 {
    match (provider, ttl) {
        (Provider::Anthropic, CacheTtl::FiveMinutes) => 1.25,
        (Provider::Anthropic, CacheTtl::OneHour) => 2.0,
        (Provider::OpenAi, _) => 0.0,
        (Provider::Gemini, _) => 1.0,
        (Provider::Unknown, _) => 2.0,
    }
}

/// Cache-write price per million tokens for `ttl`.
pub fn calculate_cache_write_pricing(
    provider: Provider,
    base_input_per_mtok: f64,
    ttl: CacheTtl,
) -> f64 {
    base_input_per_mtok * cache_write_multiplier(provider, ttl)
}

impl ModelCatalog {
    /// Cost of a call.
    ///
    /// Cache reads come from `usage.cache_read_tokens`, falling back to
    /// `cache_stats`; writes likewise. Read tokens are billed at the read
    /// rate instead of the input rate. Written tokens are billed at the
    /// write rate in addition to their input charge.
    pub fn calculate_cost(
        &self,
        usage: &TokenUsage,
        cache_stats: Option<&CacheStats>,
        model: &str,
    ) -> CostBreakdown {
        let pricing = self.get_pricing(model, None);
        let read = usage
            .cache_read_tokens
            .or(cache_stats.map(|s| s.cached_tokens))
            .unwrap_or(0)
            .min(usage.input_tokens);
        let write = usage
            .cache_write_tokens
            .or(cache_stats.map(|s| s.cache_write_tokens))
            .unwrap_or(0);

        let input_cost = per_mtok(usage.input_tokens - read, pricing.input_per_mtok);
        let output_cost = per_mtok(usage.output_tokens, pricing.output_per_mtok);
        let cache_read_cost = per_mtok(read, pricing.cache_read_per_mtok);
        let cache_write_cost = per_mtok(write, pricing.cache_write_per_mtok);

        CostBreakdown {
            model: pricing.model.clone(),
            provider: pricing.provider,
            input_cost,
            output_cost,
            cache_read_cost,
            cache_write_cost,
            total_cost: input_cost + output_cost + cache_read_cost + cache_write_cost,
            no_cache_cost: per_mtok(usage.input_tokens, pricing.input_per_mtok) + output_cost,
            savings: 0.0,
            savings_percent: 0.0,
        }
        .finish()
    }

    /// Cost estimate for token counts before a call is made.
    pub fn estimate_cost(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        model: &str,
        options: EstimateOptions,
    ) -> CostBreakdown {
        let mut usage = TokenUsage::new(input_tokens, output_tokens);
        if options.use_cache {
            let rate = options.expected_hit_rate.clamp(0.0, 1.0);
            usage.cache_read_tokens = Some((input_tokens as f64 * rate).round() as u64);
        }
        self.calculate_cost(&usage, None, model)
    }
}

/// [`ModelCatalog::calculate_cost`] on the shared catalog.
pub fn calculate_cost(
    usage: &TokenUsage,
    cache_stats: Option<&CacheStats>,
    model: &str,
) -> CostBreakdown {
    ModelCatalog::shared().calculate_cost(usage, cache_stats, model)
}

/// [`ModelCatalog::estimate_cost`] on the shared catalog.
pub fn estimate_cost(
    input_tokens: u64,
    output_tokens: u64,
    model: &str,
    options: EstimateOptions,
) -> CostBreakdown {
    ModelCatalog::shared().estimate_cost(input_tokens, output_tokens, model, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_gpt4_no_cache() {
        let cost = ModelCatalog::new().calculate_cost(&TokenUsage::new(10_000, 500), None, "gpt-4");
        assert!(close(cost.input_cost, 0.30));
        assert!(close(cost.output_cost, 0.03));
        assert!(close(cost.total_cost, 0.33));
        assert_eq!(cost.savings, 0.0);
        assert_eq!(cost.savings_percent, 0.0);
    }

    #[test]
    fn test_negative_savings_not_clamped() {
        let usage = TokenUsage::new(10_000, 100).with_cache_write(10_000);
        let cost = ModelCatalog::new().calculate_cost(&usage, None, "claude-3-5-sonnet-20241022");
        assert!(cost.savings < 0.0);
        assert!(cost.savings_percent < 0.0);
    }

    #[test]
    fn test_stats_fallback() {
        let catalog = ModelCatalog::new();
        let model = "claude-3-5-sonnet-20241022";
        let stats = catalog.cache_stats(&TokenUsage::new(10_000, 0).with_cache_read(8000), model);
        let via_stats = catalog.calculate_cost(&TokenUsage::new(10_000, 0), Some(&stats), model);
        let via_usage =
            catalog.calculate_cost(&TokenUsage::new(10_000, 0).with_cache_read(8000), None, model);
        assert_eq!(via_stats, via_usage);
    }

    #[test]
    fn test_zero_tokens() {
        let cost = ModelCatalog::new().calculate_cost(&TokenUsage::default(), None, "gpt-4o");
        assert_eq!(cost.total_cost, 0.0);
        assert_eq!(cost.savings_percent, 0.0);
    }

    #[test]
    fn test_write_pricing() {
        let price = calculate_cache_write_pricing;
        assert_eq!(price(Provider::Anthropic, 3.0, CacheTtl::FiveMinutes), 3.75);
        assert_eq!(price(Provider::Anthropic, 3.0, CacheTtl::OneHour), 6.0);
        assert_eq!(price(Provider::OpenAi, 2.5, CacheTtl::OneHour), 0.0);
        assert_eq!(price(Provider::Unknown, 1.0, CacheTtl::FiveMinutes), 2.0);
    }

    #[test]
    fn test_estimate_with_cache_is_cheaper() {
        let catalog = ModelCatalog::new();
        let plain = catalog.estimate_cost(10_000, 500, "gpt-4o", EstimateOptions::default());
        let cached = catalog.estimate_cost(10_000, 500, "gpt-4o", EstimateOptions::cached(0.5));
        assert!(cached.total_cost < plain.total_cost);
        assert_eq!(cached.no_cache_cost, plain.total_cost);
    }

    #[test]
    fn test_aggregate() {
        let catalog = ModelCatalog::new();
        let a = catalog.calculate_cost(&TokenUsage::new(1000, 100), None, "gpt-4o");
        let cached = TokenUsage::new(1000, 100).with_cache_read(1000);
        let b = catalog.calculate_cost(&cached, None, "gpt-4o");
        let total = CostBreakdown::aggregate(&[a.clone(), b.clone()]);
        assert!(close(total.total_cost, a.total_cost + b.total_cost));
        assert!(total.savings > 0.0);
        assert_eq!(total.model, "gpt-4o");
    }
}
