//! Model-name resolution against the pinned table.
//!
//! Rules are tried in this order, and the order is part of the contract:
//!
//! 1. exact key
//! 2. longest known key that prefixes the model, or appears inside it
//!    (dash-qualified keys only, so `o1` cannot match inside a date)
//! 3. dated alias: `-latest` or a date suffix swapped for the newest
//!    dated key with the same stem
//! 4. regex family rules, most specific first
//! 5. provider-family default
//! 6. global default

use std::sync::LazyLock;

use regex::Regex;

use super::baseline::{self, BASELINE, BaselineEntry};
use super::{MatchRule, ModelPricing, Provider};

static DATED_SUFFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+?)-(latest|\d{8}|\d{4}-\d{2}-\d{2})$").ok());

static DATE_ONLY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d{8}$").ok());

static FAMILY_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"claude.*opus.*4[-.]5", "claude-opus-4-5-20251101"),
        (r"claude.*opus.*4[-.]1", "claude-opus-4-1-20250805"),
        (r"claude.*opus", "claude-opus-4-20250514"),
        (r"claude.*sonnet.*4[-.]5", "claude-sonnet-4-5-20250929"),
        (r"claude.*sonnet", "claude-sonnet-4-20250514"),
        (r"claude.*haiku.*4[-.]5", "claude-haiku-4-5-20251001"),
        (r"claude.*haiku", "claude-3-5-haiku-20241022"),
        (r"gpt-4o.*mini", "gpt-4o-mini"),
        (r"gpt-4\.1.*mini", "gpt-4.1-mini"),
        (r"gpt-4.*turbo", "gpt-4-turbo"),
        (r"gpt-3\.5", "gpt-3.5-turbo"),
        (r"gemini.*pro", "gemini-1.5-pro"),
        (r"gemini.*flash", "gemini-2.0-flash"),
    ]
    .into_iter()
    .filter_map(|(pattern, key)| Regex::new(pattern).ok().map(|re| (re, key)))
    .collect()
});

/// Outcome of matching a model name against the pinned table.
#[derive(Debug, Clone)]
pub(crate) struct BaselineMatch {
    pub pricing: ModelPricing,
    pub rule: MatchRule,
    /// Pinned key that matched, if any.
    pub key: Option<&'static str>,
}

impl BaselineMatch {
    fn from_entry(entry: &'static BaselineEntry, rule: MatchRule) -> Self {
        Self {
            pricing: entry.to_pricing(),
            rule,
            key: Some(entry.model),
        }
    }
}

/// Lowercased model name with any `vendor/` routing prefix removed.
pub(crate) fn normalize(model: &str) -> String {
    let lower = model.trim().to_ascii_lowercase();
    match lower.rsplit_once('/') {
        Some((_, bare)) => bare.to_string(),
        None => lower,
    }
}

pub(crate) fn resolve(model: &str) -> BaselineMatch {
    let name = normalize(model);

    if let Some(entry) = baseline::find(&name) {
        return BaselineMatch::from_entry(entry, MatchRule::Exact);
    }
    if let Some(entry) = known_prefix(&name) {
        return BaselineMatch::from_entry(entry, MatchRule::KnownPrefix);
    }
    if let Some(entry) = dated_alias(&name) {
        return BaselineMatch::from_entry(entry, MatchRule::DatedAlias);
    }
    if let Some(entry) = family(&name) {
        return BaselineMatch::from_entry(entry, MatchRule::Family);
    }
    if let Some(entry) = baseline::provider_default(Provider::detect(&name)) {
        return BaselineMatch::from_entry(entry, MatchRule::ProviderDefault);
    }
    BaselineMatch {
        pricing: baseline::global_default(model),
        rule: MatchRule::GlobalDefault,
        key: None,
    }
}

fn known_prefix(name: &str) -> Option<&'static BaselineEntry> {
    BASELINE
        .iter()
        .filter(|e| name.starts_with(e.model) || (e.model.contains('-') && name.contains(e.model)))
        .max_by_key(|e| e.model.len())
}

fn dated_alias(name: &str) -> Option<&'static BaselineEntry> {
    let stem = DATED_SUFFIX
        .as_ref()
        .and_then(|re| re.captures(name))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(name);
    let date_only = DATE_ONLY.as_ref()?;

    BASELINE
        .iter()
        .filter(|e| {
            e.model
                .strip_prefix(stem)
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|date| date_only.is_match(date))
        })
        .max_by_key(|e| e.model)
}

fn family(name: &str) -> Option<&'static BaselineEntry> {
    FAMILY_RULES
        .iter()
        .find(|(re, _)| re.is_match(name))
        .and_then(|(_, key)| baseline::find(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(model: &str, rule: MatchRule, key: &str) {
        let m = resolve(model);
        assert_eq!(m.rule, rule, "rule for {model}");
        assert_eq!(m.pricing.model, key, "key for {model}");
    }

    #[test]
    fn test_exact() {
        check("gpt-4", MatchRule::Exact, "gpt-4");
        check("  Claude-3-5-Sonnet-20241022 ", MatchRule::Exact, "claude-3-5-sonnet-20241022");
        check("openai/gpt-4o", MatchRule::Exact, "gpt-4o");
    }

    #[test]
    fn test_longest_prefix_wins() {
        check("gpt-4o-mini-2024-07-18", MatchRule::KnownPrefix, "gpt-4o-mini");
        check("gpt-4o-2024-08-06", MatchRule::KnownPrefix, "gpt-4o");
        check("gpt-4-0613", MatchRule::KnownPrefix, "gpt-4");
        check("o1-preview", MatchRule::KnownPrefix, "o1");
        check(
            "anthropic.claude-3-5-sonnet-20241022-v2:0",
            MatchRule::KnownPrefix,
            "claude-3-5-sonnet-20241022",
        );
    }

    #[test]
    fn test_dated_alias() {
        check("claude-3-5-sonnet-latest", MatchRule::DatedAlias, "claude-3-5-sonnet-20241022");
        check("claude-3-opus", MatchRule::DatedAlias, "claude-3-opus-20240229");
        check("claude-opus-4-1", MatchRule::DatedAlias, "claude-opus-4-1-20250805");
    }

    #[test]
    fn test_family_rules() {
        check("claude-opus-latest", MatchRule::Family, "claude-opus-4-20250514");
        check("claude-opus-4.5-preview", MatchRule::Family, "claude-opus-4-5-20251101");
        check("claude-sonnet-next", MatchRule::Family, "claude-sonnet-4-20250514");
        check("gemini-exp-pro", MatchRule::Family, "gemini-1.5-pro");
    }

    #[test]
    fn test_defaults() {
        check("claude-instant-1", MatchRule::ProviderDefault, "claude-opus-4-20250514");
        check("gpt-5-experimental", MatchRule::ProviderDefault, "gpt-4");

        let m = resolve("mistral-large");
        assert_eq!(m.rule, MatchRule::GlobalDefault);
        assert_eq!(m.pricing.provider, Provider::Unknown);
        assert!(m.pricing.input_per_mtok > 0.0);
        assert!(m.key.is_none());
    }
}
