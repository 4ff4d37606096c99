//! Approximate token counting.
//!
//! These are character-per-token heuristics for when no tokenizer is at
//! hand. They are good enough for cost estimates and cache-threshold checks,
//! not for enforcing context limits.

use crate::catalog::Provider;

/// Average characters per token for a provider family.
pub fn chars_per_token(provider: Provider) -> f64 {
    match provider {
        Provider::Anthropic => 3.5,
        Provider::OpenAi | Provider::Gemini => 4.0,
        Provider::Unknown => 3.5,
    }
}

/// Approximate token count of `text` for `model`. Scales linearly with length.
pub fn estimate_tokens(text: &str, model: &str) -> u64 {
    let chars = text.chars().count() as f64;
    (chars / chars_per_token(Provider::detect(model))).ceil() as u64
}
