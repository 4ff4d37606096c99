//! Provider families.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Model vendor, detected from the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    #[default]
    Unknown,
}

impl Provider {
    /// Detect the provider family from a model identifier.
    ///
    /// Matches on well-known prefixes; Bedrock/Vertex-style ids such as
    /// `anthropic.claude-3-5-sonnet` are recognised by their vendor segment.
    pub fn detect(model: &str) -> Self {
        let model = model.trim().to_ascii_lowercase();
        let bare = model.rsplit('/').next().unwrap_or(&model);

        if bare.starts_with("claude") || model.contains("anthropic") || bare.contains(".claude") {
            Provider::Anthropic
        } else if bare.starts_with("gpt")
            || bare.starts_with("chatgpt")
            || bare.starts_with("o1")
            || bare.starts_with("o3")
            || bare.starts_with("o4")
            || model.starts_with("openai")
        {
            Provider::OpenAi
        } else if bare.starts_with("gemini") || model.contains("google") {
            Provider::Gemini
        } else {
            Provider::Unknown
        }
    }

    /// Parse a provider name as it appears in catalog payloads.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAi),
            "gemini" | "google" => Some(Provider::Gemini),
            "unknown" => Some(Provider::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(Provider::detect("claude-3-5-sonnet-20241022"), Provider::Anthropic);
        assert_eq!(
            Provider::detect("anthropic.claude-3-5-sonnet-20241022-v2:0"),
            Provider::Anthropic
        );
        assert_eq!(Provider::detect("gpt-4o-mini"), Provider::OpenAi);
        assert_eq!(Provider::detect("o1-mini"), Provider::OpenAi);
        assert_eq!(Provider::detect("openai/gpt-4.1"), Provider::OpenAi);
        assert_eq!(Provider::detect("gemini-2.0-flash"), Provider::Gemini);
        assert_eq!(Provider::detect("llama-3-70b"), Provider::Unknown);
    }

    #[test]
    fn test_parse_roundtrip_names() {
        for provider in [
            Provider::Anthropic,
            Provider::OpenAi,
            Provider::Gemini,
            Provider::Unknown,
        ] {
            assert_eq!(Provider::parse(provider.as_str()), Some(provider));
        }
        assert_eq!(Provider::parse("cohere"), None);
        assert_eq!(
            serde_json::to_string(&Provider::OpenAi).unwrap(),
            "\"openai\""
        );
    }
}
