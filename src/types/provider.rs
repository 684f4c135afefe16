//! Upstream AI providers reachable through the proxy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Provider named in a device token payload and sent as the `x-provider` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    Mistral,
    Groq,
    DeepSeek,
    /// Any provider this crate has no special handling for.
    Other(String),
}

impl Provider {
    /// Lowercase wire name, as used in URLs and headers.
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Mistral => "mistral",
            Provider::Groq => "groq",
            Provider::DeepSeek => "deepseek",
            Provider::Other(name) => name,
        }
    }

    /// Whether requests must carry the `anthropic-version` header.
    pub fn requires_version_header(&self) -> bool {
        matches!(self, Provider::Anthropic)
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl From<&str> for Provider {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Provider::OpenAi,
            "anthropic" => Provider::Anthropic,
            "gemini" => Provider::Gemini,
            "mistral" => Provider::Mistral,
            "groq" => Provider::Groq,
            "deepseek" => Provider::DeepSeek,
            _ => Provider::Other(value.to_string()),
        }
    }
}

impl From<String> for Provider {
    fn from(value: String) -> Self {
        Provider::from(value.as_str())
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for Provider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Provider::from(s))
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
    fn test_known_providers_round_trip_names() {
        for name in ["openai", "anthropic", "gemini", "mistral", "groq", "deepseek"] {
            assert_eq!(Provider::from(name).as_str(), name);
        }
    }

    #[test]
    fn test_case_insensitive_parse() {
        assert_eq!(Provider::from("Anthropic"), Provider::Anthropic);
    }

    #[test]
    fn test_unknown_provider_kept() {
        let provider = Provider::from("together");
        assert_eq!(provider, Provider::Other("together".into()));
        assert_eq!(provider.to_string(), "together");
        assert!(!provider.requires_version_header());
    }

    #[test]
    fn test_only_anthropic_needs_version_header() {
        assert!(Provider::Anthropic.requires_version_header());
        assert!(!Provider::OpenAi.requires_version_header());
    }

    #[test]
    fn test_serde_as_plain_string() {
        let json = serde_json::to_string(&Provider::Groq).unwrap();
        assert_eq!(json, "\"groq\"");
        let back: Provider = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(back, Provider::OpenAi);
    }
}
