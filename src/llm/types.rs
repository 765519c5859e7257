//! Provider identities and model selection types.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// LLM provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    Groq,
    Mistral,
}

impl Provider {
    /// All supported provider families.
    pub const ALL: [Provider; 6] = [
        Self::OpenAi,
        Self::Anthropic,
        Self::Google,
        Self::DeepSeek,
        Self::Groq,
        Self::Mistral,
    ];

    /// Environment variable holding this provider's API key.
    pub fn credential_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Google => write!(f, "google"),
            Self::DeepSeek => write!(f, "deepseek"),
            Self::Groq => write!(f, "groq"),
            Self::Mistral => write!(f, "mistral"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" => Ok(Self::Google),
            "deepseek" => Ok(Self::DeepSeek),
            "groq" => Ok(Self::Groq),
            "mistral" => Ok(Self::Mistral),
            other => Err(Error::Config(format!("unknown provider: {other}"))),
        }
    }
}

/// One entry of the generator ensemble configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub provider: Provider,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
}

impl GeneratorSpec {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            fallback_provider: None,
            fallback_model: None,
        }
    }

    pub fn with_fallback(mut self, provider: Provider, model: impl Into<String>) -> Self {
        self.fallback_provider = Some(provider);
        self.fallback_model = Some(model.into());
        self
    }

    /// `provider/model` label for logs and audit records.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }

    /// Parse `provider/model` with an optional `|fallback_provider/fallback_model`.
    pub fn parse(entry: &str) -> crate::error::Result<Self> {
        fn split_pair(s: &str) -> crate::error::Result<(Provider, String)> {
            let (provider, model) = s
                .split_once('/')
                .ok_or_else(|| Error::Config(format!("expected provider/model, got: {s}")))?;
            Ok((provider.parse()?, model.trim().to_string()))
        }

        let (primary, fallback) = match entry.split_once('|') {
            Some((p, f)) => (p, Some(f)),
            None => (entry, None),
        };

        let (provider, model) = split_pair(primary.trim())?;
        let mut spec = Self::new(provider, model);
        if let Some(fallback) = fallback {
            let (fb_provider, fb_model) = split_pair(fallback.trim())?;
            spec = spec.with_fallback(fb_provider, fb_model);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn provider_display_round_trips() {
        for provider in Provider::ALL {
            let parsed: Provider = provider.to_string().parse().unwrap();
            assert_eq!(parsed, provider);
        }
    }

    #[test]
    fn spec_parse_with_fallback() {
        let spec = GeneratorSpec::parse("anthropic/claude-3-5-sonnet-latest|openai/gpt-4o").unwrap();
        assert_eq!(spec.provider, Provider::Anthropic);
        assert_eq!(spec.model, "claude-3-5-sonnet-latest");
        assert_eq!(spec.fallback_provider, Some(Provider::OpenAi));
        assert_eq!(spec.fallback_model.as_deref(), Some("gpt-4o"));
        assert_eq!(spec.label(), "anthropic/claude-3-5-sonnet-latest");
    }

    #[test]
    fn spec_parse_rejects_malformed_entries() {
        assert!(GeneratorSpec::parse("gpt-4o").is_err());
        assert!(GeneratorSpec::parse("acme/some-model").is_err());
    }
}
