//! Configuration and credential management.
//!
//! Everything here has a usable `Default`; `from_env` overlays the
//! recognized environment variables on top of it. OpenAI credentials are
//! the only hard requirement (the universal fallback depends on them), all
//! other provider families are optional.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::{GeneratorSpec, Provider};

/// API keys per provider family, read from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub google: Option<String>,
    pub deepseek: Option<String>,
    pub groq: Option<String>,
    pub mistral: Option<String>,
    /// Alternate base URL for the DeepSeek OpenAI-compatible endpoint.
    pub deepseek_base_url: Option<String>,
    /// Key for the search backend used by citation verification.
    pub tavily: Option<String>,
}

impl ProviderCredentials {
    /// Read credentials from the standard environment variables.
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        Self {
            openai: var(Provider::OpenAi.credential_var()),
            anthropic: var(Provider::Anthropic.credential_var()),
            google: var(Provider::Google.credential_var()),
            deepseek: var(Provider::DeepSeek.credential_var()),
            groq: var(Provider::Groq.credential_var()),
            mistral: var(Provider::Mistral.credential_var()),
            deepseek_base_url: var("DEEPSEEK_BASE_URL"),
            tavily: var("TAVILY_API_KEY"),
        }
    }

    /// Credential for one provider family, if configured.
    pub fn key_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
            Provider::Google => self.google.as_deref(),
            Provider::DeepSeek => self.deepseek.as_deref(),
            Provider::Groq => self.groq.as_deref(),
            Provider::Mistral => self.mistral.as_deref(),
        }
    }

    /// Whether a provider family can be instantiated.
    pub fn is_available(&self, provider: Provider) -> bool {
        self.key_for(provider).is_some()
    }

    pub fn with_key(mut self, provider: Provider, key: impl Into<String>) -> Self {
        let key = Some(key.into());
        match provider {
            Provider::OpenAi => self.openai = key,
            Provider::Anthropic => self.anthropic = key,
            Provider::Google => self.google = key,
            Provider::DeepSeek => self.deepseek = key,
            Provider::Groq => self.groq = key,
            Provider::Mistral => self.mistral = key,
        }
        self
    }
}

/// A single-agent model selection with its declared fallback.
#[derive(Debug, Clone)]
pub struct AgentModel {
    pub provider: Provider,
    pub model: String,
    pub fallback_provider: Option<Provider>,
    pub fallback_model: Option<String>,
}

impl AgentModel {
    fn new(provider: Provider, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            fallback_provider: None,
            fallback_model: None,
        }
    }

    fn with_fallback(mut self, provider: Provider, model: &str) -> Self {
        self.fallback_provider = Some(provider);
        self.fallback_model = Some(model.to_string());
        self
    }
}

/// Workflow configuration surface.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Upper bound on revision cycles.
    pub max_revisions: u32,
    /// Per-LLM-call deadline.
    pub llm_request_timeout: Duration,
    /// Sampling temperature for the generator ensemble.
    pub generator_temperature: f64,
    /// Sampling temperature for the challengers.
    pub challenger_temperature: f64,
    /// Sampling temperature for the aggregator.
    pub aggregator_temperature: f64,
    /// Sampling temperature for the verifier.
    pub verifier_temperature: f64,
    /// Emit an operator notice on each fallback event.
    pub log_fallback_events: bool,
    /// Emit the heterogeneity report at run start/end.
    pub report_heterogeneity_status: bool,
    /// Ordered generator ensemble specification.
    pub generator_specs: Vec<GeneratorSpec>,
    /// Aggregator model selection.
    pub aggregator: AgentModel,
    /// Challenger A (logic) model selection.
    pub challenger_a: AgentModel,
    /// Challenger B (sources) model selection.
    pub challenger_b: AgentModel,
    /// Challenger C (compliance) model selection.
    pub challenger_c: AgentModel,
    /// Verifier model selection.
    pub verifier: AgentModel,
    /// Directory for run and escalation artifacts.
    pub output_dir: PathBuf,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_revisions: 3,
            llm_request_timeout: Duration::from_secs(60),
            generator_temperature: 0.0,
            challenger_temperature: 0.2,
            aggregator_temperature: 0.0,
            verifier_temperature: 0.0,
            log_fallback_events: true,
            report_heterogeneity_status: true,
            generator_specs: default_generator_specs(),
            aggregator: AgentModel::new(Provider::Anthropic, "claude-3-5-sonnet-latest")
                .with_fallback(Provider::OpenAi, "gpt-4o"),
            challenger_a: AgentModel::new(Provider::OpenAi, "gpt-4o"),
            challenger_b: AgentModel::new(Provider::DeepSeek, "deepseek-chat")
                .with_fallback(Provider::OpenAi, "gpt-4o"),
            challenger_c: AgentModel::new(Provider::OpenAi, "gpt-4o"),
            verifier: AgentModel::new(Provider::Anthropic, "claude-3-5-sonnet-latest")
                .with_fallback(Provider::OpenAi, "gpt-4o"),
            output_dir: PathBuf::from("results"),
        }
    }
}

impl WorkflowConfig {
    /// Overlay recognized environment variables on the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = read_env("MAX_REVISIONS")? {
            config.max_revisions = value
                .parse()
                .map_err(|_| Error::Config(format!("invalid MAX_REVISIONS: {value}")))?;
        }
        if let Some(value) = read_env("LLM_REQUEST_TIMEOUT")? {
            let secs: u64 = value
                .parse()
                .map_err(|_| Error::Config(format!("invalid LLM_REQUEST_TIMEOUT: {value}")))?;
            config.llm_request_timeout = Duration::from_secs(secs);
        }
        for (name, slot) in [
            ("GENERATOR_TEMPERATURE", &mut config.generator_temperature),
            ("CHALLENGER_TEMPERATURE", &mut config.challenger_temperature),
            ("AGGREGATOR_TEMPERATURE", &mut config.aggregator_temperature),
            ("VERIFIER_TEMPERATURE", &mut config.verifier_temperature),
        ] {
            if let Some(value) = read_env(name)? {
                *slot = value
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid {name}: {value}")))?;
            }
        }
        if let Some(value) = read_env("LOG_FALLBACK_EVENTS")? {
            config.log_fallback_events = parse_bool("LOG_FALLBACK_EVENTS", &value)?;
        }
        if let Some(value) = read_env("REPORT_HETEROGENEITY_STATUS")? {
            config.report_heterogeneity_status = parse_bool("REPORT_HETEROGENEITY_STATUS", &value)?;
        }
        if let Some(value) = read_env("GENERATOR_MODELS_WITH_PROVIDERS")? {
            config.generator_specs = parse_generator_specs(&value)?;
        }
        if let Some(value) = read_env("OUTPUT_DIR")? {
            config.output_dir = PathBuf::from(value);
        }

        Ok(config)
    }

    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn with_generator_specs(mut self, specs: Vec<GeneratorSpec>) -> Self {
        self.generator_specs = specs;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

/// Reference ensemble: 9 generators across the 6 provider families.
///
/// Non-OpenAI entries declare an OpenAI fallback so a partially-credentialed
/// deployment still fills every slot (transparently, via fallback events).
fn default_generator_specs() -> Vec<GeneratorSpec> {
    vec![
        GeneratorSpec::new(Provider::OpenAi, "gpt-4o"),
        GeneratorSpec::new(Provider::OpenAi, "gpt-4o-mini"),
        GeneratorSpec::new(Provider::Anthropic, "claude-3-5-sonnet-latest")
            .with_fallback(Provider::OpenAi, "gpt-4o"),
        GeneratorSpec::new(Provider::Anthropic, "claude-3-opus-20240229")
            .with_fallback(Provider::OpenAi, "gpt-4o"),
        GeneratorSpec::new(Provider::Google, "gemini-1.5-pro")
            .with_fallback(Provider::OpenAi, "gpt-4o"),
        GeneratorSpec::new(Provider::DeepSeek, "deepseek-chat")
            .with_fallback(Provider::OpenAi, "gpt-4o"),
        GeneratorSpec::new(Provider::Groq, "llama-3.3-70b-versatile")
            .with_fallback(Provider::OpenAi, "gpt-4o-mini"),
        GeneratorSpec::new(Provider::Mistral, "mistral-large-latest")
            .with_fallback(Provider::OpenAi, "gpt-4o"),
        GeneratorSpec::new(Provider::OpenAi, "o1-mini"),
    ]
}

fn parse_generator_specs(value: &str) -> Result<Vec<GeneratorSpec>> {
    let specs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(GeneratorSpec::parse)
        .collect::<Result<Vec<_>>>()?;
    if specs.is_empty() {
        return Err(Error::Config(
            "GENERATOR_MODELS_WITH_PROVIDERS resolved to an empty ensemble".to_string(),
        ));
    }
    Ok(specs)
}

fn read_env(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
        Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::Config(format!("cannot read {name}: {e}"))),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("invalid {name}: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_reference_configuration() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_revisions, 3);
        assert_eq!(config.llm_request_timeout, Duration::from_secs(60));
        assert_eq!(config.generator_temperature, 0.0);
        assert_eq!(config.challenger_temperature, 0.2);
        assert_eq!(config.generator_specs.len(), 9);
        assert!(config.log_fallback_events);
        assert_eq!(config.output_dir, PathBuf::from("results"));

        // Ensemble spans all six families.
        let families: std::collections::BTreeSet<_> = config
            .generator_specs
            .iter()
            .map(|spec| spec.provider)
            .collect();
        assert_eq!(families.len(), 6);
    }

    #[test]
    fn ensemble_spec_list_parses() {
        let specs = parse_generator_specs(
            "openai/gpt-4o, anthropic/claude-3-5-sonnet-latest|openai/gpt-4o",
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].fallback_model.as_deref(), Some("gpt-4o"));

        assert!(parse_generator_specs("  ,  ").is_err());
    }

    #[test]
    fn credentials_availability() {
        let creds = ProviderCredentials::default().with_key(Provider::OpenAi, "sk-test");
        assert!(creds.is_available(Provider::OpenAi));
        assert!(!creds.is_available(Provider::Anthropic));
        assert_eq!(creds.key_for(Provider::OpenAi), Some("sk-test"));
    }

    #[test]
    fn bool_parsing_accepts_common_forms() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
