//! Multi-provider client factory with transparent fallback.
//!
//! The epistemic value of the ensemble comes from genuine provider
//! diversity, so substitution is never silent: every instantiation is
//! logged, every fallback produces a [`FallbackEvent`], and a
//! [`HeterogeneityReport`] over intended vs. actual providers is derivable
//! at any point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

use crate::config::{AgentModel, ProviderCredentials};
use crate::error::{Error, Result};

use super::client::{AnthropicClient, ClientConfig, GoogleClient, LlmClient, OpenAiCompatClient};
use super::types::{GeneratorSpec, Provider};

/// Universal fallback model when no specific fallback is configured.
const UNIVERSAL_FALLBACK_MODEL: &str = "gpt-4o";

/// Record of a fallback substitution, kept for audit transparency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub timestamp: DateTime<Utc>,
    pub intended_provider: Provider,
    pub intended_model: String,
    pub actual_provider: Provider,
    pub actual_model: String,
    pub reason: String,
}

/// One row of the instantiation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantiationRecord {
    pub timestamp: DateTime<Utc>,
    pub context: String,
    pub intended: String,
    pub actual: String,
    pub fallback_used: bool,
}

/// Report on the provider diversity actually achieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeterogeneityReport {
    pub intended_providers: Vec<Provider>,
    pub actual_providers: Vec<Provider>,
    pub fallback_events: Vec<FallbackEvent>,
    pub heterogeneity_achieved: bool,
    /// `|actual| / |intended|`, 1.0 when every intended family is active.
    pub diversity_score: f64,
    pub message: String,
}

/// Serializable audit document for the factory.
#[derive(Debug, Clone, Serialize)]
pub struct FactoryAuditExport {
    pub generated_at: DateTime<Utc>,
    pub heterogeneity_report: HeterogeneityReport,
    pub fallback_events: Vec<FallbackEvent>,
    pub instantiation_log: Vec<InstantiationRecord>,
}

/// A client request resolved by the factory.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub provider: Provider,
    pub model: String,
    pub temperature: f64,
    pub fallback_provider: Option<Provider>,
    pub fallback_model: Option<String>,
    /// Which agent this client is for, e.g. `generator_0`, `verifier`.
    pub context_label: String,
}

impl ClientRequest {
    pub fn from_spec(spec: &GeneratorSpec, temperature: f64, context_label: impl Into<String>) -> Self {
        Self {
            provider: spec.provider,
            model: spec.model.clone(),
            temperature,
            fallback_provider: spec.fallback_provider,
            fallback_model: spec.fallback_model.clone(),
            context_label: context_label.into(),
        }
    }

    pub fn from_agent(agent: &AgentModel, temperature: f64, context_label: impl Into<String>) -> Self {
        Self {
            provider: agent.provider,
            model: agent.model.clone(),
            temperature,
            fallback_provider: agent.fallback_provider,
            fallback_model: agent.fallback_model.clone(),
            context_label: context_label.into(),
        }
    }
}

/// Outcome of a factory resolution.
#[derive(Clone)]
pub struct ResolvedClient {
    pub client: Arc<dyn LlmClient>,
    pub actual_provider: Provider,
    pub actual_model: String,
    pub was_fallback: bool,
}

impl ResolvedClient {
    /// `provider/model` label, with the fallback marker when applicable.
    pub fn display_label(&self) -> String {
        let base = format!("{}/{}", self.actual_provider, self.actual_model);
        if self.was_fallback {
            format!("{base} [FALLBACK]")
        } else {
            base
        }
    }
}

/// Seam for constructing concrete clients; tests substitute scripted ones.
pub trait ClientConstructor: Send + Sync {
    fn construct(
        &self,
        provider: Provider,
        model: &str,
        temperature: f64,
        timeout: Duration,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn LlmClient>>;
}

/// Default constructor building real HTTP clients.
pub struct HttpClientConstructor;

impl ClientConstructor for HttpClientConstructor {
    fn construct(
        &self,
        provider: Provider,
        model: &str,
        temperature: f64,
        timeout: Duration,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn LlmClient>> {
        let api_key = credentials
            .key_for(provider)
            .ok_or_else(|| Error::Config(format!("{} not configured", provider.credential_var())))?;

        let mut config = ClientConfig::new(api_key, model)
            .with_temperature(temperature)
            .with_timeout(timeout);

        Ok(match provider {
            Provider::Anthropic => Arc::new(AnthropicClient::new(config)),
            Provider::Google => Arc::new(GoogleClient::new(config)),
            Provider::DeepSeek => {
                if let Some(base_url) = &credentials.deepseek_base_url {
                    config = config.with_base_url(base_url);
                }
                Arc::new(OpenAiCompatClient::new(provider, config))
            }
            Provider::OpenAi | Provider::Groq | Provider::Mistral => {
                Arc::new(OpenAiCompatClient::new(provider, config))
            }
        })
    }
}

/// Factory resolving `(provider, model)` requests with transparent fallback.
///
/// Shared across a process via `Arc`; the fallback and instantiation logs
/// are append-only under their mutexes.
pub struct LlmFactory {
    credentials: ProviderCredentials,
    timeout: Duration,
    log_fallback_events: bool,
    constructor: Box<dyn ClientConstructor>,
    fallback_events: Mutex<Vec<FallbackEvent>>,
    instantiation_log: Mutex<Vec<InstantiationRecord>>,
}

impl LlmFactory {
    pub fn new(credentials: ProviderCredentials, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
            log_fallback_events: true,
            constructor: Box::new(HttpClientConstructor),
            fallback_events: Mutex::new(Vec::new()),
            instantiation_log: Mutex::new(Vec::new()),
        }
    }

    /// Replace the client constructor (used by tests to script clients).
    pub fn with_constructor(mut self, constructor: Box<dyn ClientConstructor>) -> Self {
        self.constructor = constructor;
        self
    }

    pub fn with_fallback_notices(mut self, enabled: bool) -> Self {
        self.log_fallback_events = enabled;
        self
    }

    /// Availability per provider family, derived from credentials.
    pub fn available_providers(&self) -> Vec<(Provider, bool)> {
        Provider::ALL
            .iter()
            .map(|&p| (p, self.credentials.is_available(p)))
            .collect()
    }

    /// Resolve a client request, applying the declared then universal
    /// fallback, and log the outcome.
    pub fn create(&self, request: &ClientRequest) -> Result<ResolvedClient> {
        // 1. Requested (provider, model).
        let mut failure_reason = None;
        if self.credentials.is_available(request.provider) {
            match self.constructor.construct(
                request.provider,
                &request.model,
                request.temperature,
                self.timeout,
                &self.credentials,
            ) {
                Ok(client) => {
                    let resolved = ResolvedClient {
                        client,
                        actual_provider: request.provider,
                        actual_model: request.model.clone(),
                        was_fallback: false,
                    };
                    self.log_instantiation(request, &resolved);
                    return Ok(resolved);
                }
                Err(e) => {
                    warn!(
                        context = %request.context_label,
                        "failed to instantiate {}/{}: {e}",
                        request.provider, request.model
                    );
                    failure_reason = Some(format!(
                        "Instantiation failed for {}/{}: {e}",
                        request.provider, request.model
                    ));
                }
            }
        }
        let reason = failure_reason
            .unwrap_or_else(|| format!("API key missing for {}", request.provider));

        // 2. Declared fallback, when given and available.
        if let (Some(fb_provider), Some(fb_model)) =
            (request.fallback_provider, request.fallback_model.as_deref())
        {
            if self.credentials.is_available(fb_provider) {
                let client = self.constructor.construct(
                    fb_provider,
                    fb_model,
                    request.temperature,
                    self.timeout,
                    &self.credentials,
                )?;
                let resolved = ResolvedClient {
                    client,
                    actual_provider: fb_provider,
                    actual_model: fb_model.to_string(),
                    was_fallback: true,
                };
                self.record_fallback(request, &resolved, &reason);
                self.log_instantiation(request, &resolved);
                return Ok(resolved);
            }
        }

        // 3. Universal fallback to OpenAI.
        if request.provider != Provider::OpenAi && self.credentials.is_available(Provider::OpenAi) {
            let client = self.constructor.construct(
                Provider::OpenAi,
                UNIVERSAL_FALLBACK_MODEL,
                request.temperature,
                self.timeout,
                &self.credentials,
            )?;
            let resolved = ResolvedClient {
                client,
                actual_provider: Provider::OpenAi,
                actual_model: UNIVERSAL_FALLBACK_MODEL.to_string(),
                was_fallback: true,
            };
            let reason =
                format!("{reason}; no usable fallback configured, using OpenAI as universal fallback");
            self.record_fallback(request, &resolved, &reason);
            self.log_instantiation(request, &resolved);
            return Ok(resolved);
        }

        Err(Error::no_provider(&request.context_label, reason))
    }

    fn record_fallback(&self, request: &ClientRequest, resolved: &ResolvedClient, reason: &str) {
        if self.log_fallback_events {
            warn!(
                context = %request.context_label,
                "FALLBACK: {}/{} -> {}/{} ({reason})",
                request.provider, request.model, resolved.actual_provider, resolved.actual_model
            );
        }
        lock(&self.fallback_events).push(FallbackEvent {
            timestamp: Utc::now(),
            intended_provider: request.provider,
            intended_model: request.model.clone(),
            actual_provider: resolved.actual_provider,
            actual_model: resolved.actual_model.clone(),
            reason: reason.to_string(),
        });
    }

    fn log_instantiation(&self, request: &ClientRequest, resolved: &ResolvedClient) {
        lock(&self.instantiation_log).push(InstantiationRecord {
            timestamp: Utc::now(),
            context: request.context_label.clone(),
            intended: format!("{}/{}", request.provider, request.model),
            actual: format!("{}/{}", resolved.actual_provider, resolved.actual_model),
            fallback_used: resolved.was_fallback,
        });
    }

    /// All fallback events recorded so far.
    pub fn fallback_events(&self) -> Vec<FallbackEvent> {
        lock(&self.fallback_events).clone()
    }

    /// Full instantiation log recorded so far.
    pub fn instantiation_log(&self) -> Vec<InstantiationRecord> {
        lock(&self.instantiation_log).clone()
    }

    /// Derive the heterogeneity report from the instantiation log.
    pub fn heterogeneity_report(&self) -> HeterogeneityReport {
        let log = lock(&self.instantiation_log).clone();
        let fallback_events = lock(&self.fallback_events).clone();

        if log.is_empty() {
            return HeterogeneityReport {
                intended_providers: Vec::new(),
                actual_providers: Vec::new(),
                fallback_events,
                heterogeneity_achieved: false,
                diversity_score: 0.0,
                message: "No models instantiated yet".to_string(),
            };
        }

        fn provider_of(label: &str) -> Option<Provider> {
            label.split('/').next()?.parse().ok()
        }

        let intended: BTreeSet<Provider> =
            log.iter().filter_map(|r| provider_of(&r.intended)).collect();
        let actual: BTreeSet<Provider> = log.iter().filter_map(|r| provider_of(&r.actual)).collect();

        let diversity_score = actual.len() as f64 / intended.len().max(1) as f64;
        let heterogeneity_achieved = actual.len() >= 2;

        let message = if actual.len() == 1 {
            let only = actual.iter().next().map(Provider::to_string).unwrap_or_default();
            format!("NO HETEROGENEITY: all models using {only} only")
        } else if actual.len() == intended.len() {
            format!("FULL HETEROGENEITY: all {} intended providers active", actual.len())
        } else {
            format!(
                "PARTIAL HETEROGENEITY: {}/{} providers active",
                actual.len(),
                intended.len()
            )
        };

        HeterogeneityReport {
            intended_providers: intended.into_iter().collect(),
            actual_providers: actual.into_iter().collect(),
            fallback_events,
            heterogeneity_achieved,
            diversity_score,
            message,
        }
    }

    /// Serializable audit document: report, fallback events, and the log.
    pub fn export_audit(&self) -> FactoryAuditExport {
        FactoryAuditExport {
            generated_at: Utc::now(),
            heterogeneity_report: self.heterogeneity_report(),
            fallback_events: self.fallback_events(),
            instantiation_log: self.instantiation_log(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Constructor producing scripted clients for tests.
#[cfg(test)]
pub struct ScriptedConstructor {
    #[allow(clippy::type_complexity)]
    pub build: Box<dyn Fn(Provider, &str) -> Result<Arc<dyn LlmClient>> + Send + Sync>,
}

#[cfg(test)]
impl ScriptedConstructor {
    pub fn new(
        build: impl Fn(Provider, &str) -> Result<Arc<dyn LlmClient>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
        }
    }
}

#[cfg(test)]
impl ClientConstructor for ScriptedConstructor {
    fn construct(
        &self,
        provider: Provider,
        model: &str,
        _temperature: f64,
        _timeout: Duration,
        _credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn LlmClient>> {
        (self.build)(provider, model)
    }
}
