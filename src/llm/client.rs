//! LLM client trait and provider implementations.
//!
//! The workflow consumes a deliberately narrow capability: one prompt in,
//! one text completion out. Each provider family lives behind [`LlmClient`];
//! DeepSeek, Groq, and Mistral all speak the OpenAI chat-completions wire
//! format and share [`OpenAiCompatClient`] with family-specific base URLs.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::Provider;

/// Capability consumed by every agent node.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt and return the completion text.
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Provider family actually serving this client.
    fn provider(&self) -> Provider;

    /// Model identifier actually serving this client.
    fn model(&self) -> &str;
}

/// Configuration for a single provider client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Base URL override
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.0,
            base_url: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn build_http_client(timeout: Duration) -> Client {
    // Proxy auto-detection can fail in sandboxed environments; fall back to
    // an explicit no-proxy client in that case.
    match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client"),
    }
}

/// Client for OpenAI-compatible chat-completions endpoints.
///
/// Serves the `openai`, `deepseek`, `groq`, and `mistral` families.
pub struct OpenAiCompatClient {
    provider: Provider,
    config: ClientConfig,
    http: Client,
}

impl OpenAiCompatClient {
    /// Default base URL for an OpenAI-compatible provider family.
    pub fn default_base_url(provider: Provider) -> &'static str {
        match provider {
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Mistral => "https://api.mistral.ai/v1",
            _ => "https://api.openai.com/v1",
        }
    }

    pub fn new(provider: Provider, config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout);
        Self {
            provider,
            config,
            http,
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or_else(|| Self::default_base_url(self.provider))
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatRequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatRequestMessage,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    error: ChatErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
    message: String,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let api_request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatRequestMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.config.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url());
        let provider = self.provider.to_string();

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_api(&provider, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api(&provider, format!("failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ChatError>(&body) {
                return Err(Error::llm_api(&provider, error.error.message));
            }
            return Err(Error::llm_api(&provider, format!("{status}: {body}")));
        }

        let api_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_api(&provider, format!("failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm_api(&provider, "no choices in response"))?;

        Ok(choice.message.content)
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Anthropic Claude client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";
    const MAX_TOKENS: u32 = 4096;

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let api_request = AnthropicRequest {
            model: self.config.model.clone(),
            messages: vec![ChatRequestMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: Self::MAX_TOKENS,
            temperature: self.config.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(Error::llm_api(
                    "anthropic",
                    format!("{}: {}", error.error.error_type, error.error.message),
                ));
            }
            return Err(Error::llm_api("anthropic", format!("{status}: {body}")));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_api("anthropic", format!("failed to parse response: {e}")))?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(content)
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Google Gemini client.
pub struct GoogleClient {
    config: ClientConfig,
    http: Client,
}

impl GoogleClient {
    const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// Google Gemini API types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmClient for GoogleClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let api_request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url(),
            self.config.model,
            self.config.api_key
        );

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_api("google", format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api("google", format!("failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                return Err(Error::llm_api("google", error.error.message));
            }
            return Err(Error::llm_api("google", format!("{status}: {body}")));
        }

        let api_response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_api("google", format!("failed to parse response: {e}")))?;

        let candidate = api_response
            .candidates
            .first()
            .ok_or_else(|| Error::llm_api("google", "no candidates in response"))?;

        let content = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(content)
    }

    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// A scripted client for testing.
#[cfg(test)]
pub struct ScriptedClient {
    provider: Provider,
    model: String,
    respond: Box<dyn Fn(&str) -> Result<String> + Send + Sync>,
}

#[cfg(test)]
impl ScriptedClient {
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            respond: Box::new(respond),
        }
    }

    /// A client that always returns the same text.
    pub fn always(provider: Provider, model: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(provider, model, move |_| Ok(text.clone()))
    }

    /// A client that always fails with a transport-shaped error.
    pub fn failing(provider: Provider, model: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(provider, model, move |_| {
            Err(Error::llm_api(provider.to_string(), message.clone()))
        })
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for ScriptedClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        (self.respond)(prompt)
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }
}
