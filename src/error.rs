//! Error types for council-core.

use thiserror::Error;

/// Result type alias using council-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running an assessment workflow.
#[derive(Error, Debug)]
pub enum Error {
    /// No provider in the fallback chain could be instantiated
    #[error("no LLM provider available for {context}: {reason}")]
    NoProviderAvailable { context: String, reason: String },

    /// LLM API error (transport, HTTP status, or provider-reported)
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Response could not be parsed into the expected JSON shape
    #[error("parse error: {0}")]
    Parse(String),

    /// Search backend error
    #[error("search error: {0}")]
    Search(String),

    /// Knowledge base retrieval error
    #[error("knowledge base error: {0}")]
    Knowledge(String),

    /// Deadline exceeded on an LLM or search call
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Run was cancelled via the cancellation token
    #[error("run cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Artifact I/O error
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a no-provider-available error.
    pub fn no_provider(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoProviderAvailable {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}
