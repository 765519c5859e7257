//! Multi-provider LLM dispatch with transparent fallback.
//!
//! Six provider families sit behind the narrow [`LlmClient`] capability;
//! [`LlmFactory`] resolves `(provider, model)` requests, applies declared
//! and universal fallbacks, and keeps the instantiation audit that the
//! heterogeneity report is derived from.

mod client;
mod factory;
mod types;

pub use client::{AnthropicClient, ClientConfig, GoogleClient, LlmClient, OpenAiCompatClient};
pub use factory::{
    ClientConstructor, ClientRequest, FactoryAuditExport, FallbackEvent, HeterogeneityReport,
    HttpClientConstructor, InstantiationRecord, LlmFactory, ResolvedClient,
};
pub use types::{GeneratorSpec, Provider};

#[cfg(test)]
pub use client::ScriptedClient;
#[cfg(test)]
pub use factory::ScriptedConstructor;
