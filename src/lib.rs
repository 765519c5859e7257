//! # council-core
//!
//! Multi-agent IoT risk assessment orchestration: a directed agent graph
//! over heterogeneous LLM providers that generates, aggregates, critiques,
//! and iteratively revises dual-factor risk assessments until convergence
//! or escalation to human review.
//!
//! ## Core Components
//!
//! - **llm**: Provider clients behind one capability, with a factory that
//!   applies transparent fallback and tracks heterogeneity
//! - **agents**: Generator ensemble, aggregator, the three challengers,
//!   verifier/router, and the escalation handler
//! - **graph**: Compiled execution of the fixed topology with parallel
//!   challenger dispatch, streaming snapshots, and cancellation
//! - **audit**: Run-scoped append-only record of every model exchange
//!
//! ## Example
//!
//! ```rust,ignore
//! use council_core::{AssessmentGraph, RunOptions};
//!
//! let graph = AssessmentGraph::from_env()?;
//! let result = graph
//!     .run("IoT smart thermostat: default admin password, no update mechanism", RunOptions::default())
//!     .await?;
//!
//! println!("{:?}: {:?}", result.status, result.state.synthesized_draft);
//! ```

pub mod agents;
pub mod artifacts;
pub mod audit;
pub mod citations;
pub mod config;
pub mod error;
pub mod graph;
pub mod knowledge;
pub mod llm;
pub mod prompts;
pub mod schema;
pub mod search;

// Re-exports for convenience
pub use agents::{
    escalation_triggers, route, Aggregator, ChallengerA, ChallengerB, ChallengerC,
    EscalationHandler, EscalationTrigger, GeneratorEnsemble, Route, RunContext, Verifier,
};
pub use artifacts::{
    save_escalation, save_factory_audit, save_run_result, EscalationDocument, Priority,
    RunDocument,
};
pub use audit::{AuditRecorder, ConversationRecord};
pub use citations::CitationExtractor;
pub use config::{AgentModel, ProviderCredentials, WorkflowConfig};
pub use error::{Error, Result};
pub use graph::{
    AssessmentGraph, EscalationInfo, RunOptions, RunResult, StateSnapshot, TerminalStatus,
    WorkflowState,
};
pub use knowledge::KnowledgeBase;
pub use llm::{
    FallbackEvent, GeneratorSpec, HeterogeneityReport, LlmClient, LlmFactory, Provider,
    ResolvedClient,
};
pub use schema::{
    ChallengerId, Critique, ReasoningTrace, Recommendation, RiskAssessment, RiskBreakdown,
    RiskClassification,
};
pub use search::{SearchClient, SearchResult, TavilySearchClient};
