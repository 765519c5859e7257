//! Agent nodes of the assessment graph.
//!
//! Every node shares the same discipline: read the current state, do its
//! work with a per-call deadline, record the exchange in the run audit,
//! and return a partial state update. Errors are contained inside the node
//! via degenerate substitutions; they never abort the graph.

mod aggregator;
mod challenger_a;
mod challenger_b;
mod challenger_c;
mod escalation;
mod generator;
mod parse;
mod verifier;

pub use aggregator::Aggregator;
pub use challenger_a::ChallengerA;
pub use challenger_b::{decide_from_verification, ChallengerB, CitationVerification};
pub use challenger_c::ChallengerC;
pub use escalation::EscalationHandler;
pub use generator::GeneratorEnsemble;
pub use parse::{extract_json_block, parse_assessment, parse_critique};
pub use verifier::{
    current_round, escalation_triggers, round_approved, route, EscalationTrigger, Route, Verifier,
};

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::audit::AuditRecorder;
use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::schema::{Critique, RiskAssessment};

/// Per-run context passed explicitly into every node.
#[derive(Clone)]
pub struct RunContext {
    pub audit: AuditRecorder,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            audit: AuditRecorder::new(),
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke a client with the configured per-request deadline.
pub(crate) async fn invoke_with_deadline(
    client: &dyn LlmClient,
    prompt: &str,
    deadline: Duration,
) -> Result<String> {
    match tokio::time::timeout(deadline, client.invoke(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(deadline.as_millis() as u64)),
    }
}

/// Render an assessment into the plain-text block the prompts expect.
pub(crate) fn format_assessment(assessment: &RiskAssessment) -> String {
    let reasoning = &assessment.reasoning;
    let mut text = format!(
        "Model: {}\nScore: {}\nSummary: {}\nArguments: {}\nCitations: {}\nVulnerabilities: {}",
        assessment.model_name,
        assessment.legacy_score,
        reasoning.summary,
        reasoning.key_arguments.join(", "),
        reasoning.regulatory_citations.join(", "),
        reasoning.vulnerabilities.join(", "),
    );
    if let Some(breakdown) = &assessment.breakdown {
        text.push_str(&format!(
            "\nRisk Assessment: Frequency={}/5 ({}), Impact={}/5 ({}), Final={}/25, Classification={}",
            breakdown.frequency_score,
            breakdown.frequency_rationale,
            breakdown.impact_score,
            breakdown.impact_rationale,
            breakdown.final_risk_score,
            breakdown.classification,
        ));
    }
    text
}

/// Render a critique list into the plain-text block the prompts expect.
pub(crate) fn format_critiques(critiques: &[Critique]) -> String {
    critiques
        .iter()
        .map(|c| {
            format!(
                "Challenger: {}\nValid: {}\nIssues: {}\nConfidence: {}\nRecommendation: {:?}",
                c.challenger_id,
                c.is_valid,
                c.issues.join(", "),
                c.confidence,
                c.recommendation,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
