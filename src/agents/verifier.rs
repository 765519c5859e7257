//! Verifier and the deterministic convergence router.
//!
//! The verifier may consult a model for a natural-language read on the
//! round (recorded for audit, tolerated on failure), but the routing
//! decision is made purely from the state by [`route`], in this order:
//! approve at a 2/3 quorum, else escalate on any trigger, else revise
//! while under the cap and blocked, else end degraded.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::config::AgentModel;
use crate::graph::{StatePatch, WorkflowState};
use crate::knowledge::{reference_sources, KnowledgeBase};
use crate::llm::{ClientRequest, LlmFactory};
use crate::prompts::{fill, VERIFIER_PROMPT};
use crate::schema::{Critique, RiskClassification};

use super::{format_assessment, format_critiques, invoke_with_deadline, RunContext};

/// Routing decision after a challenger round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Revise,
    Escalate,
    End,
}

/// Condition that forces escalation to human review.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationTrigger {
    MaxRevisionsWithoutConsensus {
        revision_count: u32,
        passed: usize,
        total: usize,
    },
    CriticalClassification {
        final_risk_score: u8,
    },
    UnanimousReject,
}

impl std::fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxRevisionsWithoutConsensus {
                revision_count,
                passed,
                total,
            } => write!(
                f,
                "Max revisions ({revision_count}) reached without 2/3 challenger consensus. Only {passed}/{total} challengers approved."
            ),
            Self::CriticalClassification { final_risk_score } => write!(
                f,
                "Critical risk classification ({final_risk_score}/25) requires human validation"
            ),
            Self::UnanimousReject => write!(
                f,
                "All challengers rejected the assessment. Human review required to resolve conflicts."
            ),
        }
    }
}

/// The current critique round: the last three entries.
///
/// Sound under the fixed three-challenger panel; a variable-size panel
/// would need explicit round tagging instead of this slice.
pub fn current_round(critiques: &[Critique]) -> &[Critique] {
    &critiques[critiques.len().saturating_sub(3)..]
}

fn quorum(round: &[Critique]) -> (usize, usize) {
    let passed = round.iter().filter(|c| c.passed()).count();
    (passed, round.len())
}

/// Whether the round reached the 2/3 approval quorum.
pub fn round_approved(round: &[Critique]) -> bool {
    let (passed, total) = quorum(round);
    total > 0 && passed * 3 >= total * 2
}

/// Every escalation trigger that holds on the state.
///
/// All triggered reasons are reported; the artifact records each of them.
pub fn escalation_triggers(state: &WorkflowState, max_revisions: u32) -> Vec<EscalationTrigger> {
    let mut triggers = Vec::new();
    let round = current_round(&state.critiques);
    let (passed, total) = quorum(round);

    if state.revision_count >= max_revisions && total > 0 && passed * 3 < total * 2 {
        triggers.push(EscalationTrigger::MaxRevisionsWithoutConsensus {
            revision_count: state.revision_count,
            passed,
            total,
        });
    }

    if let Some(breakdown) = state
        .synthesized_draft
        .as_ref()
        .and_then(|draft| draft.breakdown.as_ref())
    {
        if breakdown.classification == RiskClassification::Critical {
            triggers.push(EscalationTrigger::CriticalClassification {
                final_risk_score: breakdown.final_risk_score,
            });
        }
    }

    if total > 0 && round.iter().all(Critique::blocking) {
        triggers.push(EscalationTrigger::UnanimousReject);
    }

    triggers
}

/// Deterministic routing decision over the current state.
pub fn route(state: &WorkflowState, max_revisions: u32) -> Route {
    let round = current_round(&state.critiques);

    if round_approved(round) {
        return Route::End;
    }
    if !escalation_triggers(state, max_revisions).is_empty() {
        return Route::Escalate;
    }
    if state.revision_count < max_revisions && round.iter().any(|c| c.blocking()) {
        return Route::Revise;
    }
    Route::End
}

/// Verifier node: records an advisory model consult, then routes.
pub struct Verifier {
    factory: Arc<LlmFactory>,
    agent: AgentModel,
    temperature: f64,
    deadline: Duration,
    kb: Option<Arc<dyn KnowledgeBase>>,
    max_revisions: u32,
}

impl Verifier {
    pub fn new(
        factory: Arc<LlmFactory>,
        agent: AgentModel,
        temperature: f64,
        deadline: Duration,
        kb: Option<Arc<dyn KnowledgeBase>>,
        max_revisions: u32,
    ) -> Self {
        Self {
            factory,
            agent,
            temperature,
            deadline,
            kb,
            max_revisions,
        }
    }

    #[instrument(skip_all, fields(revision = state.revision_count))]
    pub async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> (StatePatch, Route) {
        self.consult(state, ctx).await;

        let route = route(state, self.max_revisions);
        let mut patch = StatePatch::default();
        if route == Route::Revise {
            patch.revision_count = Some(state.revision_count + 1);
        }
        (patch, route)
    }

    /// Advisory natural-language consult; never affects routing.
    async fn consult(&self, state: &WorkflowState, ctx: &RunContext) {
        let Some(draft) = &state.synthesized_draft else {
            ctx.audit.record_error(
                "verifier",
                "verifier",
                "-",
                "",
                "no synthesized draft to verify",
                state.revision_count,
            );
            return;
        };

        let sources = reference_sources(self.kb.as_deref(), &state.risk_input).await;
        let round = current_round(&state.critiques);
        let prompt = fill(
            VERIFIER_PROMPT,
            &[
                ("reference_sources", sources.as_str()),
                ("assessment", format_assessment(draft).as_str()),
                ("critiques", format_critiques(round).as_str()),
            ],
        );

        let intended = format!("{}/{}", self.agent.provider, self.agent.model);
        let resolved = match self.factory.create(&ClientRequest::from_agent(
            &self.agent,
            self.temperature,
            "verifier",
        )) {
            Ok(resolved) => resolved,
            Err(e) => {
                ctx.audit.record_error(
                    "verifier",
                    "verifier",
                    &intended,
                    &prompt,
                    &e.to_string(),
                    state.revision_count,
                );
                return;
            }
        };

        match invoke_with_deadline(resolved.client.as_ref(), &prompt, self.deadline).await {
            Ok(response) => {
                let mut extra = BTreeMap::new();
                extra.insert("intended_model".to_string(), json!(intended));
                extra.insert("fallback_used".to_string(), json!(resolved.was_fallback));
                ctx.audit.record(
                    "verifier",
                    "verifier",
                    &resolved.display_label(),
                    &prompt,
                    &response,
                    state.revision_count,
                    extra,
                );
            }
            Err(e) => {
                ctx.audit.record_error(
                    "verifier",
                    "verifier",
                    &resolved.display_label(),
                    &prompt,
                    &e.to_string(),
                    state.revision_count,
                );
            }
        }
    }
}
