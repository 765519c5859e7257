//! Challenger A: logic and calculation consistency.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::config::AgentModel;
use crate::graph::{StatePatch, WorkflowState};
use crate::knowledge::{reference_sources, KnowledgeBase};
use crate::llm::{ClientRequest, LlmFactory};
use crate::prompts::{fill, CHALLENGER_A_PROMPT};
use crate::schema::{ChallengerId, Critique, RiskAssessment};

use super::{invoke_with_deadline, parse_critique, RunContext};

/// Independent critic for internal consistency of the dual-factor
/// assessment. The acceptance tolerances live in the prompt; this node
/// only dispatches and parses.
pub struct ChallengerA {
    factory: Arc<LlmFactory>,
    agent: AgentModel,
    temperature: f64,
    deadline: Duration,
    kb: Option<Arc<dyn KnowledgeBase>>,
}

impl ChallengerA {
    pub fn new(
        factory: Arc<LlmFactory>,
        agent: AgentModel,
        temperature: f64,
        deadline: Duration,
        kb: Option<Arc<dyn KnowledgeBase>>,
    ) -> Self {
        Self {
            factory,
            agent,
            temperature,
            deadline,
            kb,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> StatePatch {
        const ID: ChallengerId = ChallengerId::A;
        let stage = ID.stage();

        let Some(draft) = &state.synthesized_draft else {
            ctx.audit.record_error(
                stage,
                "challenger",
                "-",
                "",
                "no synthesized draft available for review",
                state.revision_count,
            );
            return StatePatch::critique(Critique::missing_draft(ID));
        };

        let sources = reference_sources(self.kb.as_deref(), &state.risk_input).await;
        let prompt = fill(
            CHALLENGER_A_PROMPT,
            &[
                ("reference_sources", sources.as_str()),
                ("score", draft.legacy_score.to_string().as_str()),
                ("reasoning", reasoning_text(draft).as_str()),
                ("risk_assessment", breakdown_text(draft).as_str()),
            ],
        );

        let intended = format!("{}/{}", self.agent.provider, self.agent.model);
        let resolved = match self.factory.create(&ClientRequest::from_agent(
            &self.agent,
            self.temperature,
            stage,
        )) {
            Ok(resolved) => resolved,
            Err(e) => {
                ctx.audit.record_error(
                    stage,
                    "challenger",
                    &intended,
                    &prompt,
                    &e.to_string(),
                    state.revision_count,
                );
                return StatePatch::critique(Critique::from_error(ID, &e.to_string()));
            }
        };

        let response =
            match invoke_with_deadline(resolved.client.as_ref(), &prompt, self.deadline).await {
                Ok(response) => response,
                Err(e) => {
                    ctx.audit.record_error(
                        stage,
                        "challenger",
                        &resolved.display_label(),
                        &prompt,
                        &e.to_string(),
                        state.revision_count,
                    );
                    return StatePatch::critique(Critique::from_error(ID, &e.to_string()));
                }
            };

        ctx.audit.record(
            stage,
            "challenger",
            &resolved.display_label(),
            &prompt,
            &response,
            state.revision_count,
            BTreeMap::new(),
        );

        match parse_critique(&response, ID) {
            Ok(critique) => StatePatch::critique(critique),
            Err(e) => StatePatch::critique(Critique::from_error(ID, &e.to_string())),
        }
    }
}

fn reasoning_text(draft: &RiskAssessment) -> String {
    format!(
        "Summary: {}\nArguments: {}",
        draft.reasoning.summary,
        draft.reasoning.key_arguments.join(", ")
    )
}

fn breakdown_text(draft: &RiskAssessment) -> String {
    match &draft.breakdown {
        Some(b) => format!(
            "Frequency Score: {}/5\nFrequency Rationale: {}\nImpact Score: {}/5\nImpact Rationale: {}\nFinal Risk Score: {}/25\nRisk Classification: {}\nCalculation Check: {} x {} = {} (Expected: {})",
            b.frequency_score,
            b.frequency_rationale,
            b.impact_score,
            b.impact_rationale,
            b.final_risk_score,
            b.classification,
            b.frequency_score,
            b.impact_score,
            b.frequency_score * b.impact_score,
            b.final_risk_score,
        ),
        None => "Not provided (legacy format - only legacy score available)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderCredentials;
    use crate::llm::{Provider, ScriptedClient, ScriptedConstructor};
    use crate::schema::{Recommendation, RiskBreakdown, RiskClassification};
    use pretty_assertions::assert_eq;

    fn challenger_with(response: crate::error::Result<String>) -> ChallengerA {
        let factory = Arc::new(
            LlmFactory::new(
                ProviderCredentials::default().with_key(Provider::OpenAi, "key"),
                Duration::from_secs(5),
            )
            .with_constructor(Box::new(ScriptedConstructor::new(move |provider, model| {
                Ok(match &response {
                    Ok(text) => Arc::new(ScriptedClient::always(provider, model, text.clone())),
                    Err(e) => Arc::new(ScriptedClient::failing(provider, model, e.to_string())),
                })
            })))
            .with_fallback_notices(false),
        );
        ChallengerA::new(
            factory,
            AgentModel {
                provider: Provider::OpenAi,
                model: "gpt-4o".to_string(),
                fallback_provider: None,
                fallback_model: None,
            },
            0.2,
            Duration::from_secs(5),
            None,
        )
    }

    fn state_with_draft() -> WorkflowState {
        let mut state = WorkflowState::new("scenario");
        state.synthesized_draft = Some(RiskAssessment {
            model_name: "aggregated".to_string(),
            legacy_score: 4,
            reasoning: crate::schema::ReasoningTrace {
                summary: "summary".to_string(),
                key_arguments: vec!["arg".to_string()],
                ..Default::default()
            },
            breakdown: Some(RiskBreakdown {
                frequency_score: 5,
                frequency_rationale: "pervasive".to_string(),
                impact_score: 4,
                impact_rationale: "severe".to_string(),
                final_risk_score: 20,
                classification: RiskClassification::Critical,
            }),
        });
        state
    }

    #[tokio::test]
    async fn parses_critique_from_response() {
        let challenger = challenger_with(Ok(
            r#"{"is_valid": true, "issues": [], "confidence": 0.95, "recommendation": "accept"}"#
                .to_string(),
        ));
        let ctx = RunContext::new();
        let patch = challenger.run(&state_with_draft(), &ctx).await;

        assert_eq!(patch.critiques.len(), 1);
        let critique = &patch.critiques[0];
        assert_eq!(critique.challenger_id, ChallengerId::A);
        assert!(critique.passed());
        assert_eq!(ctx.audit.len(), 1);
    }

    #[tokio::test]
    async fn missing_draft_rejects() {
        let challenger = challenger_with(Ok("unused".to_string()));
        let ctx = RunContext::new();
        let patch = challenger.run(&WorkflowState::new("scenario"), &ctx).await;

        let critique = &patch.critiques[0];
        assert!(!critique.is_valid);
        assert_eq!(critique.recommendation, Recommendation::Reject);
        assert_eq!(ctx.audit.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_becomes_needs_review_critique() {
        let challenger =
            challenger_with(Err(crate::error::Error::llm_api("openai", "502 bad gateway")));
        let ctx = RunContext::new();
        let patch = challenger.run(&state_with_draft(), &ctx).await;

        let critique = &patch.critiques[0];
        assert!(!critique.is_valid);
        assert_eq!(critique.recommendation, Recommendation::NeedsReview);
        assert_eq!(critique.confidence, 0.0);
        assert!(critique.issues[0].starts_with("Error:"));

        let records = ctx.audit.snapshot();
        assert!(records[0].response.starts_with("ERROR:"));
    }
}
