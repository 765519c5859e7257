//! Challenger C: safety and regulatory compliance coverage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::config::AgentModel;
use crate::graph::{StatePatch, WorkflowState};
use crate::knowledge::{reference_sources, KnowledgeBase};
use crate::llm::{ClientRequest, LlmFactory};
use crate::prompts::{fill, CHALLENGER_C_PROMPT};
use crate::schema::{ChallengerId, Critique, RiskAssessment};

use super::{invoke_with_deadline, parse_critique, RunContext};

/// Independent critic for compliance checkpoint coverage. The reference
/// checkpoint set is carried by the prompt.
pub struct ChallengerC {
    factory: Arc<LlmFactory>,
    agent: AgentModel,
    temperature: f64,
    deadline: Duration,
    kb: Option<Arc<dyn KnowledgeBase>>,
}

impl ChallengerC {
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
        const ID: ChallengerId = ChallengerId::C;
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
            CHALLENGER_C_PROMPT,
            &[
                ("reference_sources", sources.as_str()),
                ("score", draft.legacy_score.to_string().as_str()),
                ("reasoning", reasoning_text(draft).as_str()),
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

        let mut extra = BTreeMap::new();
        extra.insert(
            "fallback_used".to_string(),
            serde_json::json!(resolved.was_fallback),
        );
        ctx.audit.record(
            stage,
            "challenger",
            &resolved.display_label(),
            &prompt,
            &response,
            state.revision_count,
            extra,
        );

        match parse_critique(&response, ID) {
            Ok(critique) => StatePatch::critique(critique),
            Err(e) => StatePatch::critique(Critique::from_error(ID, &e.to_string())),
        }
    }
}

fn reasoning_text(draft: &RiskAssessment) -> String {
    let reasoning = &draft.reasoning;
    format!(
        "Summary: {}\nArguments: {}\nRegulatory Citations: {}\nVulnerabilities: {}",
        reasoning.summary,
        reasoning.key_arguments.join(", "),
        reasoning.regulatory_citations.join(", "),
        reasoning.vulnerabilities.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderCredentials;
    use crate::llm::{Provider, ScriptedClient, ScriptedConstructor};
    use crate::schema::{ReasoningTrace, Recommendation};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn needs_review_verdict_round_trips() {
        let factory = Arc::new(
            LlmFactory::new(
                ProviderCredentials::default().with_key(Provider::OpenAi, "key"),
                Duration::from_secs(5),
            )
            .with_constructor(Box::new(ScriptedConstructor::new(|provider, model| {
                Ok(Arc::new(ScriptedClient::always(
                    provider,
                    model,
                    r#"{"is_valid": true, "issues": ["GDPR exposure not discussed"], "confidence": 0.6, "recommendation": "needs_review"}"#,
                )))
            })))
            .with_fallback_notices(false),
        );
        let challenger = ChallengerC::new(
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
        );

        let mut state = WorkflowState::new("scenario");
        state.synthesized_draft = Some(RiskAssessment {
            model_name: "aggregated".to_string(),
            legacy_score: 3,
            reasoning: ReasoningTrace {
                summary: "collects temperature preferences".to_string(),
                ..Default::default()
            },
            breakdown: None,
        });

        let ctx = RunContext::new();
        let patch = challenger.run(&state, &ctx).await;
        let critique = &patch.critiques[0];
        assert_eq!(critique.challenger_id, ChallengerId::C);
        assert_eq!(critique.recommendation, Recommendation::NeedsReview);
        assert!(!critique.blocking());
        assert_eq!(ctx.audit.len(), 1);
    }
}
