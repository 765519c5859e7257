//! Aggregator: synthesize one draft from the ensemble, or revise it.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::config::AgentModel;
use crate::graph::{StatePatch, WorkflowState};
use crate::knowledge::{reference_sources, KnowledgeBase};
use crate::llm::{ClientRequest, LlmFactory};
use crate::prompts::{fill, AGGREGATOR_PROMPT, AGGREGATOR_REVISION_PROMPT};

use super::{format_assessment, format_critiques, invoke_with_deadline, parse_assessment, RunContext};

/// Synthesis node with two modes: initial synthesis over all drafts, or a
/// revision of the previous draft against the latest critique round.
pub struct Aggregator {
    factory: Arc<LlmFactory>,
    agent: AgentModel,
    temperature: f64,
    deadline: Duration,
    kb: Option<Arc<dyn KnowledgeBase>>,
}

impl Aggregator {
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

    #[instrument(skip_all, fields(revision = state.revision_count))]
    pub async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> StatePatch {
        if state.draft_assessments.is_empty() {
            warn!("aggregator invoked without drafts");
            return StatePatch::default();
        }

        let is_revision = state.revision_count > 0
            && state.synthesized_draft.is_some()
            && !state.critiques.is_empty();

        let sources = reference_sources(self.kb.as_deref(), &state.risk_input).await;
        let prompt = if is_revision {
            // The current round is the last three critiques; earlier rounds
            // were already addressed by earlier revisions.
            let recent = &state.critiques[state.critiques.len().saturating_sub(3)..];
            let previous = state
                .synthesized_draft
                .as_ref()
                .map(format_assessment)
                .unwrap_or_default();
            fill(
                AGGREGATOR_REVISION_PROMPT,
                &[
                    ("reference_sources", sources.as_str()),
                    ("previous_assessment", previous.as_str()),
                    ("critiques", format_critiques(recent).as_str()),
                ],
            )
        } else {
            let assessments = state
                .draft_assessments
                .iter()
                .map(format_assessment)
                .collect::<Vec<_>>()
                .join("\n\n");
            fill(
                AGGREGATOR_PROMPT,
                &[
                    ("reference_sources", sources.as_str()),
                    ("assessments", assessments.as_str()),
                ],
            )
        };

        let mode = if is_revision { "revision" } else { "initial" };
        let mut extra = BTreeMap::new();
        extra.insert("mode".to_string(), json!(mode));

        // Any hard failure falls back to the first ensemble draft verbatim,
        // so the graph always has a synthesized draft to challenge.
        let first_draft = state.draft_assessments[0].clone();
        let intended = format!("{}/{}", self.agent.provider, self.agent.model);

        let resolved = match self.factory.create(&ClientRequest::from_agent(
            &self.agent,
            self.temperature,
            "aggregator",
        )) {
            Ok(resolved) => resolved,
            Err(e) => {
                ctx.audit.record_error(
                    "aggregator",
                    "aggregator",
                    &intended,
                    &prompt,
                    &e.to_string(),
                    state.revision_count,
                );
                return StatePatch::synthesized(first_draft);
            }
        };

        let response =
            match invoke_with_deadline(resolved.client.as_ref(), &prompt, self.deadline).await {
                Ok(response) => response,
                Err(e) => {
                    ctx.audit.record_error(
                        "aggregator",
                        "aggregator",
                        &resolved.display_label(),
                        &prompt,
                        &e.to_string(),
                        state.revision_count,
                    );
                    return StatePatch::synthesized(first_draft);
                }
            };

        ctx.audit.record(
            "aggregator",
            "aggregator",
            &resolved.display_label(),
            &prompt,
            &response,
            state.revision_count,
            extra,
        );

        match parse_assessment(&response, "aggregated") {
            Ok(draft) => StatePatch::synthesized(draft),
            Err(e) => {
                warn!("aggregator response unparseable, keeping first draft: {e}");
                StatePatch::synthesized(first_draft)
            }
        }
    }
}
