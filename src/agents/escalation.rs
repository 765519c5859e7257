//! Escalation handler: terminal node routing a run to human review.

use chrono::Utc;
use std::path::PathBuf;
use tracing::{error, instrument, warn};

use crate::artifacts::{save_escalation, Priority};
use crate::graph::{EscalationInfo, StatePatch, WorkflowState};
use crate::schema::RiskClassification;

use super::verifier::EscalationTrigger;
use super::RunContext;

/// Serialize the full state to an escalation artifact and attach the
/// escalation marker to the state. Terminal; no further routing.
pub struct EscalationHandler {
    output_dir: PathBuf,
}

impl EscalationHandler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    #[instrument(skip_all)]
    pub fn run(
        &self,
        state: &WorkflowState,
        ctx: &RunContext,
        triggers: &[EscalationTrigger],
    ) -> StatePatch {
        // Every triggered reason goes into the artifact.
        let reason = triggers
            .iter()
            .map(EscalationTrigger::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        let priority = if is_critical_risk(state) {
            Priority::High
        } else {
            Priority::Medium
        };

        let artifact_ref = match save_escalation(state, &reason, priority, &self.output_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("failed to write escalation artifact: {e}");
                None
            }
        };

        warn!(
            priority = ?priority,
            artifact = ?artifact_ref,
            "assessment escalated to human review: {reason}"
        );
        ctx.audit.record(
            "escalation",
            "system",
            "-",
            "",
            &format!("Escalated to human review: {reason}"),
            state.revision_count,
            Default::default(),
        );

        StatePatch {
            escalation: Some(EscalationInfo {
                reason,
                timestamp: Utc::now(),
                artifact_ref,
            }),
            ..StatePatch::default()
        }
    }
}

/// Critical when the breakdown says so, or the legacy score is 4+ for
/// drafts without a breakdown.
fn is_critical_risk(state: &WorkflowState) -> bool {
    match &state.synthesized_draft {
        Some(draft) => match &draft.breakdown {
            Some(breakdown) => breakdown.classification == RiskClassification::Critical,
            None => draft.legacy_score >= 4,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ReasoningTrace, RiskAssessment, RiskBreakdown};
    use pretty_assertions::assert_eq;

    fn state_with_breakdown(final_risk_score: u8) -> WorkflowState {
        let mut state = WorkflowState::new("scenario");
        state.synthesized_draft = Some(RiskAssessment {
            model_name: "aggregated".to_string(),
            legacy_score: crate::schema::legacy_score_from_final(final_risk_score),
            reasoning: ReasoningTrace::default(),
            breakdown: Some(RiskBreakdown {
                frequency_score: 5,
                frequency_rationale: "r".to_string(),
                impact_score: final_risk_score / 5,
                impact_rationale: "r".to_string(),
                final_risk_score,
                classification: RiskClassification::from_score(final_risk_score),
            }),
        });
        state
    }

    #[test]
    fn critical_breakdown_writes_high_priority_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let state = state_with_breakdown(25);
        let ctx = RunContext::new();

        let patch = handler.run(
            &state,
            &ctx,
            &[EscalationTrigger::CriticalClassification { final_risk_score: 25 }],
        );

        let info = patch.escalation.unwrap();
        assert!(info.reason.contains("Critical risk classification"));
        let artifact = info.artifact_ref.unwrap();
        let text = std::fs::read_to_string(&artifact).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["metadata"]["status"], "PENDING_HUMAN_REVIEW");
        assert_eq!(value["human_review_required"]["priority"], "HIGH");
        assert_eq!(ctx.audit.len(), 1);
    }

    #[test]
    fn non_critical_escalation_is_medium_priority() {
        let dir = tempfile::tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let state = state_with_breakdown(15);
        let ctx = RunContext::new();

        let patch = handler.run(
            &state,
            &ctx,
            &[EscalationTrigger::MaxRevisionsWithoutConsensus {
                revision_count: 3,
                passed: 1,
                total: 3,
            }],
        );

        let artifact = patch.escalation.unwrap().artifact_ref.unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&artifact).unwrap()).unwrap();
        assert_eq!(value["human_review_required"]["priority"], "MEDIUM");
        assert!(value["escalation_reason"]
            .as_str()
            .unwrap()
            .contains("Max revisions"));
    }

    #[test]
    fn every_triggered_reason_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let handler = EscalationHandler::new(dir.path());
        let state = state_with_breakdown(25);
        let ctx = RunContext::new();

        let patch = handler.run(
            &state,
            &ctx,
            &[
                EscalationTrigger::CriticalClassification { final_risk_score: 25 },
                EscalationTrigger::UnanimousReject,
            ],
        );

        let reason = patch.escalation.unwrap().reason;
        assert!(reason.contains("Critical risk classification"));
        assert!(reason.contains("All challengers rejected"));
    }
}
