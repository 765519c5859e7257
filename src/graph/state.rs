//! Workflow state and the partial-update merge discipline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::schema::{Critique, RiskAssessment};

/// Escalation marker attached to the final state of an escalated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationInfo {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Path of the persisted escalation artifact, when the write succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<PathBuf>,
}

/// The value threaded through the graph for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Scenario under assessment; set at start, never mutated.
    pub risk_input: String,
    /// Ensemble drafts, set once by the generator.
    pub draft_assessments: Vec<RiskAssessment>,
    /// Current unified draft, rewritten by the aggregator each cycle.
    pub synthesized_draft: Option<RiskAssessment>,
    /// Append-only critique log; each round contributes exactly [A, B, C].
    pub critiques: Vec<Critique>,
    /// Revision cycles completed; written only by the verifier.
    pub revision_count: u32,
    /// Present iff the run terminated through the escalation handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationInfo>,
}

impl WorkflowState {
    pub fn new(risk_input: impl Into<String>) -> Self {
        Self {
            risk_input: risk_input.into(),
            ..Self::default()
        }
    }
}

/// Partial state update returned by a node.
///
/// Scalar fields replace on `Some`; critiques append. The runtime applies
/// patches in node order, so a node never observes a half-merged state.
#[derive(Debug, Default)]
pub struct StatePatch {
    pub draft_assessments: Option<Vec<RiskAssessment>>,
    pub synthesized_draft: Option<RiskAssessment>,
    pub critiques: Vec<Critique>,
    pub revision_count: Option<u32>,
    pub escalation: Option<EscalationInfo>,
}

impl StatePatch {
    pub fn drafts(assessments: Vec<RiskAssessment>) -> Self {
        Self {
            draft_assessments: Some(assessments),
            ..Self::default()
        }
    }

    pub fn synthesized(draft: RiskAssessment) -> Self {
        Self {
            synthesized_draft: Some(draft),
            ..Self::default()
        }
    }

    pub fn critique(critique: Critique) -> Self {
        Self {
            critiques: vec![critique],
            ..Self::default()
        }
    }

    /// Merge this patch into the state, enforcing the append/monotonicity
    /// discipline.
    pub fn apply(self, state: &mut WorkflowState) -> Result<()> {
        if let Some(assessments) = self.draft_assessments {
            state.draft_assessments = assessments;
        }
        if let Some(draft) = self.synthesized_draft {
            state.synthesized_draft = Some(draft);
        }
        state.critiques.extend(self.critiques);
        if let Some(revision_count) = self.revision_count {
            if revision_count < state.revision_count {
                return Err(Error::Internal(format!(
                    "revision_count must be monotone: {} -> {}",
                    state.revision_count, revision_count
                )));
            }
            state.revision_count = revision_count;
        }
        if let Some(escalation) = self.escalation {
            state.escalation = Some(escalation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ChallengerId, Recommendation};
    use pretty_assertions::assert_eq;

    fn critique(id: ChallengerId) -> Critique {
        Critique {
            challenger_id: id,
            is_valid: true,
            issues: vec![],
            confidence: 0.9,
            recommendation: Recommendation::Accept,
        }
    }

    #[test]
    fn patches_append_critiques_and_replace_scalars() {
        let mut state = WorkflowState::new("scenario");

        StatePatch::critique(critique(ChallengerId::A))
            .apply(&mut state)
            .unwrap();
        StatePatch::critique(critique(ChallengerId::B))
            .apply(&mut state)
            .unwrap();
        StatePatch {
            revision_count: Some(1),
            ..StatePatch::default()
        }
        .apply(&mut state)
        .unwrap();

        assert_eq!(state.critiques.len(), 2);
        assert_eq!(state.critiques[0].challenger_id, ChallengerId::A);
        assert_eq!(state.revision_count, 1);
        assert_eq!(state.risk_input, "scenario");
    }

    #[test]
    fn revision_count_cannot_decrease() {
        let mut state = WorkflowState::new("scenario");
        state.revision_count = 2;

        let result = StatePatch {
            revision_count: Some(1),
            ..StatePatch::default()
        }
        .apply(&mut state);

        assert!(result.is_err());
        assert_eq!(state.revision_count, 2);
    }
}
