//! Persisted JSON documents: run results, escalations, audit exports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::audit::ConversationRecord;
use crate::error::Result;
use crate::graph::WorkflowState;
use crate::llm::FactoryAuditExport;
use crate::schema::{Critique, RiskAssessment};

/// Review priority attached to an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
}

/// Persisted run result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDocument {
    pub metadata: RunMetadata,
    pub input: RunInput,
    pub output: RunOutput,
    pub workflow_stats: WorkflowStats,
    pub conversation_log: Vec<ConversationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub assessment_type: String,
    pub timestamp: DateTime<Utc>,
    pub risk_input: String,
    pub revision_count: u32,
    pub total_assessments: usize,
    pub total_critiques: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    pub risk_scenario: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub synthesized_draft: Option<RiskAssessment>,
    pub draft_assessments: Vec<RiskAssessment>,
    pub critiques: Vec<Critique>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub revision_count: u32,
    pub total_assessments_generated: usize,
    pub total_critiques: usize,
}

impl RunDocument {
    pub fn from_state(state: &WorkflowState, conversation: Vec<ConversationRecord>) -> Self {
        Self {
            metadata: RunMetadata {
                run_id: Uuid::new_v4(),
                assessment_type: "Assessment for IoT Risk".to_string(),
                timestamp: Utc::now(),
                risk_input: state.risk_input.clone(),
                revision_count: state.revision_count,
                total_assessments: state.draft_assessments.len(),
                total_critiques: state.critiques.len(),
            },
            input: RunInput {
                risk_scenario: state.risk_input.clone(),
            },
            output: RunOutput {
                synthesized_draft: state.synthesized_draft.clone(),
                draft_assessments: state.draft_assessments.clone(),
                critiques: state.critiques.clone(),
            },
            workflow_stats: WorkflowStats {
                revision_count: state.revision_count,
                total_assessments_generated: state.draft_assessments.len(),
                total_critiques: state.critiques.len(),
            },
            conversation_log: conversation,
        }
    }
}

/// Persisted escalation document, self-contained for human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationDocument {
    pub metadata: EscalationMetadata,
    pub escalation_reason: String,
    pub workflow_state: WorkflowStats,
    pub current_assessment: Option<RiskAssessment>,
    pub all_assessments: Vec<RiskAssessment>,
    pub critiques: Vec<Critique>,
    pub human_review_required: HumanReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationMetadata {
    pub escalation_type: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub risk_input: String,
    pub revision_count: u32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanReview {
    pub action: String,
    pub deadline: Option<DateTime<Utc>>,
    pub priority: Priority,
}

impl EscalationDocument {
    pub fn from_state(state: &WorkflowState, reason: &str, priority: Priority) -> Self {
        Self {
            metadata: EscalationMetadata {
                escalation_type: "Human Review Required".to_string(),
                timestamp: Utc::now(),
                reason: reason.to_string(),
                risk_input: state.risk_input.clone(),
                revision_count: state.revision_count,
                status: "PENDING_HUMAN_REVIEW".to_string(),
            },
            escalation_reason: reason.to_string(),
            workflow_state: WorkflowStats {
                revision_count: state.revision_count,
                total_assessments_generated: state.draft_assessments.len(),
                total_critiques: state.critiques.len(),
            },
            current_assessment: state.synthesized_draft.clone(),
            all_assessments: state.draft_assessments.clone(),
            critiques: state.critiques.clone(),
            human_review_required: HumanReview {
                action: "Review this assessment and provide final decision".to_string(),
                deadline: None,
                priority,
            },
        }
    }
}

fn timestamp_slug(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

fn write_pretty<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Write the run result under the output directory.
///
/// Filename: `assessment_iot_risk_YYYYMMDD_HHMMSS.json`.
pub fn save_run_result(
    state: &WorkflowState,
    conversation: Vec<ConversationRecord>,
    output_dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let document = RunDocument::from_state(state, conversation);
    let path = output_dir.join(format!(
        "assessment_iot_risk_{}.json",
        timestamp_slug(document.metadata.timestamp)
    ));
    write_pretty(&path, &document)?;
    Ok(path)
}

/// Write the escalation artifact under `<output_dir>/escalations/`.
///
/// Filename: `escalation_YYYYMMDD_HHMMSS.json`.
pub fn save_escalation(
    state: &WorkflowState,
    reason: &str,
    priority: Priority,
    output_dir: &Path,
) -> Result<PathBuf> {
    let escalation_dir = output_dir.join("escalations");
    std::fs::create_dir_all(&escalation_dir)?;
    let document = EscalationDocument::from_state(state, reason, priority);
    let path = escalation_dir.join(format!(
        "escalation_{}.json",
        timestamp_slug(document.metadata.timestamp)
    ));
    write_pretty(&path, &document)?;
    Ok(path)
}

/// Write the factory audit export (heterogeneity report, fallback events,
/// instantiation log) under the output directory.
pub fn save_factory_audit(export: &FactoryAuditExport, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!(
        "llm_audit_{}.json",
        timestamp_slug(export.generated_at)
    ));
    write_pretty(&path, export)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        ChallengerId, ReasoningTrace, Recommendation, RiskBreakdown, RiskClassification,
    };
    use pretty_assertions::assert_eq;

    fn sample_state() -> WorkflowState {
        let assessment = RiskAssessment {
            model_name: "openai/gpt-4o".to_string(),
            legacy_score: 4,
            reasoning: ReasoningTrace {
                summary: "default credentials".to_string(),
                key_arguments: vec!["shipped with admin/admin".to_string()],
                regulatory_citations: vec!["PSTI Act 2022".to_string()],
                vulnerabilities: vec!["CVE-2024-12345".to_string()],
            },
            breakdown: Some(RiskBreakdown {
                frequency_score: 5,
                frequency_rationale: "pervasive".to_string(),
                impact_score: 4,
                impact_rationale: "severe".to_string(),
                final_risk_score: 20,
                classification: RiskClassification::Critical,
            }),
        };
        let mut state = WorkflowState::new("Device X: default password");
        state.synthesized_draft = Some(assessment.clone());
        state.draft_assessments = vec![assessment];
        state.critiques = vec![Critique {
            challenger_id: ChallengerId::A,
            is_valid: true,
            issues: vec![],
            confidence: 0.9,
            recommendation: Recommendation::Accept,
        }];
        state.revision_count = 1;
        state
    }

    #[test]
    fn run_artifact_round_trips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state();
        let path = save_run_result(&state, Vec::new(), dir.path()).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("assessment_iot_risk_"));
        assert!(name.ends_with(".json"));

        // Parse and re-serialize: fields must be unchanged.
        let text = std::fs::read_to_string(&path).unwrap();
        let document: RunDocument = serde_json::from_str(&text).unwrap();
        let reserialized = serde_json::to_string_pretty(&document).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            serde_json::from_str::<serde_json::Value>(&reserialized).unwrap()
        );

        assert_eq!(document.metadata.revision_count, 1);
        assert_eq!(document.workflow_stats.total_assessments_generated, 1);
        assert_eq!(
            document
                .output
                .synthesized_draft
                .unwrap()
                .breakdown
                .unwrap()
                .final_risk_score,
            20
        );
    }

    #[test]
    fn escalation_artifact_carries_status_and_priority() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state();
        let path = save_escalation(
            &state,
            "Critical risk classification (25/25) requires human validation",
            Priority::High,
            dir.path(),
        )
        .unwrap();

        assert!(path.parent().unwrap().ends_with("escalations"));
        let text = std::fs::read_to_string(&path).unwrap();
        let document: EscalationDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(document.metadata.status, "PENDING_HUMAN_REVIEW");
        assert_eq!(document.human_review_required.priority, Priority::High);
        assert!(document.escalation_reason.contains("Critical risk classification"));
        assert_eq!(document.all_assessments.len(), 1);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["human_review_required"]["priority"], "HIGH");
    }

    #[test]
    fn breakdown_absent_means_no_risk_assessment_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = sample_state();
        state.draft_assessments[0].breakdown = None;
        state.synthesized_draft = None;

        let path = save_run_result(&state, Vec::new(), dir.path()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["output"]["draft_assessments"][0]
            .get("risk_assessment")
            .is_none());
    }
}
