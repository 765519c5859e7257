//! Value records exchanged between workflow nodes.
//!
//! Everything here is an immutable value: nodes never mutate a record in
//! place, they produce replacements (see [`crate::graph::StatePatch`]).
//! The wire field names match the JSON contracts the agent prompts ask the
//! models to produce, so the same types parse model output and serialize
//! into run artifacts.

use serde::{Deserialize, Serialize};

/// Reasoning trace attached to a risk assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    /// Brief summary of the risk.
    pub summary: String,
    /// Ordered supporting arguments.
    #[serde(default)]
    pub key_arguments: Vec<String>,
    /// Specific laws and standards cited.
    #[serde(default)]
    pub regulatory_citations: Vec<String>,
    /// Specific CVEs or technical flaws cited.
    #[serde(default)]
    pub vulnerabilities: Vec<String>,
}

/// Risk classification derived from the final 1-25 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum RiskClassification {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskClassification {
    /// Map a final risk score onto its classification bucket.
    ///
    /// 1-5 Low, 6-11 Medium, 12-19 High, 20-25 Critical.
    pub fn from_score(final_risk_score: u8) -> Self {
        match final_risk_score {
            0..=5 => Self::Low,
            6..=11 => Self::Medium,
            12..=19 => Self::High,
            _ => Self::Critical,
        }
    }
}

impl std::fmt::Display for RiskClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

impl TryFrom<String> for RiskClassification {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown risk classification: {other}")),
        }
    }
}

/// Dual-factor risk breakdown: frequency x impact with rationales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    /// How often/widespread the risk state is (1-5).
    pub frequency_score: u8,
    /// One sentence justifying the frequency.
    pub frequency_rationale: String,
    /// Severity of damage when the risk occurs (1-5).
    pub impact_score: u8,
    /// One sentence justifying the severity.
    pub impact_rationale: String,
    /// Final risk score, frequency_score * impact_score (1-25).
    pub final_risk_score: u8,
    /// Classification bucket for the final score.
    #[serde(rename = "risk_classification")]
    pub classification: RiskClassification,
}

impl RiskBreakdown {
    /// Enforce the dual-factor invariants, keeping the parsed rationales.
    ///
    /// Factor scores are clamped to 1-5, the product is recomputed, and the
    /// classification is re-derived from the corrected score. Model output
    /// that already satisfies the invariants passes through unchanged.
    pub fn repaired(mut self) -> Self {
        self.frequency_score = self.frequency_score.clamp(1, 5);
        self.impact_score = self.impact_score.clamp(1, 5);
        self.final_risk_score = self.frequency_score * self.impact_score;
        self.classification = RiskClassification::from_score(self.final_risk_score);
        self
    }

    /// Whether the product and classification invariants already hold.
    pub fn is_consistent(&self) -> bool {
        (1..=5).contains(&self.frequency_score)
            && (1..=5).contains(&self.impact_score)
            && self.final_risk_score == self.frequency_score * self.impact_score
            && self.classification == RiskClassification::from_score(self.final_risk_score)
    }

    /// Legacy 1-5 score bucket for this breakdown.
    pub fn legacy_score(&self) -> u8 {
        legacy_score_from_final(self.final_risk_score)
    }
}

/// Map a 1-25 final risk score onto the legacy 1-5 scale.
///
/// Informational only; routing never depends on it.
pub fn legacy_score_from_final(final_risk_score: u8) -> u8 {
    match final_risk_score {
        0..=5 => 1,
        6..=10 => 2,
        11..=15 => 3,
        16..=20 => 4,
        _ => 5,
    }
}

/// A risk assessment produced by one model (or by the aggregator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// `provider/model` label of the producing model, with `[FALLBACK]` or
    /// `[ERROR]` markers where applicable.
    pub model_name: String,
    /// Legacy 1-5 score.
    #[serde(rename = "score")]
    pub legacy_score: u8,
    /// Reasoning trace.
    pub reasoning: ReasoningTrace,
    /// Dual-factor breakdown, when the model produced one.
    #[serde(
        rename = "risk_assessment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub breakdown: Option<RiskBreakdown>,
}

impl RiskAssessment {
    /// Placeholder assessment substituted on a per-model failure so the
    /// ensemble cardinality is preserved.
    pub fn degenerate(intended_label: &str, message: &str) -> Self {
        Self {
            model_name: format!("{intended_label} [ERROR]"),
            legacy_score: 3,
            reasoning: ReasoningTrace {
                summary: format!("Error generating assessment: {message}"),
                key_arguments: Vec::new(),
                regulatory_citations: Vec::new(),
                vulnerabilities: Vec::new(),
            },
            breakdown: None,
        }
    }
}

/// Identity of a challenger agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChallengerId {
    A,
    B,
    C,
}

impl ChallengerId {
    /// Enumeration order used for critique placement within a round.
    pub const ALL: [ChallengerId; 3] = [Self::A, Self::B, Self::C];

    /// Stage label used in audit records and artifacts.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::A => "challenger_a",
            Self::B => "challenger_b",
            Self::C => "challenger_c",
        }
    }
}

impl std::fmt::Display for ChallengerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stage())
    }
}

/// Challenger verdict on the synthesized draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Reject,
    NeedsReview,
}

/// Structured critique appended by a challenger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub challenger_id: ChallengerId,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub confidence: f64,
    pub recommendation: Recommendation,
}

impl Critique {
    /// Critique for a challenger that found nothing to review.
    pub fn missing_draft(challenger_id: ChallengerId) -> Self {
        Self {
            challenger_id,
            is_valid: false,
            issues: vec!["No synthesized draft available for review".to_string()],
            confidence: 1.0,
            recommendation: Recommendation::Reject,
        }
    }

    /// Critique substituted when a challenger fails internally.
    pub fn from_error(challenger_id: ChallengerId, message: &str) -> Self {
        Self {
            challenger_id,
            is_valid: false,
            issues: vec![format!("Error: {message}")],
            confidence: 0.0,
            recommendation: Recommendation::NeedsReview,
        }
    }

    /// Whether this critique counts toward the approval quorum.
    pub fn passed(&self) -> bool {
        self.is_valid && self.recommendation == Recommendation::Accept
    }

    /// Whether this critique blocks the draft (invalid or explicit reject).
    pub fn blocking(&self) -> bool {
        !self.is_valid || self.recommendation == Recommendation::Reject
    }
}
