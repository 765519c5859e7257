//! JSON extraction and repair for model responses.
//!
//! Models return either raw JSON or JSON fenced in a code block, sometimes
//! with prose around it. The two-phase parse here first isolates the JSON
//! object, then deserializes it tolerantly: a malformed nested breakdown
//! degrades to `None` instead of failing the whole assessment, and the
//! dual-factor invariants are auto-repaired after parsing.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::schema::{
    ChallengerId, Critique, ReasoningTrace, Recommendation, RiskAssessment, RiskBreakdown,
};

/// Isolate the first fenced or braced JSON object in a response.
pub fn extract_json_block(content: &str) -> Option<String> {
    if let Some(start) = content.find("```json") {
        let rest = &content[start + 7..];
        let end = rest.find("```")?;
        return Some(rest[..end].trim().to_string());
    }
    if let Some(start) = content.find("```") {
        let rest = &content[start + 3..];
        let end = rest.find("```")?;
        return Some(rest[..end].trim().to_string());
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(content[start..=end].trim().to_string())
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(default = "default_legacy_score")]
    score: u8,
    reasoning: ReasoningTrace,
    #[serde(default)]
    risk_assessment: Option<serde_json::Value>,
}

fn default_legacy_score() -> u8 {
    3
}

/// Parse a generator or aggregator response into a [`RiskAssessment`].
///
/// The breakdown block is optional and tolerated when malformed; when it
/// parses, the product invariant is repaired and the legacy score is
/// re-derived from the corrected final score.
pub fn parse_assessment(content: &str, model_name: &str) -> Result<RiskAssessment> {
    let block = extract_json_block(content)
        .ok_or_else(|| Error::parse("no JSON object found in response"))?;
    let raw: RawAssessment = serde_json::from_str(&block)
        .map_err(|e| Error::parse(format!("assessment did not match contract: {e}")))?;

    let breakdown = raw
        .risk_assessment
        .and_then(|value| serde_json::from_value::<RiskBreakdown>(value).ok())
        .map(RiskBreakdown::repaired);

    let legacy_score = match &breakdown {
        Some(breakdown) => breakdown.legacy_score(),
        None => raw.score.clamp(1, 5),
    };

    Ok(RiskAssessment {
        model_name: model_name.to_string(),
        legacy_score,
        reasoning: raw.reasoning,
        breakdown,
    })
}

#[derive(Debug, Deserialize)]
struct RawCritique {
    #[serde(default = "default_true")]
    is_valid: bool,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default = "default_recommendation")]
    recommendation: Recommendation,
}

fn default_true() -> bool {
    true
}

fn default_confidence() -> f64 {
    0.5
}

fn default_recommendation() -> Recommendation {
    Recommendation::NeedsReview
}

/// Parse a challenger response into a [`Critique`].
pub fn parse_critique(content: &str, challenger_id: ChallengerId) -> Result<Critique> {
    let block = extract_json_block(content)
        .ok_or_else(|| Error::parse("no JSON object found in response"))?;
    let raw: RawCritique = serde_json::from_str(&block)
        .map_err(|e| Error::parse(format!("critique did not match contract: {e}")))?;

    Ok(Critique {
        challenger_id,
        is_valid: raw.is_valid,
        issues: raw.issues,
        confidence: raw.confidence.clamp(0.0, 1.0),
        recommendation: raw.recommendation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RiskClassification;
    use pretty_assertions::assert_eq;

    const FULL_ASSESSMENT: &str = r#"{
        "score": 4,
        "reasoning": {
            "summary": "Default credentials expose the device",
            "key_arguments": ["shipped with admin/admin"],
            "regulatory_citations": ["PSTI Act 2022"],
            "vulnerabilities": ["CVE-2024-12345"]
        },
        "risk_assessment": {
            "frequency_score": 5,
            "frequency_rationale": "default passwords are pervasive",
            "impact_score": 4,
            "impact_rationale": "full remote takeover",
            "final_risk_score": 20,
            "risk_classification": "Critical"
        }
    }"#;

    #[test]
    fn extracts_fenced_json() {
        let content = format!("Here is the assessment:\n```json\n{FULL_ASSESSMENT}\n```\nDone.");
        let block = extract_json_block(&content).unwrap();
        assert!(block.starts_with('{'));
        assert!(block.ends_with('}'));
    }

    #[test]
    fn extracts_bare_fenced_json() {
        let content = format!("```\n{FULL_ASSESSMENT}\n```");
        assert!(extract_json_block(&content).is_some());
    }

    #[test]
    fn extracts_braced_json_from_prose() {
        let content = format!("The model says {FULL_ASSESSMENT} which seems right.");
        let block = extract_json_block(&content).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&block).is_ok());
    }

    #[test]
    fn no_json_is_an_error() {
        assert!(extract_json_block("no structured output here").is_none());
        assert!(parse_assessment("no structured output here", "m").is_err());
    }

    #[test]
    fn full_assessment_parses_with_breakdown() {
        let assessment = parse_assessment(FULL_ASSESSMENT, "openai/gpt-4o").unwrap();
        assert_eq!(assessment.model_name, "openai/gpt-4o");
        assert_eq!(assessment.legacy_score, 4);
        let breakdown = assessment.breakdown.unwrap();
        assert_eq!(breakdown.final_risk_score, 20);
        assert_eq!(breakdown.classification, RiskClassification::Critical);
    }

    #[test]
    fn inconsistent_breakdown_is_repaired() {
        let content = r#"{
            "score": 1,
            "reasoning": {"summary": "s", "key_arguments": [], "regulatory_citations": [], "vulnerabilities": []},
            "risk_assessment": {
                "frequency_score": 3,
                "frequency_rationale": "occasional",
                "impact_score": 4,
                "impact_rationale": "severe",
                "final_risk_score": 99,
                "risk_classification": "Low"
            }
        }"#;
        let assessment = parse_assessment(content, "m").unwrap();
        let breakdown = assessment.breakdown.unwrap();
        assert_eq!(breakdown.final_risk_score, 12);
        assert_eq!(breakdown.classification, RiskClassification::High);
        assert_eq!(breakdown.frequency_rationale, "occasional");
        // Legacy score re-derived from the repaired final score.
        assert_eq!(assessment.legacy_score, 3);
    }

    #[test]
    fn malformed_breakdown_degrades_to_none() {
        let content = r#"{
            "score": 4,
            "reasoning": {"summary": "s", "key_arguments": [], "regulatory_citations": [], "vulnerabilities": []},
            "risk_assessment": {"frequency_score": "very often"}
        }"#;
        let assessment = parse_assessment(content, "m").unwrap();
        assert!(assessment.breakdown.is_none());
        assert_eq!(assessment.legacy_score, 4);
    }

    #[test]
    fn critique_parses_with_defaults() {
        let critique = parse_critique(
            r#"{"is_valid": true, "recommendation": "accept", "confidence": 1.5}"#,
            ChallengerId::A,
        )
        .unwrap();
        assert!(critique.is_valid);
        assert_eq!(critique.recommendation, Recommendation::Accept);
        assert_eq!(critique.confidence, 1.0);

        let sparse = parse_critique("{}", ChallengerId::B).unwrap();
        assert!(sparse.is_valid);
        assert_eq!(sparse.recommendation, Recommendation::NeedsReview);
        assert_eq!(sparse.confidence, 0.5);
    }
}
