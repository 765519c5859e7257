//! Challenger B: external source verification (fact checker).

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::citations::{dedup_preserving_order, CitationExtractor};
use crate::config::AgentModel;
use crate::graph::{StatePatch, WorkflowState};
use crate::knowledge::{reference_sources, KnowledgeBase};
use crate::llm::{ClientRequest, LlmFactory};
use crate::prompts::{fill, CHALLENGER_B_PROMPT};
use crate::schema::{ChallengerId, Critique, Recommendation};
use crate::search::{score_results, CitationKind, SearchClient, SearchQueryBuilder};

use super::{format_assessment, invoke_with_deadline, parse_critique, RunContext};

/// Verification outcome for one citation.
#[derive(Debug, Clone, Serialize)]
pub struct CitationVerification {
    pub citation: String,
    #[serde(rename = "type")]
    pub kind: CitationKind,
    pub verified: bool,
    pub confidence: f64,
    pub urls: Vec<String>,
}

impl CitationVerification {
    /// Major citations gate the fallback decision rule: CVEs, the PSTI
    /// Act, and top-level ISO standards (no part suffix).
    pub fn is_major(&self) -> bool {
        match self.kind {
            CitationKind::Cve => true,
            CitationKind::Regulation => self.citation.to_ascii_uppercase().contains("PSTI"),
            CitationKind::Standard => !self.citation.contains('-'),
        }
    }
}

/// Deterministic decision over the verification results, used when the
/// analysis model is unreachable or unparseable.
///
/// Accept when at least half the citations verified or every major
/// citation verified; reject when most major citations failed; otherwise
/// needs_review.
pub fn decide_from_verification(verifications: &[CitationVerification]) -> Critique {
    let total = verifications.len();
    let verified = verifications.iter().filter(|v| v.verified).count();
    let majors: Vec<_> = verifications.iter().filter(|v| v.is_major()).collect();
    let unverified_majors = majors.iter().filter(|v| !v.verified).count();

    let issues: Vec<String> = verifications
        .iter()
        .filter(|v| !v.verified)
        .map(|v| format!("Unverified citation: {}", v.citation))
        .collect();

    let verified_fraction_ok = total > 0 && verified * 2 >= total;
    let all_majors_verified = !majors.is_empty() && unverified_majors == 0;
    let most_majors_unverified = !majors.is_empty() && unverified_majors * 2 > majors.len();

    if verified_fraction_ok || all_majors_verified {
        Critique {
            challenger_id: ChallengerId::B,
            is_valid: true,
            issues,
            confidence: 0.8,
            recommendation: Recommendation::Accept,
        }
    } else if most_majors_unverified {
        Critique {
            challenger_id: ChallengerId::B,
            is_valid: false,
            issues,
            confidence: 0.7,
            recommendation: Recommendation::Reject,
        }
    } else {
        Critique {
            challenger_id: ChallengerId::B,
            is_valid: false,
            issues,
            confidence: 0.5,
            recommendation: Recommendation::NeedsReview,
        }
    }
}

/// Independent critic for external validity of citations. Combines the
/// deterministic extraction/search/scoring pipeline with an LLM pass over
/// the collected evidence.
pub struct ChallengerB {
    factory: Arc<LlmFactory>,
    agent: AgentModel,
    temperature: f64,
    deadline: Duration,
    kb: Option<Arc<dyn KnowledgeBase>>,
    search: Arc<dyn SearchClient>,
    extractor: CitationExtractor,
    query_builder: SearchQueryBuilder,
}

impl ChallengerB {
    pub fn new(
        factory: Arc<LlmFactory>,
        agent: AgentModel,
        temperature: f64,
        deadline: Duration,
        kb: Option<Arc<dyn KnowledgeBase>>,
        search: Arc<dyn SearchClient>,
    ) -> Self {
        Self {
            factory,
            agent,
            temperature,
            deadline,
            kb,
            search,
            extractor: CitationExtractor::new(),
            query_builder: SearchQueryBuilder,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> StatePatch {
        const ID: ChallengerId = ChallengerId::B;
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

        // Union of the explicit citation fields and pattern extractions
        // from the narrative text.
        let reasoning = &draft.reasoning;
        let mut citations = reasoning.regulatory_citations.clone();
        citations.extend(reasoning.vulnerabilities.clone());
        let narrative = format!("{} {}", reasoning.summary, reasoning.key_arguments.join(" "));
        citations.extend(self.extractor.extract_all(&narrative));
        let citations = dedup_preserving_order(citations);

        if citations.is_empty() {
            ctx.audit.record(
                stage,
                "challenger",
                "citation-check",
                "",
                "No citations to verify; accepted.",
                state.revision_count,
                BTreeMap::new(),
            );
            return StatePatch::critique(Critique {
                challenger_id: ID,
                is_valid: true,
                issues: Vec::new(),
                confidence: 1.0,
                recommendation: Recommendation::Accept,
            });
        }

        let verifications = self.verify_citations(&citations).await;

        let sources = reference_sources(self.kb.as_deref(), &state.risk_input).await;
        let citations_text = citations
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n");
        let results_text =
            serde_json::to_string_pretty(&verifications).unwrap_or_else(|_| "[]".to_string());
        let prompt = fill(
            CHALLENGER_B_PROMPT,
            &[
                ("reference_sources", sources.as_str()),
                ("assessment", format_assessment(draft).as_str()),
                ("citations", citations_text.as_str()),
                ("search_results", results_text.as_str()),
            ],
        );

        let mut extra = BTreeMap::new();
        extra.insert("citations_checked".to_string(), json!(citations.len()));

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
                return StatePatch::critique(decide_from_verification(&verifications));
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
                    return StatePatch::critique(decide_from_verification(&verifications));
                }
            };

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
            Err(_) => StatePatch::critique(decide_from_verification(&verifications)),
        }
    }

    /// Search and score each citation; a search failure counts as "no
    /// results" for that citation and the rest continue.
    async fn verify_citations(&self, citations: &[String]) -> Vec<CitationVerification> {
        let mut verifications = Vec::with_capacity(citations.len());
        for citation in citations {
            let query = self.query_builder.build(citation);
            let results = match self.search.query(&query).await {
                Ok(results) => results,
                Err(e) => {
                    debug!(citation = %citation, "search failed, treating as no results: {e}");
                    Vec::new()
                }
            };
            let score = score_results(citation, &results);
            verifications.push(CitationVerification {
                citation: citation.clone(),
                kind: CitationKind::classify(citation),
                verified: score.verified,
                confidence: score.confidence,
                urls: score.relevant_urls,
            });
        }
        verifications
    }
}
