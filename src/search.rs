//! Web search capability and relevance scoring for citation verification.
//!
//! The search backend is an external capability behind [`SearchClient`];
//! failures are treated by callers as "no results" so one unreachable
//! citation never aborts the verification round.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Official domains that boost relevance confidence.
const OFFICIAL_DOMAINS: [&str; 7] = [
    "gov.uk",
    "legislation.gov.uk",
    "cve.org",
    "nvd.nist.gov",
    "iso.org",
    "bsi-group.com",
    "europa.eu",
];

/// One web search hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

/// Search capability consumed by the source-verification challenger.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn query(&self, text: &str) -> Result<Vec<SearchResult>>;
}

/// Tavily-backed search client.
pub struct TavilySearchClient {
    api_key: String,
    max_results: u32,
    base_url: String,
    http: Client,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

impl TavilySearchClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.tavily.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            max_results: 5,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SearchClient for TavilySearchClient {
    async fn query(&self, text: &str) -> Result<Vec<SearchResult>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query: text,
            max_results: self.max_results,
        };

        let url = format!("{}/search", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Search(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Search(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Search(format!("{status}: {body}")));
        }

        let parsed: TavilyResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Search(format!("failed to parse response: {e}")))?;
        Ok(parsed.results)
    }
}

/// Citation category, used to pick the query template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationKind {
    Cve,
    Standard,
    Regulation,
}

impl CitationKind {
    /// Classify a normalized citation string.
    pub fn classify(citation: &str) -> Self {
        let upper = citation.to_ascii_uppercase();
        if upper.starts_with("CVE") {
            Self::Cve
        } else if upper.contains("ISO") || upper.contains("27001") || upper.contains("27002") {
            Self::Standard
        } else {
            Self::Regulation
        }
    }
}

/// Build type-specific search queries for citation verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchQueryBuilder;

impl SearchQueryBuilder {
    pub fn build(&self, citation: &str) -> String {
        match CitationKind::classify(citation) {
            CitationKind::Cve => format!("\"{citation}\" CVE vulnerability security"),
            CitationKind::Standard => format!("\"{citation}\" ISO standard certification"),
            CitationKind::Regulation => {
                let upper = citation.to_ascii_uppercase();
                if upper.contains("PSTI") {
                    "PSTI Act 2022 Product Security Telecommunications Infrastructure UK legislation"
                        .to_string()
                } else if upper.contains("UK") || upper.contains("UNITED KINGDOM") {
                    format!("\"{citation}\" UK regulation legislation gov.uk")
                } else if upper.contains("EU") {
                    format!("\"{citation}\" EU regulation directive")
                } else {
                    format!("\"{citation}\" regulation legislation")
                }
            }
        }
    }
}

/// Relevance verdict for one citation over a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceScore {
    pub verified: bool,
    pub confidence: f64,
    pub relevant_urls: Vec<String>,
}

impl RelevanceScore {
    /// The verdict for an empty or failed result set.
    pub fn unverified() -> Self {
        Self {
            verified: false,
            confidence: 0.0,
            relevant_urls: Vec::new(),
        }
    }
}

/// Score search results against a citation.
///
/// Whole-phrase presence in title+content scores 0.9, otherwise matched
/// token fraction scaled by 0.6; official-domain hosts add 0.3, capped at
/// 1.0. A citation is verified at confidence >= 0.70; up to three URLs
/// scoring >= 0.5 are retained.
pub fn score_results(citation: &str, results: &[SearchResult]) -> RelevanceScore {
    if results.is_empty() {
        return RelevanceScore::unverified();
    }

    let citation_lower = citation.to_lowercase();
    let key_terms: Vec<&str> = citation_lower.split_whitespace().collect();

    let mut max_confidence: f64 = 0.0;
    let mut relevant_urls = Vec::new();

    for result in results {
        let combined = format!(
            "{} {}",
            result.title.to_lowercase(),
            result.content.to_lowercase()
        );
        let url = result.url.to_lowercase();

        let mut score = if combined.contains(&citation_lower) {
            0.9
        } else if key_terms.is_empty() {
            0.0
        } else {
            let matches = key_terms.iter().filter(|term| combined.contains(**term)).count();
            (matches as f64 / key_terms.len() as f64) * 0.6
        };

        if OFFICIAL_DOMAINS.iter().any(|domain| url.contains(domain)) {
            score += 0.3;
        }
        let score = score.min(1.0);

        max_confidence = max_confidence.max(score);
        if score >= 0.5 && relevant_urls.len() < 3 {
            relevant_urls.push(result.url.clone());
        }
    }

    RelevanceScore {
        verified: max_confidence >= 0.70,
        confidence: max_confidence,
        relevant_urls,
    }
}

/// A search client that always fails, for offline deployments.
pub struct NoSearchClient;

#[async_trait]
impl SearchClient for NoSearchClient {
    async fn query(&self, _text: &str) -> Result<Vec<SearchResult>> {
        Err(Error::Search("no search backend configured".to_string()))
    }
}

/// Scripted search backend for tests.
#[cfg(test)]
pub struct StaticSearch {
    pub results: Vec<SearchResult>,
}

#[cfg(test)]
#[async_trait]
impl SearchClient for StaticSearch {
    async fn query(&self, _text: &str) -> Result<Vec<SearchResult>> {
        Ok(self.results.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(title: &str, content: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            content: content.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn whole_phrase_match_scores_high() {
        let results = vec![result(
            "CVE-2024-12345 detail",
            "CVE-2024-12345 is a remote code execution flaw",
            "https://example.com/advisory",
        )];
        let score = score_results("CVE-2024-12345", &results);
        assert!((score.confidence - 0.9).abs() < 1e-9);
        assert!(score.verified);
        assert_eq!(score.relevant_urls.len(), 1);
    }

    #[test]
    fn official_domain_boosts_partial_match() {
        // 2 of 3 tokens match: 0.6 * 2/3 = 0.4, + 0.3 boost = 0.7.
        let results = vec![result(
            "Product Security Act guidance",
            "The Act 2022 requirements",
            "https://www.legislation.gov.uk/ukpga/2022/46",
        )];
        let score = score_results("PSTI Act 2022", &results);
        assert!((score.confidence - 0.7).abs() < 1e-9);
        assert!(score.verified);
    }

    #[test]
    fn confidence_is_capped_and_urls_limited_to_three() {
        let hit = result(
            "ISO 27001",
            "ISO 27001 certification overview",
            "https://www.iso.org/standard/27001",
        );
        let results = vec![hit.clone(), hit.clone(), hit.clone(), hit];
        let score = score_results("ISO 27001", &results);
        assert!((score.confidence - 1.0).abs() < 1e-9);
        assert_eq!(score.relevant_urls.len(), 3);
    }

    #[test]
    fn empty_results_are_unverified() {
        let score = score_results("CVE-2024-12345", &[]);
        assert_eq!(score, RelevanceScore::unverified());
    }

    #[test]
    fn citation_kinds_drive_query_templates() {
        let builder = SearchQueryBuilder;
        assert_eq!(CitationKind::classify("CVE-2024-1"), CitationKind::Cve);
        assert_eq!(CitationKind::classify("ISO 27001"), CitationKind::Standard);
        assert_eq!(CitationKind::classify("PSTI Act 2022"), CitationKind::Regulation);

        assert!(builder.build("CVE-2024-1").contains("vulnerability"));
        assert!(builder.build("ISO 27001").contains("certification"));
        assert!(builder.build("PSTI Act 2022").contains("Telecommunications"));
        assert!(builder.build("EU Regulation 2016/679").contains("directive"));
        assert!(builder.build("UK Directive 2014/53").contains("gov.uk"));
    }
}
