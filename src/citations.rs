//! Citation extraction from free-form reasoning text.
//!
//! Pure functions over text, no I/O. Matching is case-insensitive and the
//! extracted forms are normalized (`CVE-YYYY-NNNN`, `PSTI Act 2022`,
//! `ISO NNNNN[-N]`) so the verification pipeline sees one spelling per
//! citation.

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::OnceLock;

struct CitationPatterns {
    cve: Regex,
    psti: Regex,
    regulation: Regex,
    iso: Regex,
}

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("citation pattern must compile")
}

impl CitationPatterns {
    fn get() -> &'static Self {
        static PATTERNS: OnceLock<CitationPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            cve: case_insensitive(r"CVE[-\s]?(\d{4})[-\s]?(\d{4,7})"),
            psti: case_insensitive(r"PSTI(?:\s+Act)?(?:\s+2022)?"),
            regulation: case_insensitive(r"(?:EU|UK|US)\s+(?:Regulation|Directive)\s+\d+/\d+"),
            iso: case_insensitive(r"ISO[/\s]?(\d{4,5})(?:[-/](\d+))?"),
        })
    }
}

/// Extract and normalize citations (CVEs, regulations, standards).
#[derive(Debug, Clone, Copy, Default)]
pub struct CitationExtractor;

impl CitationExtractor {
    pub fn new() -> Self {
        Self
    }

    /// CVE identifiers, normalized to `CVE-YYYY-NNNN`.
    pub fn extract_cves(&self, text: &str) -> Vec<String> {
        let cves = CitationPatterns::get()
            .cve
            .captures_iter(text)
            .map(|caps| format!("CVE-{}-{}", &caps[1], &caps[2]))
            .collect();
        dedup_preserving_order(cves)
    }

    /// Regulatory citations: the PSTI Act and keyword-plus-number
    /// regulation/directive forms.
    pub fn extract_regulations(&self, text: &str) -> Vec<String> {
        let patterns = CitationPatterns::get();
        let mut regulations = Vec::new();

        if patterns.psti.is_match(text) {
            regulations.push("PSTI Act 2022".to_string());
        }
        regulations.extend(
            patterns
                .regulation
                .find_iter(text)
                .map(|m| m.as_str().trim().to_string()),
        );

        dedup_preserving_order(regulations)
    }

    /// ISO standards, normalized to `ISO NNNNN` or `ISO NNNNN-N`.
    pub fn extract_standards(&self, text: &str) -> Vec<String> {
        let standards = CitationPatterns::get()
            .iso
            .captures_iter(text)
            .map(|caps| match caps.get(2) {
                Some(part) => format!("ISO {}-{}", &caps[1], part.as_str()),
                None => format!("ISO {}", &caps[1]),
            })
            .collect();
        dedup_preserving_order(standards)
    }

    /// All categories combined, still de-duplicated in first-seen order.
    pub fn extract_all(&self, text: &str) -> Vec<String> {
        let mut citations = self.extract_cves(text);
        citations.extend(self.extract_regulations(text));
        citations.extend(self.extract_standards(text));
        dedup_preserving_order(citations)
    }
}

/// Remove duplicates while keeping the first occurrence of each entry.
///
/// Verification order must be deterministic, so a set is not enough.
pub fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cve_forms_are_normalized() {
        let extractor = CitationExtractor::new();
        let text = "Known issues: CVE-2024-12345, cve 2019 0708 and CVE2021-44228.";
        assert_eq!(
            extractor.extract_cves(text),
            vec!["CVE-2024-12345", "CVE-2019-0708", "CVE-2021-44228"]
        );
    }

    #[test]
    fn psti_mentions_collapse_to_one_citation() {
        let extractor = CitationExtractor::new();
        let text = "The PSTI act applies; PSTI Act 2022 bans default passwords.";
        assert_eq!(extractor.extract_regulations(text), vec!["PSTI Act 2022"]);
    }

    #[test]
    fn regulations_require_numeric_identifiers() {
        let extractor = CitationExtractor::new();
        let text = "See EU Regulation 2016/679 and UK Directive 2014/53. EU Regulation alone is not enough.";
        assert_eq!(
            extractor.extract_regulations(text),
            vec!["EU Regulation 2016/679", "UK Directive 2014/53"]
        );
    }

    #[test]
    fn iso_standards_are_normalized() {
        let extractor = CitationExtractor::new();
        let text = "Certified to iso 27001, ISO/27002 and ISO 81001-1.";
        assert_eq!(
            extractor.extract_standards(text),
            vec!["ISO 27001", "ISO 27002", "ISO 81001-1"]
        );
    }

    #[test]
    fn union_is_deduplicated_in_first_seen_order() {
        let extractor = CitationExtractor::new();
        let text = "CVE-2024-1111 under ISO 27001; CVE-2024-1111 again per PSTI Act 2022.";
        assert_eq!(
            extractor.extract_all(text),
            vec!["CVE-2024-1111", "PSTI Act 2022", "ISO 27001"]
        );
    }

    #[test]
    fn empty_text_yields_no_citations() {
        let extractor = CitationExtractor::new();
        assert!(extractor.extract_all("nothing to cite here").is_empty());
    }
}
