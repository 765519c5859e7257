//! Prompt templates for the agent graph.
//!
//! Templates are opaque strings to the rest of the crate: the core fills
//! the `{placeholder}` slots and never inspects the text. The JSON output
//! contracts embedded here must stay in sync with the serde shapes in
//! [`crate::schema`].

/// Substitute `{name}` placeholders in a template.
///
/// Unknown placeholders are left in place so a template change that adds a
/// slot fails loudly in tests rather than silently truncating.
pub fn fill(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in substitutions {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Generator ensemble prompt: one scenario in, one dual-factor assessment out.
pub const GENERATOR_PROMPT: &str = "\
You are an expert IoT risk assessor. Analyze the following IoT device scenario and provide a comprehensive risk assessment.

{reference_sources}

Device Scenario:
{risk_input}

TASK: Perform a Dual-Factor Risk Assessment. You must output TWO distinct scores that multiply to form the Final Risk Score.

IMPORTANT: In this framework, \"Likelihood\" means FREQUENCY of occurrence and prevalence in the current landscape, NOT theoretical probability of a future event.

DIMENSION 1: LIKELIHOOD/FREQUENCY (1-5) - how often does this risk state occur?
- 5 (Systemic/Constant): inherent in standard operation or near-universal user behavior; happens by default.
- 4 (Widespread/Common): present in a vast majority of devices or frequently exploited by automated tools.
- 3 (Targeted/Occasional): requires specific skills, targeted malice, or specific conditions.
- 2 (Rare/Proof-of-Concept): feasible in laboratory settings, rarely seen in the wild.
- 1 (Theoretical): no documented cases.
Do NOT lower the score because a careful user could prevent it; assume average, non-technical user behavior.

DIMENSION 2: IMPACT SEVERITY (1-5) - how severe is the damage when it occurs?
- 5 (Catastrophic): loss of life, severe physical harm, permanent infrastructure damage.
- 4 (Severe): major privacy breach, financial loss, identity theft.
- 3 (Moderate): service disruption or reversible damage.
- 1-2 (Minor): nuisance or minimal loss.

CALCULATION: final_risk_score = frequency_score x impact_score (1-25).
RISK CLASSIFICATION: Critical 20-25, High 12-19, Medium 6-11, Low 1-5.

Provide your assessment in the following JSON format:
{
    \"score\": <integer 1-5, legacy bucket of final_risk_score: 1-5=1, 6-10=2, 11-15=3, 16-20=4, 21-25=5>,
    \"reasoning\": {
        \"summary\": \"<brief summary of the risk>\",
        \"key_arguments\": [\"<argument 1>\", \"<argument 2>\"],
        \"regulatory_citations\": [\"<regulation 1>\"],
        \"vulnerabilities\": [\"<CVE or vulnerability 1>\"]
    },
    \"risk_assessment\": {
        \"frequency_score\": <integer 1-5>,
        \"frequency_rationale\": \"<one sentence on prevalence, not future probability>\",
        \"impact_score\": <integer 1-5>,
        \"impact_rationale\": \"<one sentence on severity of damage>\",
        \"final_risk_score\": <integer 1-25, frequency_score x impact_score>,
        \"risk_classification\": \"<Low/Medium/High/Critical>\"
    }
}

Be specific with regulatory citations (e.g., \"PSTI Act 2022\", \"ISO 27001\") and vulnerabilities (e.g., \"CVE-2024-12345\").";

/// Aggregator prompt: synthesize one assessment from the ensemble drafts.
pub const AGGREGATOR_PROMPT: &str = "\
You are synthesizing risk assessments from multiple expert models into one unified, consensus-driven assessment.

{reference_sources}

Individual Assessments:
{assessments}

REMINDER: \"Likelihood\" = frequency/prevalence across the current landscape, NOT future probability.

Analyze the reasoning traces, identify consensus points, and synthesize a unified assessment that reflects the majority logic, incorporates the strongest arguments, and keeps only citations supported by the assessments.

Respond with the same JSON format the individual assessments use (score, reasoning, risk_assessment).";

/// Aggregator revision prompt: revise the prior draft given critiques.
pub const AGGREGATOR_REVISION_PROMPT: &str = "\
You previously synthesized the risk assessment below. The challenger panel raised the critiques that follow. Revise the assessment to address every valid critique while keeping the parts that were not challenged.

{reference_sources}

Previous Assessment:
{previous_assessment}

Critiques:
{critiques}

Respond with the same JSON format as before (score, reasoning, risk_assessment).";

/// Challenger A: logic and calculation consistency.
pub const CHALLENGER_A_PROMPT: &str = "\
You are a logic consistency checker reviewing a dual-factor IoT risk assessment.

{reference_sources}

Legacy Score: {score}
Reasoning:
{reasoning}

Risk Assessment Breakdown:
{risk_assessment}

Check, with these tolerances:
1. frequency_score x impact_score must equal final_risk_score. Accept small presentation issues; reject only a calculation off by 3 or more.
2. Both frequency_rationale and impact_rationale must be present and non-trivial; reject if either is missing.
3. risk_classification must fit final_risk_score (Critical 20-25, High 12-19, Medium 6-11, Low 1-5). Accept an adjacent bucket; reject only a completely inconsistent label (e.g. score 20 labeled Low).
4. The arguments must support the scores.

Respond in JSON:
{
    \"is_valid\": <true/false>,
    \"issues\": [\"<issue 1>\"],
    \"confidence\": <0.0-1.0>,
    \"recommendation\": \"<accept/reject/needs_review>\"
}";

/// Challenger B: external source verification.
pub const CHALLENGER_B_PROMPT: &str = "\
You are a fact checker verifying the external validity of citations in an IoT risk assessment.

{reference_sources}

Assessment:
{assessment}

Citations under review:
{citations}

Web search evidence (verified flag, confidence, and supporting URLs per citation):
{search_results}

Decision rule: accept when at least half the citations verified OR every major citation (CVE identifiers, the PSTI Act, top-level ISO standards) verified; reject when most major citations failed verification; otherwise needs_review. List each unverified citation as an issue.

Respond in JSON:
{
    \"is_valid\": <true/false>,
    \"issues\": [\"<issue 1>\"],
    \"confidence\": <0.0-1.0>,
    \"recommendation\": \"<accept/reject/needs_review>\"
}";

/// Challenger C: safety and regulatory compliance coverage.
pub const CHALLENGER_C_PROMPT: &str = "\
You are a safety and compliance checker reviewing an IoT risk assessment.

{reference_sources}

Legacy Score: {score}
Reasoning:
{reasoning}

Check coverage of the key compliance checkpoints:
1. PSTI Act 2022 obligations (default passwords, vulnerability disclosure, update transparency) where the scenario touches them.
2. Data protection exposure (UK GDPR / EU GDPR) for any personal data the device collects.
3. Relevant security standards (ISO 27001/27002, ETSI EN 303 645).
4. Physical safety implications where the device actuates the physical world.

Accept when the major applicable checkpoints are addressed. Minor omissions are needs_review, not reject.

Respond in JSON:
{
    \"is_valid\": <true/false>,
    \"issues\": [\"<issue 1>\"],
    \"confidence\": <0.0-1.0>,
    \"recommendation\": \"<accept/reject/needs_review>\"
}";

/// Verifier consult: natural-language summary of the round.
pub const VERIFIER_PROMPT: &str = "\
You are the final arbiter of a multi-agent risk assessment round.

{reference_sources}

Assessment:
{assessment}

Challenger critiques this round:
{critiques}

Summarize whether the assessment should stand, be revised, or be escalated, and why, in two or three sentences. Then state the single word REVISE, ACCEPT, or ESCALATE on its own line.";

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fill_replaces_only_known_placeholders() {
        let out = fill("a {x} b {y} c {z}", &[("x", "1"), ("y", "2")]);
        assert_eq!(out, "a 1 b 2 c {z}");
    }

    #[test]
    fn generator_prompt_slots_are_fillable() {
        let out = fill(
            GENERATOR_PROMPT,
            &[("reference_sources", "SOURCES"), ("risk_input", "SCENARIO")],
        );
        assert!(out.contains("SOURCES"));
        assert!(out.contains("SCENARIO"));
        assert!(!out.contains("{reference_sources}"));
        assert!(!out.contains("{risk_input}"));
    }

    #[test]
    fn templates_keep_the_json_contract_fields() {
        for template in [CHALLENGER_A_PROMPT, CHALLENGER_B_PROMPT, CHALLENGER_C_PROMPT] {
            assert!(template.contains("\"is_valid\""));
            assert!(template.contains("\"recommendation\""));
        }
        assert!(GENERATOR_PROMPT.contains("\"risk_assessment\""));
        assert!(GENERATOR_PROMPT.contains("\"frequency_score\""));
    }
}
