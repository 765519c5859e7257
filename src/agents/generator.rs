//! Generator ensemble: fan one scenario out to N heterogeneous models.

use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::graph::{StatePatch, WorkflowState};
use crate::knowledge::{reference_sources, KnowledgeBase};
use crate::llm::{ClientRequest, GeneratorSpec, LlmFactory};
use crate::prompts::{fill, GENERATOR_PROMPT};
use crate::schema::RiskAssessment;

use super::{invoke_with_deadline, parse_assessment, RunContext};

/// Fan-out node producing one draft assessment per configured generator.
///
/// Returns exactly as many assessments as there are specs, in spec-list
/// order; any per-model failure is substituted with a degenerate
/// assessment so the downstream count is preserved.
pub struct GeneratorEnsemble {
    factory: Arc<LlmFactory>,
    specs: Vec<GeneratorSpec>,
    temperature: f64,
    deadline: Duration,
    kb: Option<Arc<dyn KnowledgeBase>>,
}

impl GeneratorEnsemble {
    pub fn new(
        factory: Arc<LlmFactory>,
        specs: Vec<GeneratorSpec>,
        temperature: f64,
        deadline: Duration,
        kb: Option<Arc<dyn KnowledgeBase>>,
    ) -> Self {
        Self {
            factory,
            specs,
            temperature,
            deadline,
            kb,
        }
    }

    #[instrument(skip_all, fields(ensemble = self.specs.len()))]
    pub async fn run(&self, state: &WorkflowState, ctx: &RunContext) -> StatePatch {
        let sources = reference_sources(self.kb.as_deref(), &state.risk_input).await;

        let tasks = self.specs.iter().enumerate().map(|(index, spec)| {
            let prompt = fill(
                GENERATOR_PROMPT,
                &[
                    ("reference_sources", sources.as_str()),
                    ("risk_input", state.risk_input.as_str()),
                ],
            );
            self.generate_one(spec, index, prompt, ctx)
        });

        // join_all preserves input order, so the drafts line up with the
        // spec list regardless of completion order.
        let assessments = join_all(tasks).await;
        StatePatch::drafts(assessments)
    }

    async fn generate_one(
        &self,
        spec: &GeneratorSpec,
        index: usize,
        prompt: String,
        ctx: &RunContext,
    ) -> RiskAssessment {
        let context_label = format!("generator_{index}");
        let intended = spec.label();

        let resolved = match self.factory.create(&ClientRequest::from_spec(
            spec,
            self.temperature,
            &context_label,
        )) {
            Ok(resolved) => resolved,
            Err(e) => {
                ctx.audit
                    .record_error("generator", "generator", &intended, &prompt, &e.to_string(), 0);
                return RiskAssessment::degenerate(&intended, &e.to_string());
            }
        };

        let actual = format!("{}/{}", resolved.actual_provider, resolved.actual_model);
        let mut extra = BTreeMap::new();
        extra.insert("intended_provider".to_string(), json!(spec.provider));
        extra.insert("intended_model".to_string(), json!(spec.model));
        extra.insert("actual_provider".to_string(), json!(resolved.actual_provider));
        extra.insert("actual_model".to_string(), json!(resolved.actual_model));
        extra.insert("fallback_used".to_string(), json!(resolved.was_fallback));

        let response =
            match invoke_with_deadline(resolved.client.as_ref(), &prompt, self.deadline).await {
                Ok(response) => response,
                Err(e) => {
                    ctx.audit.record_error(
                        "generator",
                        "generator",
                        &resolved.display_label(),
                        &prompt,
                        &e.to_string(),
                        0,
                    );
                    return RiskAssessment::degenerate(&intended, &e.to_string());
                }
            };

        ctx.audit.record(
            "generator",
            "generator",
            &resolved.display_label(),
            &prompt,
            &response,
            0,
            extra,
        );

        match parse_assessment(&response, &actual) {
            Ok(assessment) => assessment,
            Err(e) => {
                debug!(model = %actual, "generator response unparseable: {e}");
                RiskAssessment::degenerate(&intended, &e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderCredentials;
    use crate::llm::{Provider, ScriptedClient, ScriptedConstructor};
    use pretty_assertions::assert_eq;

    const GOOD_RESPONSE: &str = r#"{
        "score": 4,
        "reasoning": {
            "summary": "Default credentials expose the device",
            "key_arguments": ["admin/admin shipped by default"],
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

    fn factory_with(
        credentials: ProviderCredentials,
        respond: impl Fn(Provider, &str) -> crate::error::Result<Arc<dyn crate::llm::LlmClient>>
            + Send
            + Sync
            + 'static,
    ) -> Arc<LlmFactory> {
        Arc::new(
            LlmFactory::new(credentials, Duration::from_secs(5))
                .with_constructor(Box::new(ScriptedConstructor::new(respond)))
                .with_fallback_notices(false),
        )
    }

    fn all_creds() -> ProviderCredentials {
        Provider::ALL
            .iter()
            .fold(ProviderCredentials::default(), |creds, &p| {
                creds.with_key(p, "key")
            })
    }

    #[tokio::test]
    async fn ensemble_preserves_spec_order_and_count() {
        let factory = factory_with(all_creds(), |provider, model| {
            Ok(Arc::new(ScriptedClient::always(provider, model, GOOD_RESPONSE)))
        });
        let specs = vec![
            GeneratorSpec::new(Provider::OpenAi, "gpt-4o"),
            GeneratorSpec::new(Provider::Anthropic, "claude-3-5-sonnet-latest"),
            GeneratorSpec::new(Provider::Groq, "llama-3.3-70b-versatile"),
        ];
        let ensemble = GeneratorEnsemble::new(
            factory,
            specs.clone(),
            0.0,
            Duration::from_secs(5),
            None,
        );

        let ctx = RunContext::new();
        let state = WorkflowState::new("Device X: default password");
        let patch = ensemble.run(&state, &ctx).await;

        let drafts = patch.draft_assessments.unwrap();
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0].model_name, "openai/gpt-4o");
        assert_eq!(drafts[1].model_name, "anthropic/claude-3-5-sonnet-latest");
        assert_eq!(drafts[2].model_name, "groq/llama-3.3-70b-versatile");
        assert_eq!(ctx.audit.len(), 3);
    }

    #[tokio::test]
    async fn failures_substitute_degenerate_assessments() {
        let factory = factory_with(all_creds(), |provider, model| {
            if provider == Provider::Google {
                Ok(Arc::new(ScriptedClient::failing(provider, model, "503 upstream")))
            } else {
                Ok(Arc::new(ScriptedClient::always(provider, model, GOOD_RESPONSE)))
            }
        });
        let specs = vec![
            GeneratorSpec::new(Provider::OpenAi, "gpt-4o"),
            GeneratorSpec::new(Provider::Google, "gemini-1.5-pro"),
        ];
        let ensemble =
            GeneratorEnsemble::new(factory, specs, 0.0, Duration::from_secs(5), None);

        let ctx = RunContext::new();
        let state = WorkflowState::new("scenario");
        let patch = ensemble.run(&state, &ctx).await;

        let drafts = patch.draft_assessments.unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].model_name, "google/gemini-1.5-pro [ERROR]");
        assert_eq!(drafts[1].legacy_score, 3);
        assert!(drafts[1].breakdown.is_none());

        // The failed call is still in the audit log.
        let records = ctx.audit.snapshot();
        assert!(records.iter().any(|r| r.response.starts_with("ERROR:")));
    }

    #[tokio::test]
    async fn fallback_slots_report_the_actual_model() {
        // Only OpenAI credentialed; the anthropic slot declares a fallback.
        let creds = ProviderCredentials::default().with_key(Provider::OpenAi, "key");
        let factory = factory_with(creds, |provider, model| {
            Ok(Arc::new(ScriptedClient::always(provider, model, GOOD_RESPONSE)))
        });
        let specs = vec![GeneratorSpec::new(Provider::Anthropic, "claude-3-5-sonnet-latest")
            .with_fallback(Provider::OpenAi, "gpt-4o")];
        let ensemble =
            GeneratorEnsemble::new(factory.clone(), specs, 0.0, Duration::from_secs(5), None);

        let ctx = RunContext::new();
        let state = WorkflowState::new("scenario");
        let patch = ensemble.run(&state, &ctx).await;

        let drafts = patch.draft_assessments.unwrap();
        assert!(drafts[0].model_name.starts_with("openai/gpt-4o"));
        assert_eq!(factory.fallback_events().len(), 1);

        let records = ctx.audit.snapshot();
        assert_eq!(records[0].model_label, "openai/gpt-4o [FALLBACK]");
        assert_eq!(
            records[0].extra.get("fallback_used"),
            Some(&serde_json::Value::Bool(true))
        );
    }
}
