//! Compiled execution of the assessment graph.
//!
//! The topology is fixed: `generator -> aggregator -> {A, B, C} ->
//! verifier`, with the verifier routing back to the aggregator (revise),
//! into the escalation handler, or out. The three challengers run
//! concurrently and join before the verifier; their critiques land in the
//! fixed enumeration order [A, B, C] so the "last three" round slice is
//! well defined.

mod state;

pub use state::{EscalationInfo, StatePatch, WorkflowState};

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::{
    current_round, escalation_triggers, round_approved, Aggregator, ChallengerA, ChallengerB,
    ChallengerC, EscalationHandler, GeneratorEnsemble, Route, RunContext, Verifier,
};
use crate::audit::ConversationRecord;
use crate::config::{ProviderCredentials, WorkflowConfig};
use crate::error::{Error, Result};
use crate::knowledge::KnowledgeBase;
use crate::llm::LlmFactory;
use crate::schema::ChallengerId;
use crate::search::{NoSearchClient, SearchClient, TavilySearchClient};

/// How a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    EndApproved,
    EndDegraded,
    EndEscalated,
    EndCancelled,
}

/// Options for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Persist the run result document on completion.
    pub save_artifact: bool,
    /// Override of the configured output directory.
    pub output_dir: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            save_artifact: true,
            output_dir: None,
        }
    }
}

impl RunOptions {
    pub fn without_artifact() -> Self {
        Self {
            save_artifact: false,
            output_dir: None,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

/// State observed after one node, for stream mode.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub node: &'static str,
    pub state: WorkflowState,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: TerminalStatus,
    pub state: WorkflowState,
    pub conversation: Vec<ConversationRecord>,
    pub artifact_path: Option<PathBuf>,
}

/// The compiled assessment graph.
///
/// Cheap to clone; runs share the factory (and its process-wide fallback
/// log) while audit state is per run.
#[derive(Clone)]
pub struct AssessmentGraph {
    config: WorkflowConfig,
    factory: Arc<LlmFactory>,
    search: Arc<dyn SearchClient>,
    kb: Option<Arc<dyn KnowledgeBase>>,
}

impl AssessmentGraph {
    pub fn new(
        config: WorkflowConfig,
        factory: Arc<LlmFactory>,
        search: Arc<dyn SearchClient>,
    ) -> Self {
        Self {
            config,
            factory,
            search,
            kb: None,
        }
    }

    /// Build from environment: credentials, configuration surface, and the
    /// search backend when a key is present.
    pub fn from_env() -> Result<Self> {
        let credentials = ProviderCredentials::from_env();
        let config = WorkflowConfig::from_env()?;
        let search: Arc<dyn SearchClient> = match &credentials.tavily {
            Some(key) => Arc::new(TavilySearchClient::new(key)),
            None => Arc::new(NoSearchClient),
        };
        let factory = Arc::new(
            LlmFactory::new(credentials, config.llm_request_timeout)
                .with_fallback_notices(config.log_fallback_events),
        );
        Ok(Self::new(config, factory, search))
    }

    pub fn with_knowledge_base(mut self, kb: Arc<dyn KnowledgeBase>) -> Self {
        self.kb = Some(kb);
        self
    }

    /// The shared factory, for heterogeneity reports and audit export.
    pub fn factory(&self) -> &Arc<LlmFactory> {
        &self.factory
    }

    /// Run to completion and return only the final result.
    pub async fn run(&self, risk_input: impl Into<String>, options: RunOptions) -> Result<RunResult> {
        self.execute(risk_input.into(), options, CancellationToken::new(), None)
            .await
    }

    /// Run with an external cancellation token. Cancellation is observed at
    /// every node boundary; a cancelled run returns its partial state.
    pub async fn run_cancellable(
        &self,
        risk_input: impl Into<String>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        self.execute(risk_input.into(), options, cancel, None).await
    }

    /// Run in stream mode: state snapshots are yielded after each node,
    /// and the final result arrives through the join handle.
    pub fn stream(
        &self,
        risk_input: impl Into<String>,
        options: RunOptions,
    ) -> (
        mpsc::UnboundedReceiver<StateSnapshot>,
        tokio::task::JoinHandle<Result<RunResult>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let graph = self.clone();
        let risk_input = risk_input.into();
        let handle = tokio::spawn(async move {
            graph
                .execute(risk_input, options, CancellationToken::new(), Some(tx))
                .await
        });
        (rx, handle)
    }

    async fn execute(
        &self,
        risk_input: String,
        options: RunOptions,
        cancel: CancellationToken,
        observer: Option<mpsc::UnboundedSender<StateSnapshot>>,
    ) -> Result<RunResult> {
        let available = self.factory.available_providers();
        if !available.iter().any(|(_, ok)| *ok) {
            return Err(Error::no_provider(
                "run",
                "no provider credentials configured",
            ));
        }
        if self.config.report_heterogeneity_status {
            for (provider, ok) in &available {
                info!(provider = %provider, available = ok, "provider availability");
            }
        }

        let config = &self.config;
        let deadline = config.llm_request_timeout;
        let kb = self.kb.clone();
        let output_dir = options
            .output_dir
            .clone()
            .unwrap_or_else(|| config.output_dir.clone());

        let generator = GeneratorEnsemble::new(
            self.factory.clone(),
            config.generator_specs.clone(),
            config.generator_temperature,
            deadline,
            kb.clone(),
        );
        let aggregator = Aggregator::new(
            self.factory.clone(),
            config.aggregator.clone(),
            config.aggregator_temperature,
            deadline,
            kb.clone(),
        );
        let challenger_a = ChallengerA::new(
            self.factory.clone(),
            config.challenger_a.clone(),
            config.challenger_temperature,
            deadline,
            kb.clone(),
        );
        let challenger_b = ChallengerB::new(
            self.factory.clone(),
            config.challenger_b.clone(),
            config.challenger_temperature,
            deadline,
            kb.clone(),
            self.search.clone(),
        );
        let challenger_c = ChallengerC::new(
            self.factory.clone(),
            config.challenger_c.clone(),
            config.challenger_temperature,
            deadline,
            kb.clone(),
        );
        let verifier = Verifier::new(
            self.factory.clone(),
            config.verifier.clone(),
            config.verifier_temperature,
            deadline,
            kb,
            config.max_revisions,
        );
        let escalation = EscalationHandler::new(&output_dir);

        let ctx = RunContext {
            audit: crate::audit::AuditRecorder::new(),
            cancel: cancel.clone(),
        };
        let mut state = WorkflowState::new(risk_input);

        macro_rules! cancelled {
            () => {
                return Ok(self.finish(TerminalStatus::EndCancelled, state, &ctx, None))
            };
        }

        // START -> generator
        let Some(patch) = with_cancel(&cancel, generator.run(&state, &ctx)).await else {
            cancelled!();
        };
        patch.apply(&mut state)?;
        if state.draft_assessments.len() != config.generator_specs.len() {
            return Err(Error::Internal(format!(
                "ensemble returned {} drafts for {} specs",
                state.draft_assessments.len(),
                config.generator_specs.len()
            )));
        }
        emit(&observer, "generator", &state);

        let status = loop {
            // generator/verifier -> aggregator
            let Some(patch) = with_cancel(&cancel, aggregator.run(&state, &ctx)).await else {
                cancelled!();
            };
            patch.apply(&mut state)?;
            emit(&observer, "aggregator", &state);

            // aggregator -> {A, B, C}, joined before the verifier
            let Some((patch_a, patch_b, patch_c)) = with_cancel(&cancel, async {
                tokio::join!(
                    challenger_a.run(&state, &ctx),
                    challenger_b.run(&state, &ctx),
                    challenger_c.run(&state, &ctx),
                )
            })
            .await
            else {
                cancelled!();
            };
            for (node, patch) in [
                ("challenger_a", patch_a),
                ("challenger_b", patch_b),
                ("challenger_c", patch_c),
            ] {
                patch.apply(&mut state)?;
                emit(&observer, node, &state);
            }
            validate_round(&state)?;

            // {A, B, C} -> verifier
            let Some((patch, route)) = with_cancel(&cancel, verifier.run(&state, &ctx)).await
            else {
                cancelled!();
            };
            let approved = round_approved(current_round(&state.critiques));
            patch.apply(&mut state)?;
            emit(&observer, "verifier", &state);

            match route {
                Route::Revise => continue,
                Route::Escalate => {
                    let triggers = escalation_triggers(&state, config.max_revisions);
                    escalation.run(&state, &ctx, &triggers).apply(&mut state)?;
                    emit(&observer, "escalation", &state);
                    break TerminalStatus::EndEscalated;
                }
                Route::End => {
                    break if approved {
                        TerminalStatus::EndApproved
                    } else {
                        TerminalStatus::EndDegraded
                    };
                }
            }
        };

        if config.report_heterogeneity_status {
            let report = self.factory.heterogeneity_report();
            info!(
                diversity = report.diversity_score,
                fallbacks = report.fallback_events.len(),
                "{}",
                report.message
            );
        }

        let artifact_path = if options.save_artifact {
            match crate::artifacts::save_run_result(&state, ctx.audit.snapshot(), &output_dir) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("failed to save run artifact: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(self.finish(status, state, &ctx, artifact_path))
    }

    fn finish(
        &self,
        status: TerminalStatus,
        state: WorkflowState,
        ctx: &RunContext,
        artifact_path: Option<PathBuf>,
    ) -> RunResult {
        RunResult {
            status,
            state,
            conversation: ctx.audit.snapshot(),
            artifact_path,
        }
    }
}

async fn with_cancel<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn emit(
    observer: &Option<mpsc::UnboundedSender<StateSnapshot>>,
    node: &'static str,
    state: &WorkflowState,
) {
    if let Some(tx) = observer {
        let _ = tx.send(StateSnapshot {
            node,
            state: state.clone(),
        });
    }
}

/// The critique log must consist of well-formed [A, B, C] rounds.
fn validate_round(state: &WorkflowState) -> Result<()> {
    if state.critiques.len() % 3 != 0 {
        return Err(Error::Internal(format!(
            "critique log length {} is not a multiple of 3",
            state.critiques.len()
        )));
    }
    let round = current_round(&state.critiques);
    let ids: Vec<ChallengerId> = round.iter().map(|c| c.challenger_id).collect();
    if ids != ChallengerId::ALL {
        return Err(Error::Internal(format!(
            "challenger round out of order: {ids:?}"
        )));
    }
    Ok(())
}
