//! Cost Query Pipeline - one conversational turn end to end
//!
//! load context -> extract -> gate -> resolve -> merge follow-up -> plan
//! -> scope -> execute -> synthesize -> persist
//!
//! Every failure becomes a [`Response`] through [`Response::from_error`];
//! `handle_turn` never returns an error to the caller.

use crate::adhoc::AdHocSqlGenerator;
use crate::classifier::{Gate, IntentClassifier};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::context::{ChatMessage, ContextManager, ConversationStore, LoadedContext, TurnCoordinator, TurnTicket};
use crate::error::{CostwiseError, Result};
use crate::execution::{AnalyticalEngine, QueryExecutor};
use crate::llm::LlmProvider;
use crate::observability::ScopeAuditLog;
use crate::plan::{QueryPlan, QueryPlanBuilder, ResolvedParams};
use crate::response::{Clarification, Response, ResponseMetadata, ScopeSummary, Status};
use crate::security::enforcer::AccountScopeEnforcer;
use crate::security::scope::{ScopeContext, ScopeProvider};
use crate::synth::{NarrativeBuilder, ResponseSynthesizer};
use crate::ups::heuristic::HeuristicClassifier;
use crate::ups::schema::IntentType;
use crate::ups::UpsExtractor;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

const GENERAL_INQUIRY_QUESTION: &str = "I can answer questions about spend by service, region, account or \
     purchase option: rankings, breakdowns, trends, anomalies, period comparisons, commitment \
     utilization, savings opportunities, tagging coverage and data freshness. Which of these would help?";

/// External collaborators the pipeline is wired to.
pub struct PipelineServices {
    pub engine: Arc<dyn AnalyticalEngine>,
    pub store: Arc<dyn ConversationStore>,
    pub scopes: Arc<dyn ScopeProvider>,
    /// `None` runs extraction on the heuristic classifier and uses template
    /// narratives.
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub clock: Arc<dyn Clock>,
    pub audit: ScopeAuditLog,
}

pub struct CostQueryPipeline {
    coordinator: TurnCoordinator,
    context: ContextManager,
    scopes: Arc<dyn ScopeProvider>,
    extractor: UpsExtractor,
    classifier: IntentClassifier,
    planner: QueryPlanBuilder,
    enforcer: AccountScopeEnforcer,
    executor: QueryExecutor,
    synthesizer: ResponseSynthesizer,
    narrative: NarrativeBuilder,
    ad_hoc: Option<AdHocSqlGenerator>,
    clock: Arc<dyn Clock>,
}

impl CostQueryPipeline {
    pub fn new(config: PipelineConfig, services: PipelineServices) -> Self {
        let enforcer = AccountScopeEnforcer::new(services.audit);
        let llm_timeout = config.extractor.llm_timeout;
        let heuristic = HeuristicClassifier::new(config.calibration.heuristic_cap);

        let narrative = match &services.llm {
            Some(llm) => NarrativeBuilder::with_llm(llm.clone(), llm_timeout),
            None => NarrativeBuilder::new(),
        };
        let ad_hoc = match (&services.llm, config.ad_hoc_sql_enabled) {
            (Some(llm), true) => Some(AdHocSqlGenerator::new(llm.clone(), enforcer.clone(), llm_timeout)),
            (None, true) => {
                warn!("ad hoc SQL is enabled but no LLM is configured; general inquiries will be clarified");
                None
            }
            _ => None,
        };

        Self {
            coordinator: TurnCoordinator::new(),
            context: ContextManager::new(services.store, services.clock.clone(), config.context.clone()),
            scopes: services.scopes,
            extractor: UpsExtractor::new(services.llm, heuristic, config.extractor.clone()),
            classifier: IntentClassifier::from_config(&config.classifier, config.calibration.clone()),
            planner: QueryPlanBuilder::new(services.clock.clone()),
            executor: QueryExecutor::new(services.engine, enforcer.clone(), config.executor.clone()),
            enforcer,
            synthesizer: ResponseSynthesizer::new(config.synth.clone()),
            narrative,
            ad_hoc,
            clock: services.clock,
        }
    }

    pub fn enforcer(&self) -> &AccountScopeEnforcer {
        &self.enforcer
    }

    /// Answer one message on a thread. A newer message on the same thread
    /// cancels this one; a cancelled turn never writes context.
    pub async fn handle_turn(&self, thread_id: &str, user_id: &str, message_text: &str) -> Response {
        let turn_id = Uuid::new_v4().to_string();
        let ticket = self.coordinator.begin(thread_id);
        let started = Instant::now();
        let span = info_span!("turn", thread_id = %thread_id, turn_id = %turn_id, generation = ticket.generation());

        let mut metadata = ResponseMetadata {
            turn_id: Some(turn_id),
            ..ResponseMetadata::default()
        };

        // Held until the assistant reply is logged, so the message log
        // follows turn order.
        let _turn = ticket.serialize().await;
        let outcome = self
            .run_turn(&ticket, user_id, message_text, &mut metadata)
            .instrument(span.clone())
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, CostwiseError::ExtractionFailure(_)) {
                    metadata.intent = Some(IntentType::GeneralInquiry.to_string());
                }
                match e.status() {
                    Status::Error => warn!(parent: &span, error = %e, "turn failed"),
                    _ => info!(parent: &span, error = %e, "turn ended without an answer"),
                }
                Response::from_error(&e, metadata)
            }
        };

        if ticket.is_current() {
            let reply = ChatMessage::assistant(response.text.clone(), self.clock.now());
            if let Err(e) = self.context.record_message(thread_id, reply).await {
                warn!(thread_id, error = %e, "failed to record assistant message");
            }
        }

        info!(
            thread_id,
            status = response.status.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn complete"
        );
        response
    }

    async fn run_turn(
        &self,
        ticket: &TurnTicket,
        user_id: &str,
        message: &str,
        metadata: &mut ResponseMetadata,
    ) -> Result<Response> {
        let thread_id = ticket.thread_id();
        check_cancelled(ticket)?;

        let loaded = self.context.load(thread_id).await?;
        self.context
            .record_message(thread_id, ChatMessage::user(message, self.clock.now()))
            .await?;
        let scope = self.scopes.scope_for(user_id).await?;

        let draft = self
            .extractor
            .extract(message, &loaded.history, loaded.previous_intent(), self.clock.today())
            .await?;
        check_cancelled(ticket)?;

        let classified = match self.classifier.gate(message, &draft) {
            Gate::Proceed(classified) => classified,
            Gate::Clarify {
                classified,
                clarification,
            } => {
                metadata.intent = Some(classified.intent.intent_type.to_string());
                metadata.confidence = Some(classified.intent.confidence);
                return Err(CostwiseError::LowConfidence {
                    intent: classified.intent.intent_type.to_string(),
                    confidence: classified.intent.confidence,
                    threshold: classified.threshold,
                    clarification,
                });
            }
        };
        let intent = classified.intent;
        metadata.intent = Some(intent.intent_type.to_string());
        metadata.confidence = Some(intent.confidence);

        let current = self.planner.resolve(&intent)?;
        let (params, _follow_up) = self.context.merge(&loaded, message, current);
        metadata.filters = params.describe_filters();

        let Some(plan) = self.plan(message, &params, &scope, thread_id).await? else {
            return Ok(Response::clarify(
                Clarification::new(GENERAL_INQUIRY_QUESTION),
                metadata.clone(),
            ));
        };
        metadata.template_id = Some(plan.template_id().to_string());
        metadata.time_period = plan.time_range().map(|r| r.label());

        let scoped = self.enforcer.post_generation(plan, &scope, Some(thread_id))?;
        metadata.scope = Some(ScopeSummary {
            account_ids: scoped.accounts().iter().map(|a| a.as_str().to_string()).collect(),
        });
        check_cancelled(ticket)?;

        let result = self
            .executor
            .execute(&scoped, &scope, Some(thread_id), ticket.token())
            .await?;

        let dimension = scoped.plan().bound_params().map(|b| b.dimension);
        let synthesis = self
            .synthesizer
            .synthesize(scoped.plan().intent_type(), dimension, &result);
        let labels: Vec<String> = metadata.time_period.iter().cloned().chain(metadata.filters.iter().cloned()).collect();
        let text = self.narrative.narrate(message, &synthesis.insights, &labels).await;

        self.persist(ticket, &loaded, params).await?;

        Ok(Response {
            status: Status::Ok,
            text,
            insights: synthesis.insights,
            table_rows: synthesis.table_rows,
            chart_specs: synthesis.chart_specs,
            executed_sql: Some(scoped.sql().to_string()),
            clarification: None,
            metadata: metadata.clone(),
        })
    }

    /// Template plan, or ad hoc SQL for general inquiries when enabled.
    /// `None` means the question needs a capability clarification.
    async fn plan(
        &self,
        message: &str,
        params: &ResolvedParams,
        scope: &ScopeContext,
        thread_id: &str,
    ) -> Result<Option<QueryPlan>> {
        if params.intent_type != IntentType::GeneralInquiry {
            return self.planner.build_from(params).map(Some);
        }
        match &self.ad_hoc {
            Some(generator) => generator.draft(message, params, scope, Some(thread_id)).await.map(Some),
            None => Ok(None),
        }
    }

    async fn persist(&self, ticket: &TurnTicket, loaded: &LoadedContext, params: ResolvedParams) -> Result<()> {
        // A superseded turn must not overwrite what the newer turn will write.
        check_cancelled(ticket)?;
        if !ticket.is_current() {
            return Err(CostwiseError::Cancelled("replaced by a newer message".to_string()));
        }
        let saved = self.context.persist(loaded, params).await?;
        info!(thread_id = %saved.thread_id, turn_count = saved.turn_count, "context persisted");
        Ok(())
    }
}

fn check_cancelled(ticket: &TurnTicket) -> Result<()> {
    if ticket.token().is_cancelled() {
        Err(CostwiseError::Cancelled("replaced by a newer message".to_string()))
    } else {
        Ok(())
    }
}
