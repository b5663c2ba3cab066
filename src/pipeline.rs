//! Query answering pipeline
//!
//! classify → assemble → build prompt → generate → format, one turn at a
//! time per session. Every failure inside a turn ends in a user-visible
//! answer; only closing the session ends a turn without one.

use crate::classifier::QueryClassifier;
use crate::config::{AppConfig, GatewayConfig, PipelineConfig};
use crate::context::ContextAssembler;
use crate::error::{AssemblyError, PipelineError, StoreError};
use crate::formatter::ResponseFormatter;
use crate::gateway::{EventSink, GenerationGateway, OutboundRateLimiter};
use crate::models::{ClassifiedQuery, Company, ContextBundle, ConversationTurn, Intent, ResponseMode, UserResponse};
use crate::prompt::PromptBuilder;
use crate::session::Session;
use crate::store::{open_store, FinancialRecordStore};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Pipeline {
    store: Arc<dyn FinancialRecordStore>,
    assembler: ContextAssembler,
    prompts: PromptBuilder,
    gateway: GenerationGateway,
    history_turns: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn FinancialRecordStore>,
        gateway: GenerationGateway,
        pipeline: &PipelineConfig,
        generation: &GatewayConfig,
    ) -> Self {
        Self {
            store,
            assembler: ContextAssembler::new(pipeline.context_periods),
            prompts: PromptBuilder::new(pipeline.history_turns, generation.max_tokens, generation.temperature),
            gateway,
            history_turns: pipeline.history_turns,
        }
    }

    /// Store, gateway chain and sizing all taken from `config`
    pub fn from_config(
        config: &AppConfig,
        limiter: Arc<OutboundRateLimiter>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, StoreError> {
        let store = open_store(config.database_url.as_deref())?;
        let gateway = GenerationGateway::from_config(config, limiter, sink);
        info!(backends = ?gateway.backend_names(), "Generation chain ready");
        Ok(Self::new(store, gateway, &config.pipeline, &config.gateway))
    }

    pub async fn companies(&self) -> Result<Vec<Company>, StoreError> {
        self.store.list_known_companies().await
    }

    pub fn gateway(&self) -> &GenerationGateway {
        &self.gateway
    }

    /// Answer one query in `session`. Queries on the same session run one
    /// at a time in arrival order; a turn cut short by `Session::close`
    /// leaves the history untouched.
    pub async fn answer(&self, session: &Session, query: &str) -> Result<UserResponse, PipelineError> {
        if session.is_closed() {
            return Err(PipelineError::SessionClosed(session.id()));
        }

        let mut history = tokio::select! {
            biased;
            _ = session.closed() => return Err(PipelineError::SessionClosed(session.id())),
            guard = session.lock_history() => guard,
        };

        let recent = history.recent(self.history_turns);
        let response = tokio::select! {
            biased;
            _ = session.closed() => {
                info!(session_id = %session.id(), "Session closed mid-turn, discarding answer");
                return Err(PipelineError::SessionClosed(session.id()));
            }
            response = self.run_turn(&recent, query) => response,
        };

        if response.mode != ResponseMode::Apology {
            history.push(ConversationTurn::new(query.trim(), response.text.clone()));
        }
        Ok(response)
    }

    async fn run_turn(&self, history: &[ConversationTurn], query: &str) -> UserResponse {
        let query = query.trim();

        let known = match self.store.list_known_companies().await {
            Ok(known) => known,
            Err(e) => {
                error!("Record store unavailable: {}", e);
                return ResponseFormatter::apology();
            }
        };

        let classified = QueryClassifier::classify(query, &known);
        info!(
            intent = %classified.intent,
            companies = ?classified.entities.companies,
            "Query classified"
        );

        if classified.intent == Intent::Unsupported {
            return self.clarify(classified, &known, history, query);
        }

        let bundle = match self.assembler.assemble(&classified, self.store.as_ref()).await {
            Ok(bundle) => bundle,
            Err(AssemblyError::NoOverlappingPeriods(names)) => {
                warn!(companies = ?names, "No shared reporting period, using latest per company");
                match self.assembler.assemble_latest_per_company(&classified, self.store.as_ref()).await {
                    Ok(bundle) => bundle,
                    Err(e) => return recover(e),
                }
            }
            Err(e) => return recover(e),
        };

        let payload = self.prompts.build(bundle, history, query);
        let result = self.gateway.generate(&payload).await;
        ResponseFormatter::format(result)
    }

    fn clarify(
        &self,
        classified: ClassifiedQuery,
        known: &[Company],
        history: &[ConversationTurn],
        query: &str,
    ) -> UserResponse {
        let mut bundle = ContextBundle::empty(classified);
        bundle.company_names = known.iter().map(|c| (c.id.clone(), c.name.clone())).collect();

        let payload = self.prompts.build(bundle, history, query);
        ResponseFormatter::clarification(payload.clarification.unwrap_or_default())
    }
}

fn recover(error: AssemblyError) -> UserResponse {
    match error {
        AssemblyError::UnknownCompany(id) => {
            error!(company_id = %id, "Classified company missing from record store");
        }
        other => {
            error!("Context assembly failed: {}", other);
        }
    }
    ResponseFormatter::apology()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::formatter::APOLOGY;
    use crate::gateway::{degraded_answer, MockBackend, MockReply};
    use crate::models::{FinancialRecord, MetricType};
    use crate::store::tests::{company, usd};
    use crate::store::{InMemoryRecordStore, RecordQuery};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pipeline_with(store: Arc<dyn FinancialRecordStore>, gateway: GenerationGateway) -> Pipeline {
        Pipeline::new(store, gateway, &PipelineConfig::default(), &GatewayConfig::default())
    }

    fn fast_gateway_config() -> GatewayConfig {
        GatewayConfig {
            request_timeout: Duration::from_millis(50),
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            ..GatewayConfig::default()
        }
    }

    fn sample() -> Arc<dyn FinancialRecordStore> {
        Arc::new(InMemoryRecordStore::sample().unwrap())
    }

    #[tokio::test]
    async fn test_comparison_quotes_both_companies() {
        let backend = Arc::new(MockBackend::new("echo", MockReply::Echo));
        let pipeline = pipeline_with(sample(), GenerationGateway::new(backend.clone(), GatewayConfig::default()));
        let session = Session::new(10);

        let response = pipeline
            .answer(&session, "Compare Shell and BP revenue for Q1 2024")
            .await
            .unwrap();

        assert_eq!(response.mode, ResponseMode::Generated);
        assert!(response.text.contains("72,478.00 million USD"));
        assert!(response.text.contains("49,883.00 million USD"));
        assert_eq!(backend.calls(), 1);
        assert_eq!(session.turn_count().await, 1);
    }

    #[tokio::test]
    async fn test_off_topic_query_never_reaches_a_backend() {
        let backend = Arc::new(MockBackend::replying("primary", "should not be used"));
        let pipeline = pipeline_with(sample(), GenerationGateway::new(backend.clone(), GatewayConfig::default()));
        let session = Session::new(10);

        let response = pipeline.answer(&session, "What's the weather today?").await.unwrap();

        assert_eq!(response.mode, ResponseMode::Clarification);
        assert!(response.text.contains("Shell"));
        assert!(response.text.contains("Chevron"));
        assert_eq!(backend.calls(), 0);

        let blank = pipeline.answer(&session, "   ").await.unwrap();
        assert_eq!(blank.mode, ResponseMode::Clarification);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_total_outage_returns_template_answer() {
        let primary = Arc::new(MockBackend::new("primary", MockReply::Stall(Duration::from_secs(5))));
        let secondary = Arc::new(MockBackend::failing("secondary", BackendError::Unavailable("503".into())));
        let gateway = GenerationGateway::new(primary.clone(), fast_gateway_config()).with_fallback(secondary.clone());
        let store = sample();
        let pipeline = pipeline_with(Arc::clone(&store), gateway);
        let session = Session::new(10);

        let query = "How did Shell perform in Q3 2024?";
        let response = pipeline.answer(&session, query).await.unwrap();

        let known = store.list_known_companies().await.unwrap();
        let classified = QueryClassifier::classify(query, &known);
        let expected = ContextAssembler::default().assemble(&classified, store.as_ref()).await.unwrap();

        assert!(response.is_degraded());
        assert_eq!(response.text, degraded_answer(&expected));
        assert!(response.text.contains("Revenue for Shell in Q3 2024 was 71,089.00 million USD."));
        assert!(response.text.contains("Derived for Shell in Q3 2024: profit margin 6.04% (weak)"));
        assert_eq!(primary.calls(), 2);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_periods_answer_with_latest_each() {
        let store = InMemoryRecordStore::builder()
            .company(company("shell", "Shell", "SHEL", &[]))
            .company(company("bp", "BP", "BP", &[]))
            .record(usd("shell", 2023, 4, MetricType::Revenue, 70_000.0))
            .record(usd("bp", 2024, 1, MetricType::Revenue, 50_000.0))
            .build()
            .unwrap();
        let backend = Arc::new(MockBackend::new("echo", MockReply::Echo));
        let pipeline = pipeline_with(Arc::new(store), GenerationGateway::new(backend, GatewayConfig::default()));
        let session = Session::new(10);

        let response = pipeline.answer(&session, "Compare Shell and BP revenue").await.unwrap();
        assert_eq!(response.mode, ResponseMode::Generated);
        assert!(response.text.contains("70,000.00 million USD"));
        assert!(response.text.contains("50,000.00 million USD"));
        assert!(response.text.contains("no reporting period in common"));
    }

    /// Lists a company on the first call only, so assembly cannot find it
    struct VanishingStore {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FinancialRecordStore for VanishingStore {
        async fn list_known_companies(&self) -> Result<Vec<Company>, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![company("shell", "Shell", "SHEL", &[])])
            } else {
                Ok(Vec::new())
            }
        }

        async fn list_records(&self, _: &str, _: &RecordQuery) -> Result<Vec<FinancialRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl FinancialRecordStore for BrokenStore {
        async fn list_known_companies(&self) -> Result<Vec<Company>, StoreError> {
            Err(StoreError::InvalidData("corrupt".into()))
        }

        async fn list_records(&self, _: &str, _: &RecordQuery) -> Result<Vec<FinancialRecord>, StoreError> {
            Err(StoreError::InvalidData("corrupt".into()))
        }
    }

    #[tokio::test]
    async fn test_store_inconsistency_yields_apology() {
        let backend = Arc::new(MockBackend::replying("primary", "unused"));
        let session = Session::new(10);

        let vanishing = pipeline_with(
            Arc::new(VanishingStore {
                calls: AtomicUsize::new(0),
            }),
            GenerationGateway::new(backend.clone(), GatewayConfig::default()),
        );
        let response = vanishing.answer(&session, "How is Shell doing?").await.unwrap();
        assert_eq!(response.text, APOLOGY);

        let broken = pipeline_with(
            Arc::new(BrokenStore),
            GenerationGateway::new(backend.clone(), GatewayConfig::default()),
        );
        let response = broken.answer(&session, "How is Shell doing?").await.unwrap();
        assert!(response.is_error());

        assert_eq!(backend.calls(), 0);
        assert_eq!(session.turn_count().await, 0);
    }

    #[tokio::test]
    async fn test_queries_on_one_session_run_in_order() {
        let backend = Arc::new(MockBackend::new("echo", MockReply::Echo).with_latency(Duration::from_millis(40)));
        let pipeline = Arc::new(pipeline_with(
            sample(),
            GenerationGateway::new(backend, GatewayConfig::default()),
        ));
        let session = Arc::new(Session::new(10));

        let first = {
            let (pipeline, session) = (Arc::clone(&pipeline), Arc::clone(&session));
            tokio::spawn(async move { pipeline.answer(&session, "How did Shell do in Q1 2024?").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let (pipeline, session) = (Arc::clone(&pipeline), Arc::clone(&session));
            tokio::spawn(async move { pipeline.answer(&session, "And BP in Q1 2024?").await })
        };

        first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        // The second prompt already saw the first turn
        assert!(second.text.contains("- User: How did Shell do in Q1 2024?"));

        let turns = session.history().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].query, "How did Shell do in Q1 2024?");
        assert_eq!(turns[1].query, "And BP in Q1 2024?");
    }

    #[tokio::test]
    async fn test_closing_session_cancels_turn() {
        let backend = Arc::new(MockBackend::replying("slow", "too late").with_latency(Duration::from_secs(5)));
        let pipeline = Arc::new(pipeline_with(
            sample(),
            GenerationGateway::new(backend, GatewayConfig::default()),
        ));
        let session = Arc::new(Session::new(10));

        let pending = {
            let (pipeline, session) = (Arc::clone(&pipeline), Arc::clone(&session));
            tokio::spawn(async move { pipeline.answer(&session, "How did Chevron do?").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close();

        let result = tokio::time::timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert_eq!(result, Err(PipelineError::SessionClosed(session.id())));
        assert_eq!(session.turn_count().await, 0);

        let after = pipeline.answer(&session, "How did Chevron do?").await;
        assert!(matches!(after, Err(PipelineError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_history_feeds_later_prompts() {
        let backend = Arc::new(MockBackend::new("echo", MockReply::Echo));
        let pipeline = pipeline_with(sample(), GenerationGateway::new(backend, GatewayConfig::default()));
        let session = Session::new(10);

        for question in ["Shell revenue in 2024", "BP revenue in 2024", "Chevron revenue in 2024"] {
            let response = tokio_test::assert_ok!(pipeline.answer(&session, question).await);
            assert_eq!(response.mode, ResponseMode::Generated);
        }
        let last = pipeline.answer(&session, "ExxonMobil revenue in 2024").await.unwrap();
        assert!(last.text.contains("- User: BP revenue in 2024"));
        assert!(last.text.contains("- User: Chevron revenue in 2024"));
        assert_eq!(session.turn_count().await, 4);
    }
}
