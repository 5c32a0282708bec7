//! Single entry point: decodes commands and routes them to the engine
//! and its collaborators.

pub mod command;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::analytics::PerformanceAnalytics;
use crate::engine::config::EngineConfig;
use crate::engine::feedback::{base_count, FeedbackSynthesizer};
use crate::engine::repository::StateRepository;
use crate::engine::thompson::{BanditEngine, UpdateOutcome};
use crate::engine::types::{
    BanditState, ContentType, LearnerOverview, LearningPreference, ModeId,
};
use crate::response::{CommandError, CommandResponse};
use crate::services::advisor::{ModeMix, PreferenceAdvisor};
use crate::services::bundle::BundleGenerator;
use crate::services::extraction::{ExtractionRequest, PlainTextExtractor, TextExtractor};
use crate::services::generator::{
    ContentGenerator, GenerationError, GenerationRequest, LlmContentGenerator,
};
use crate::services::llm_provider::LLMProvider;
use crate::store::{
    FileStateStore, PgStateStore, SqliteStateStore, StateKey, StoreChain, StoreError,
};

pub use command::Command;
pub use session::{SessionContext, SessionData};

const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_BUNDLE_WORKERS: usize = 3;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),
}

pub struct OrchestratorBuilder {
    key: StateKey,
    chain: StoreChain,
    engine: EngineConfig,
    generator: Arc<dyn ContentGenerator>,
    extractor: Arc<dyn TextExtractor>,
    advisor: PreferenceAdvisor,
    generation_timeout: Duration,
    bundle_workers: usize,
}

impl OrchestratorBuilder {
    pub fn engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn advisor(mut self, advisor: PreferenceAdvisor) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn bundle_workers(mut self, workers: usize) -> Self {
        self.bundle_workers = workers.max(1);
        self
    }

    pub fn build(self) -> Orchestrator {
        let engine = Arc::new(self.engine);
        let repo = StateRepository::new(self.key, self.chain, Arc::clone(&engine));

        Orchestrator {
            bandit: BanditEngine::new(repo.clone()),
            analytics: PerformanceAnalytics::new(repo.clone()),
            synthesizer: FeedbackSynthesizer::new(engine.as_ref().clone()),
            bundle: BundleGenerator::new(
                Arc::clone(&self.generator),
                self.bundle_workers,
                self.generation_timeout,
            ),
            generator: self.generator,
            extractor: self.extractor,
            advisor: self.advisor,
            generation_timeout: self.generation_timeout,
            sessions: SessionContext::new(),
            repo,
        }
    }
}

/// One learner's façade. Session context lives and dies with the instance.
pub struct Orchestrator {
    repo: StateRepository,
    bandit: BanditEngine,
    analytics: PerformanceAnalytics,
    synthesizer: FeedbackSynthesizer,
    generator: Arc<dyn ContentGenerator>,
    bundle: BundleGenerator,
    extractor: Arc<dyn TextExtractor>,
    advisor: PreferenceAdvisor,
    generation_timeout: Duration,
    sessions: SessionContext,
}

impl Orchestrator {
    pub fn builder(
        key: StateKey,
        chain: StoreChain,
        generator: Arc<dyn ContentGenerator>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            key,
            chain,
            engine: EngineConfig::default(),
            generator,
            extractor: Arc::new(PlainTextExtractor::default()),
            advisor: PreferenceAdvisor::default(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            bundle_workers: DEFAULT_BUNDLE_WORKERS,
        }
    }

    /// LLM-backed orchestrator over the configured store chain. A missing
    /// `LLM_API_KEY` is the one fatal condition.
    pub async fn from_config(config: &Config, user_id: Option<&str>) -> Result<Self, InitError> {
        let provider = LLMProvider::from_env();
        if !provider.is_available() {
            return Err(InitError::MissingCredential("LLM_API_KEY"));
        }

        let chain = default_chain(config).await;
        tracing::info!(backends = ?chain.backend_names(), "orchestrator ready");

        Ok(Self::builder(
            StateKey::from_option(user_id),
            chain,
            Arc::new(LlmContentGenerator::new(provider.clone())),
        )
        .engine_config(config.engine.clone())
        .advisor(PreferenceAdvisor::new(Some(provider)))
        .generation_timeout(config.generation_timeout)
        .bundle_workers(config.bundle_workers)
        .build())
    }

    pub fn sessions(&self) -> &SessionContext {
        &self.sessions
    }

    pub fn bandit(&self) -> &BanditEngine {
        &self.bandit
    }

    pub fn analytics(&self) -> &PerformanceAnalytics {
        &self.analytics
    }

    pub fn repository(&self) -> &StateRepository {
        &self.repo
    }

    /// Never fails: every error becomes a `{success: false, error, code}` response.
    pub async fn handle(
        &self,
        action: &str,
        params: &Value,
        session_id: Option<&str>,
    ) -> CommandResponse {
        let session_id = session_id
            .map(str::to_string)
            .or_else(|| params.get("session_id").and_then(Value::as_str).map(str::to_string))
            .filter(|s| !s.trim().is_empty());

        let result = match Command::decode(action, params) {
            Ok(command) => self.execute(command, session_id.as_deref()).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(response) => response,
            Err(err) => {
                if err.is_operational() {
                    tracing::warn!(action, code = err.code(), error = %err, "command rejected");
                } else {
                    tracing::error!(action, code = err.code(), error = %err, "command failed");
                }
                err.into()
            }
        }
    }

    pub async fn execute(
        &self,
        command: Command,
        session_id: Option<&str>,
    ) -> Result<CommandResponse, CommandError> {
        tracing::debug!(action = command.action(), session = ?session_id, "executing command");

        match command {
            Command::Extract { request, file_name } => {
                self.extract(request, file_name, session_id).await
            }
            Command::Generate {
                content_type,
                chunks,
                extracted_chunks,
                num_items,
                context,
            } => {
                let chunks = self.resolve_chunks(chunks, extracted_chunks, session_id);
                self.generate(content_type, chunks, num_items, context).await
            }
            Command::UpdateFeedback { mode, value } => {
                self.update_feedback(mode, value, session_id).await
            }
            Command::Recommend => {
                let recommendation = self.bandit.recommend().await;
                Ok(CommandResponse::ok()
                    .with("recommended_mode", recommendation.recommended_mode)
                    .with("probabilities", &recommendation.probabilities)
                    .with("samples", &recommendation.samples)
                    .with("confidence", recommendation.confidence))
            }
            Command::Survey { preference } => self.survey(preference).await,
            Command::ResetPreferences => {
                self.sessions.clear();
                self.repo.reset().await?;
                Ok(CommandResponse::ok().with("message", "Preferences reset successfully"))
            }
            Command::RecordAnswer {
                chunk_key,
                is_correct,
                question_text,
                source_label,
            } => {
                let report = self
                    .analytics
                    .record_answer(&chunk_key, is_correct, &question_text, &source_label)
                    .await?;
                Ok(CommandResponse::ok().with("chunk_key", &chunk_key).with("chunk", report))
            }
            Command::Analytics {
                weak_threshold,
                strong_threshold,
                min_attempts,
            } => {
                let thresholds = &self.repo.config().analytics;
                let min_attempts = min_attempts.unwrap_or(thresholds.min_attempts);
                let weak = self
                    .analytics
                    .weak_areas(weak_threshold.unwrap_or(thresholds.weak_below), min_attempts)
                    .await;
                let strong_at_least = strong_threshold.unwrap_or(thresholds.strong_at_least);
                let strong = self.analytics.strong_areas(strong_at_least, min_attempts).await;
                Ok(CommandResponse::ok()
                    .with("summary", self.analytics.summary().await)
                    .with("weak_areas", weak)
                    .with("strong_areas", strong))
            }
        }
    }

    async fn extract(
        &self,
        request: ExtractionRequest,
        file_name: Option<String>,
        session_id: Option<&str>,
    ) -> Result<CommandResponse, CommandError> {
        let extraction = self.extractor.extract(&request).await?;
        let chunks: Vec<String> = extraction
            .chunks
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if chunks.is_empty() {
            return Err(CommandError::NoChunks);
        }

        let mut response = CommandResponse::ok();
        if let Some(name) = file_name.as_deref() {
            match self.analytics.register_file(name).await {
                Ok(hash) => response = response.with("file_hash", hash),
                Err(err) => tracing::warn!(file = name, error = %err, "failed to register file"),
            }
        }

        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => {
                let minted = Uuid::new_v4().to_string();
                tracing::debug!(session = %minted, "no session id supplied, minted one");
                minted
            }
        };
        self.sessions
            .store(&session_id, chunks.clone(), extraction.summary.clone(), file_name);
        tracing::info!(session = %session_id, chunks = chunks.len(), "chunks stored in session");

        Ok(response
            .with("session_id", session_id)
            .with("chunk_count", chunks.len())
            .with("chunks", chunks)
            .with("summary", extraction.summary))
    }

    /// Request chunks first, then the session's, then `extracted_chunks`.
    /// Blank chunks are dropped at every step.
    fn resolve_chunks(
        &self,
        chunks: Vec<String>,
        extracted_chunks: Vec<String>,
        session_id: Option<&str>,
    ) -> Vec<String> {
        let non_blank = |mut chunks: Vec<String>| {
            chunks.retain(|c| !c.trim().is_empty());
            chunks
        };

        let chunks = non_blank(chunks);
        if !chunks.is_empty() {
            return chunks;
        }

        if let Some(id) = session_id {
            let from_session = non_blank(self.sessions.chunks(id));
            if !from_session.is_empty() {
                tracing::debug!(
                    session = id,
                    chunks = from_session.len(),
                    "chunks taken from session"
                );
                return from_session;
            }
        }

        non_blank(extracted_chunks)
    }

    async fn generate(
        &self,
        content_type: ContentType,
        chunks: Vec<String>,
        num_items: Option<u32>,
        context: Option<String>,
    ) -> Result<CommandResponse, CommandError> {
        if chunks.is_empty() {
            return Err(CommandError::NoChunks);
        }

        let state = self.repo.load().await;
        let request_for = |mode: ModeId| {
            let base = num_items.unwrap_or_else(|| base_count(mode.into(), chunks.len()));
            let feedback = self.synthesizer.context_with_count(mode, &state, base);
            GenerationRequest::new(mode, chunks.clone())
                .with_feedback(feedback)
                .with_context(context.clone())
        };

        match content_type.mode() {
            Some(mode) => {
                let request = request_for(mode);
                let item_count = request.requested_items();
                let feedback = request.feedback_context.clone();

                let pending = self.generator.generate(&request);
                let document = match tokio::time::timeout(self.generation_timeout, pending).await {
                    Ok(result) => result?,
                    Err(_) => return Err(GenerationError::Timeout(self.generation_timeout).into()),
                };

                tracing::info!(mode = %mode, item_count, "content generated");
                Ok(CommandResponse::ok()
                    .with("content_type", content_type)
                    .with("item_count", item_count)
                    .with("feedback_context", feedback)
                    .with("data", document))
            }
            None => {
                let requests: Vec<GenerationRequest> =
                    ModeId::ALL.iter().map(|m| request_for(*m)).collect();
                let outcome = self.bundle.generate(requests).await;
                let detail = outcome.error_detail();

                if !outcome.success() {
                    return Err(CommandError::Generation(
                        detail.unwrap_or_else(|| "Failed to generate".to_string()),
                    ));
                }

                let mut response = CommandResponse::ok()
                    .with("content_type", ContentType::Mixed)
                    .with("data", outcome.data());
                if let Some(detail) = detail {
                    tracing::warn!(detail = %detail, "mixed bundle partially generated");
                    response = response.with_error_detail(detail);
                }
                Ok(response)
            }
        }
    }

    async fn update_feedback(
        &self,
        mode: ModeId,
        value: f64,
        session_id: Option<&str>,
    ) -> Result<CommandResponse, CommandError> {
        match self.bandit.update(mode, value, session_id.map(str::to_string)).await {
            UpdateOutcome::Persisted => {
                let stats = self.bandit.mode_statistics().await;
                Ok(CommandResponse::ok()
                    .with("mode", mode)
                    .with("feedback", value.clamp(0.0, 1.0))
                    .with("statistics", stats.get(&mode)))
            }
            UpdateOutcome::Unpersisted => Err(CommandError::Persistence(StoreError::Unavailable(
                "feedback applied in memory but no state store accepted the write".into(),
            ))),
            UpdateOutcome::Ignored => Err(CommandError::InvalidParams(format!(
                "feedback value {value} was not usable"
            ))),
        }
    }

    async fn survey(
        &self,
        preference: LearningPreference,
    ) -> Result<CommandResponse, CommandError> {
        let mut state = self.repo.load().await;
        state.survey_completed = true;
        state.declared_preference = preference.mode();
        state.session_count += 1;
        state.last_updated = Some(Utc::now());
        self.repo.save(&state).await?;

        tracing::info!(preference = ?preference, sessions = state.session_count, "survey recorded");
        Ok(CommandResponse::ok()
            .with("preference", preference)
            .with("survey_completed", true))
    }

    pub async fn overview(&self) -> LearnerOverview {
        overview_of(&self.repo.load().await)
    }

    /// Suggested percentage mix, model-assisted when an LLM is configured.
    pub async fn advise(&self) -> ModeMix {
        let state = self.repo.load().await;
        let recommendation = self.bandit.recommend().await;
        let current = overview_of(&state).current_preference;
        self.advisor
            .advise(&state.interaction_log, current, &recommendation)
            .await
    }
}

pub fn overview_of(state: &BanditState) -> LearnerOverview {
    let current_preference = if state.survey_completed {
        state.declared_preference
    } else {
        None
    };
    LearnerOverview {
        survey_completed: state.survey_completed,
        current_preference,
        should_show_mixed: current_preference.is_none(),
        session_count: state.session_count,
    }
}

/// Postgres when `DATABASE_URL` is set, then SQLite when `SQLITE_PATH` is
/// set, then the JSON-file store. Backends that fail to open are skipped.
pub async fn default_chain(config: &Config) -> StoreChain {
    let mut builder = StoreChain::builder();

    if let Some(url) = config.database_url.as_deref() {
        match PgStateStore::connect(url).await {
            Ok(store) => builder = builder.with(store),
            Err(err) => tracing::warn!(error = %err, "postgres state store unavailable, skipping"),
        }
    }

    if let Some(path) = config.sqlite_path.as_deref() {
        match SqliteStateStore::open(path).await {
            Ok(store) => builder = builder.with(store),
            Err(err) => tracing::warn!(
                error = %err,
                path = %path.display(),
                "sqlite state store unavailable, skipping"
            ),
        }
    }

    builder.with(FileStateStore::new(config.state_dir.clone())).build()
}

