//! Content generation collaborator: turns source chunks into quiz,
//! flashcard or lesson JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::engine::types::{FeedbackContext, ModeId};
use crate::services::llm_provider::{LLMError, LLMProvider};

const DEFAULT_CHAR_BUDGET: usize = 50_000;
const CHUNK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub mode: ModeId,
    pub chunks: Vec<String>,
    #[serde(default)]
    pub item_count: Option<u32>,
    #[serde(default)]
    pub feedback_context: Option<FeedbackContext>,
    /// Free-form learner note appended to the prompt.
    #[serde(default)]
    pub context: Option<String>,
}

impl GenerationRequest {
    pub fn new(mode: ModeId, chunks: Vec<String>) -> Self {
        Self {
            mode,
            chunks,
            item_count: None,
            feedback_context: None,
            context: None,
        }
    }

    pub fn with_feedback(mut self, context: FeedbackContext) -> Self {
        self.item_count = context.adaptive_count.or(self.item_count);
        self.feedback_context = Some(context);
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn has_content(&self) -> bool {
        self.chunks.iter().any(|c| !c.trim().is_empty())
    }

    pub fn requested_items(&self) -> u32 {
        self.item_count.unwrap_or_else(|| default_item_count(self.mode)).max(1)
    }
}

pub fn default_item_count(mode: ModeId) -> u32 {
    match mode {
        ModeId::Quiz => 5,
        ModeId::Flashcard => 10,
        ModeId::Interactive => 3,
    }
}

/// Name of the array every well-formed result for `mode` must contain.
pub fn items_key(mode: ModeId) -> &'static str {
    match mode {
        ModeId::Quiz => "questions",
        ModeId::Flashcard => "flashcards",
        ModeId::Interactive => "steps",
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no non-empty source chunks")]
    NoChunks,
    #[error(transparent)]
    Llm(#[from] LLMError),
    #[error("malformed generator output: {0}")]
    Malformed(String),
    #[error("generator returned no {0}")]
    Empty(&'static str),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Returns the mode-specific JSON document.
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError>;
}

/// Default generator backed by an OpenAI-compatible chat model.
#[derive(Clone)]
pub struct LlmContentGenerator {
    provider: LLMProvider,
    char_budget: usize,
}

impl LlmContentGenerator {
    pub fn new(provider: LLMProvider) -> Self {
        Self {
            provider,
            char_budget: DEFAULT_CHAR_BUDGET,
        }
    }

    pub fn with_char_budget(mut self, budget: usize) -> Self {
        self.char_budget = budget.max(1);
        self
    }

    async fn request_document(&self, mode: ModeId, prompt: &str) -> Result<Value, GenerationError> {
        let raw = self.provider.complete_json(system_prompt(mode), prompt).await?;
        parse_document(mode, &raw)
    }

    async fn generate_quiz(
        &self,
        request: &GenerationRequest,
        prompt: String,
    ) -> Result<Value, GenerationError> {
        let wanted = request.requested_items() as usize;
        let document = self.request_document(ModeId::Quiz, &prompt).await?;
        let got = item_len(&document, ModeId::Quiz);

        if got * 2 >= wanted {
            return Ok(document);
        }

        tracing::warn!(wanted, got, "quiz came back short, retrying once");
        let retry_prompt = format!(
            "You previously generated only {got} questions, but exactly {wanted} are needed. \
             Generate {wanted} questions using ONLY the source content.\n\n{prompt}"
        );
        match self.request_document(ModeId::Quiz, &retry_prompt).await {
            Ok(retry) if item_len(&retry, ModeId::Quiz) > got => Ok(retry),
            Ok(_) => Ok(document),
            Err(err) => {
                tracing::warn!(error = %err, "quiz retry failed, keeping first result");
                Ok(document)
            }
        }
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        if !request.has_content() {
            return Err(GenerationError::NoChunks);
        }

        let source = prepare_source(&request.chunks, self.char_budget);
        let prompt = user_prompt(request, &source);
        tracing::info!(
            mode = %request.mode,
            items = request.requested_items(),
            source_chars = source.len(),
            "generating content"
        );

        match request.mode {
            ModeId::Quiz => self.generate_quiz(request, prompt).await,
            mode => self.request_document(mode, &prompt).await,
        }
    }
}

/// Numbers non-empty chunks `[Chunk n]` (1-based, original position) and
/// keeps the result within `budget` characters. When everything does not
/// fit, chunks are taken at an even stride so the whole document stays
/// represented.
pub fn prepare_source(chunks: &[String], budget: usize) -> String {
    let labelled: Vec<String> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.trim().is_empty())
        .map(|(i, c)| format!("[Chunk {}]\n{}", i + 1, c.trim()))
        .collect();

    let total: usize = labelled.iter().map(|c| c.len() + CHUNK_SEPARATOR.len()).sum();
    if total <= budget {
        return labelled.join(CHUNK_SEPARATOR);
    }

    let average = (total / labelled.len().max(1)).max(1);
    let fit = (budget / average).max(1);
    let stride = labelled.len().div_ceil(fit).max(1);

    let mut picked = Vec::new();
    let mut used = 0;
    for chunk in labelled.iter().step_by(stride) {
        let cost = chunk.len() + CHUNK_SEPARATOR.len();
        if used + cost > budget {
            break;
        }
        used += cost;
        picked.push(chunk.as_str());
    }

    if picked.is_empty() {
        // A single chunk larger than the whole budget.
        let mut head: String = labelled[0].chars().take(budget).collect();
        head.push_str("\n[truncated]");
        return head;
    }

    let omitted = labelled.len() - picked.len();
    tracing::warn!(total_chars = total, budget, omitted, "source sampled to fit budget");
    let mut text = picked.join(CHUNK_SEPARATOR);
    text.push_str(&format!(
        "{CHUNK_SEPARATOR}[Note: {omitted} additional chunks were omitted due to length limits]"
    ));
    text
}

/// Strips a surrounding Markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parses generator output and checks the mode's item array is non-empty.
pub fn parse_document(mode: ModeId, raw: &str) -> Result<Value, GenerationError> {
    let document: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| GenerationError::Malformed(e.to_string()))?;

    if !document.is_object() {
        return Err(GenerationError::Malformed("expected a JSON object".into()));
    }
    if item_len(&document, mode) == 0 {
        return Err(GenerationError::Empty(items_key(mode)));
    }
    Ok(document)
}

fn item_len(document: &Value, mode: ModeId) -> usize {
    document
        .get(items_key(mode))
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

fn feedback_section(context: Option<&FeedbackContext>) -> String {
    match context {
        Some(ctx) if ctx.has_feedback => format!(
            "\n\nFEEDBACK-BASED ADAPTATION:\n\
             Based on {} previous interactions:\n\
             - Average feedback: {:.1}% positive\n\
             - Recent feedback: {:.1}% positive\n\n\
             ADAPTATION GUIDELINES:\n{}\n\n\
             Adapt accordingly while still using ONLY the source content below.\n",
            ctx.feedback_count,
            ctx.average_feedback * 100.0,
            ctx.recent_average * 100.0,
            ctx.adaptation_instructions
        ),
        _ => String::new(),
    }
}

fn user_prompt(request: &GenerationRequest, source: &str) -> String {
    let n = request.requested_items();
    let feedback = feedback_section(request.feedback_context.as_ref());
    let note = request
        .context
        .as_deref()
        .map(|c| format!("\n\nLearner note: {}\n", c.trim()))
        .unwrap_or_default();

    let task = match request.mode {
        ModeId::Quiz => format!(
            "Generate exactly {n} multiple-choice questions. Return a JSON object:\n\
             {{\"questions\": [{{\"question\": \"...\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \
             \"correct_answer\": 0, \"explanation\": \"...\", \"source_reference\": \"Chunk N - ...\"}}]}}"
        ),
        ModeId::Flashcard => format!(
            "Generate {n} flashcards. Return a JSON object:\n\
             {{\"flashcards\": [{{\"front\": \"...\", \"back\": \"...\", \"source_reference\": \"Chunk N - ...\"}}]}}"
        ),
        ModeId::Interactive => format!(
            "Generate an interactive {n}-step lesson. Return a JSON object:\n\
             {{\"title\": \"...\", \"steps\": [{{\"step_number\": 1, \"title\": \"...\", \"content\": \"...\", \
             \"checkpoint\": \"...\", \"checkpoint_answer\": \"...\", \"source_reference\": \"Chunk N - ...\"}}]}}"
        ),
    };

    format!(
        "Use ONLY the source content below. In source_reference, cite the actual chunk number.\
         {feedback}{note}\n\nSource Content (numbered by chunk):\n{source}\n\n{task}"
    )
}

fn system_prompt(mode: ModeId) -> &'static str {
    match mode {
        ModeId::Quiz => {
            "You are an educational content generator. Create quiz questions based exclusively on the \
             provided source. Never add outside knowledge; generate fewer items rather than invent facts. \
             Always return valid JSON."
        }
        ModeId::Flashcard => {
            "You are an educational content generator. Create flashcards based exclusively on the \
             provided source, one concept per card. Never add outside knowledge. Always return valid JSON."
        }
        ModeId::Interactive => {
            "You are an educational content generator. Create step-by-step lessons with checkpoints based \
             exclusively on the provided source. Never add outside knowledge. Always return valid JSON."
        }
    }
}
