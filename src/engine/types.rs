use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::config::EngineConfig;

pub const PRIOR_ALPHA: f64 = 1.0;
pub const PRIOR_BETA: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeId {
    Quiz,
    Flashcard,
    Interactive,
}

impl ModeId {
    /// Fixed iteration order; recommendation ties resolve to the earliest entry.
    pub const ALL: [ModeId; 3] = [ModeId::Quiz, ModeId::Flashcard, ModeId::Interactive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Flashcard => "flashcard",
            Self::Interactive => "interactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "quiz" => Some(Self::Quiz),
            "flashcard" | "flashcards" => Some(Self::Flashcard),
            "interactive" => Some(Self::Interactive),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Quiz => "Quiz",
            Self::Flashcard => "Flashcards",
            Self::Interactive => "Interactive",
        }
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller may ask the generator for. `Mixed` fans out to every mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Quiz,
    Flashcard,
    Interactive,
    Mixed,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Flashcard => "flashcard",
            Self::Interactive => "interactive",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mixed" | "mixed_bundle" => Some(Self::Mixed),
            other => ModeId::parse(other).map(Self::from),
        }
    }

    pub fn mode(&self) -> Option<ModeId> {
        match self {
            Self::Quiz => Some(ModeId::Quiz),
            Self::Flashcard => Some(ModeId::Flashcard),
            Self::Interactive => Some(ModeId::Interactive),
            Self::Mixed => None,
        }
    }
}

impl From<ModeId> for ContentType {
    fn from(mode: ModeId) -> Self {
        match mode {
            ModeId::Quiz => Self::Quiz,
            ModeId::Flashcard => Self::Flashcard,
            ModeId::Interactive => Self::Interactive,
        }
    }
}

/// Onboarding answer. `Unknown` is the "I don't know" option and stores no preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningPreference {
    Quiz,
    Flashcard,
    Interactive,
    #[serde(rename = "i_dont_know")]
    Unknown,
}

impl LearningPreference {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "i_dont_know" | "unknown" | "" => Some(Self::Unknown),
            other => ModeId::parse(other).map(Self::from),
        }
    }

    pub fn mode(&self) -> Option<ModeId> {
        match self {
            Self::Quiz => Some(ModeId::Quiz),
            Self::Flashcard => Some(ModeId::Flashcard),
            Self::Interactive => Some(ModeId::Interactive),
            Self::Unknown => None,
        }
    }
}

impl From<ModeId> for LearningPreference {
    fn from(mode: ModeId) -> Self {
        match mode {
            ModeId::Quiz => Self::Quiz,
            ModeId::Flashcard => Self::Flashcard,
            ModeId::Interactive => Self::Interactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub mode: ModeId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentQuestion {
    pub text: String,
    pub correct: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkPerformance {
    pub correct: u32,
    pub incorrect: u32,
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_label: String,
    #[serde(default)]
    pub recent_questions: VecDeque<RecentQuestion>,
}

impl ChunkPerformance {
    pub fn new(source_label: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
            ..Self::default()
        }
    }

    /// Percent correct, 0.0 when nothing has been attempted.
    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.correct as f64 / self.attempts as f64 * 100.0
    }
}

/// Durable per-user learning state. One document per user, or one global
/// document when no user identity is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditState {
    #[serde(default)]
    pub mode_success: BTreeMap<ModeId, f64>,
    #[serde(default)]
    pub mode_failure: BTreeMap<ModeId, f64>,
    #[serde(default)]
    pub interaction_log: VecDeque<FeedbackEvent>,
    #[serde(default)]
    pub chunk_stats: BTreeMap<String, ChunkPerformance>,
    #[serde(default)]
    pub survey_completed: bool,
    #[serde(default)]
    pub declared_preference: Option<ModeId>,
    #[serde(default)]
    pub session_count: u32,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_registry: BTreeMap<String, String>,
}

impl Default for BanditState {
    fn default() -> Self {
        Self {
            mode_success: ModeId::ALL.iter().map(|m| (*m, PRIOR_ALPHA)).collect(),
            mode_failure: ModeId::ALL.iter().map(|m| (*m, PRIOR_BETA)).collect(),
            interaction_log: VecDeque::new(),
            chunk_stats: BTreeMap::new(),
            survey_completed: false,
            declared_preference: None,
            session_count: 0,
            last_updated: None,
            file_registry: BTreeMap::new(),
        }
    }
}

impl BanditState {
    pub fn success(&self, mode: ModeId) -> f64 {
        self.mode_success.get(&mode).copied().unwrap_or(PRIOR_ALPHA)
    }

    pub fn failure(&self, mode: ModeId) -> f64 {
        self.mode_failure.get(&mode).copied().unwrap_or(PRIOR_BETA)
    }

    pub fn push_event(&mut self, event: FeedbackEvent, cap: usize) {
        self.interaction_log.push_back(event);
        while self.interaction_log.len() > cap {
            self.interaction_log.pop_front();
        }
    }

    pub fn events_for(&self, mode: ModeId) -> impl Iterator<Item = &FeedbackEvent> {
        self.interaction_log.iter().filter(move |e| e.mode == mode)
    }

    /// Repairs documents written by older versions or edited by hand.
    pub fn normalize(&mut self, config: &EngineConfig) {
        let floor = config.param_floor;
        for mode in ModeId::ALL {
            let alpha = self.mode_success.entry(mode).or_insert(PRIOR_ALPHA);
            if !alpha.is_finite() || *alpha < floor {
                *alpha = if alpha.is_finite() { floor } else { PRIOR_ALPHA };
            }
            let beta = self.mode_failure.entry(mode).or_insert(PRIOR_BETA);
            if !beta.is_finite() || *beta < floor {
                *beta = if beta.is_finite() { floor } else { PRIOR_BETA };
            }
        }

        while self.interaction_log.len() > config.interaction_log_cap {
            self.interaction_log.pop_front();
        }

        for perf in self.chunk_stats.values_mut() {
            perf.attempts = perf.correct + perf.incorrect;
            while perf.recent_questions.len() > config.recent_question_cap {
                perf.recent_questions.pop_front();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommended_mode: ModeId,
    pub probabilities: BTreeMap<ModeId, f64>,
    pub samples: BTreeMap<ModeId, f64>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeStatistics {
    pub success_rate: f64,
    pub alpha: f64,
    pub beta: f64,
    pub total_feedback: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationTier {
    Maintain,
    Simplify,
    Balanced,
}

/// Feedback-derived generation parameters for one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackContext {
    pub mode: ModeId,
    pub has_feedback: bool,
    pub feedback_count: usize,
    pub average_feedback: f64,
    pub positive_rate: f64,
    pub recent_average: f64,
    pub recent_variance: Option<f64>,
    pub tier: AdaptationTier,
    pub mixed_difficulty: bool,
    pub adaptation_instructions: String,
    #[serde(default)]
    pub adaptive_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub chunk_key: String,
    pub source_label: String,
    pub accuracy: f64,
    pub correct: u32,
    pub incorrect: u32,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl ChunkReport {
    pub fn from_performance(chunk_key: &str, perf: &ChunkPerformance) -> Self {
        Self {
            chunk_key: chunk_key.to_string(),
            source_label: perf.source_label.clone(),
            accuracy: perf.accuracy(),
            correct: perf.correct,
            incorrect: perf.incorrect,
            attempts: perf.attempts,
            last_attempt: perf.last_attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_chunks: usize,
    pub total_attempts: u64,
    pub total_correct: u64,
    pub total_incorrect: u64,
    pub overall_accuracy: f64,
    pub chunks_with_data: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerOverview {
    pub survey_completed: bool,
    pub current_preference: Option<ModeId>,
    pub should_show_mixed: bool,
    pub session_count: u32,
}
