pub mod analytics;
pub mod config;
pub mod feedback;
pub mod repository;
pub mod thompson;
pub mod types;

pub use analytics::{chunk_key, short_hash, PerformanceAnalytics};
pub use config::EngineConfig;
pub use feedback::{base_count, FeedbackSynthesizer};
pub use repository::StateRepository;
pub use thompson::{BanditEngine, UpdateOutcome};
pub use types::{
    AdaptationTier, BanditState, ChunkPerformance, ChunkReport, ContentType, FeedbackContext,
    FeedbackEvent, LearnerOverview, LearningPreference, ModeId, ModeStatistics,
    PerformanceSummary, Recommendation,
};
