use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveThresholds {
    /// `recent_average` above this keeps the current style.
    pub maintain_above: f64,
    /// `recent_average` below this simplifies.
    pub simplify_below: f64,
    pub variance_threshold: f64,
    pub recent_window: usize,
}

impl Default for DirectiveThresholds {
    fn default() -> Self {
        Self {
            maintain_above: 0.7,
            simplify_below: 0.4,
            variance_threshold: 0.1,
            recent_window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountAdjustment {
    pub low_feedback_below: f64,
    pub high_feedback_above: f64,
    pub min_reduction_factor: f64,
    pub max_reduction_factor: f64,
    pub min_boost_factor: f64,
    pub max_boost_factor: f64,
    pub min_items: u32,
}

impl Default for CountAdjustment {
    fn default() -> Self {
        Self {
            low_feedback_below: 0.4,
            high_feedback_above: 0.7,
            min_reduction_factor: 0.4,
            max_reduction_factor: 0.56,
            min_boost_factor: 1.2,
            max_boost_factor: 1.5,
            min_items: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsThresholds {
    pub weak_below: f64,
    pub strong_at_least: f64,
    pub min_attempts: u32,
}

impl Default for AnalyticsThresholds {
    fn default() -> Self {
        Self {
            weak_below: 60.0,
            strong_at_least: 80.0,
            min_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub interaction_log_cap: usize,
    pub param_floor: f64,
    pub recent_question_cap: usize,
    pub question_text_cap: usize,
    pub directives: DirectiveThresholds,
    pub counts: CountAdjustment,
    pub analytics: AnalyticsThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interaction_log_cap: 1000,
            param_floor: 0.1,
            recent_question_cap: 10,
            question_text_cap: 200,
            directives: DirectiveThresholds::default(),
            counts: CountAdjustment::default(),
            analytics: AnalyticsThresholds::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(cap) = std::env::var("INTERACTION_LOG_CAP")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
        {
            config.interaction_log_cap = cap;
        }
        config
    }
}
