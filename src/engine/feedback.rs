//! Turns a learner's feedback history for one mode into generation
//! parameters: an adaptation directive and an adjusted item count.

use crate::engine::config::EngineConfig;
use crate::engine::types::{AdaptationTier, BanditState, ContentType, FeedbackContext, ModeId};

const MIXED_DIFFICULTY_CLAUSE: &str =
    "User preferences vary across recent sessions: mix difficulty levels and formats.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentSize {
    Small,
    Medium,
    Large,
}

impl DocumentSize {
    fn of(num_chunks: usize) -> Self {
        match num_chunks {
            0..=10 => Self::Small,
            11..=50 => Self::Medium,
            _ => Self::Large,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackSynthesizer {
    config: EngineConfig,
}

impl FeedbackSynthesizer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn build_context(&self, mode: ModeId, state: &BanditState) -> FeedbackContext {
        let values: Vec<f64> = state.events_for(mode).map(|e| e.value).collect();
        self.context_from_values(mode, &values)
    }

    /// `values` must be in chronological order.
    pub fn context_from_values(&self, mode: ModeId, values: &[f64]) -> FeedbackContext {
        if values.is_empty() {
            return neutral_context(mode);
        }

        let thresholds = &self.config.directives;
        let count = values.len();
        let average_feedback = mean(values);
        let positive_rate = values.iter().filter(|v| **v > 0.5).count() as f64 / count as f64;

        let window = thresholds.recent_window.max(1);
        let recent = &values[count.saturating_sub(window)..];
        let recent_average = mean(recent);
        let recent_variance = sample_variance(recent);

        let tier = if recent_average > thresholds.maintain_above {
            AdaptationTier::Maintain
        } else if recent_average < thresholds.simplify_below {
            AdaptationTier::Simplify
        } else {
            AdaptationTier::Balanced
        };

        let mixed_difficulty = recent_variance.is_some_and(|v| v > thresholds.variance_threshold);

        let mut adaptation_instructions = directive(mode, tier).to_string();
        if mixed_difficulty {
            adaptation_instructions.push('\n');
            adaptation_instructions.push_str(MIXED_DIFFICULTY_CLAUSE);
        }

        FeedbackContext {
            mode,
            has_feedback: true,
            feedback_count: count,
            average_feedback,
            positive_rate,
            recent_average,
            recent_variance,
            tier,
            mixed_difficulty,
            adaptation_instructions,
            adaptive_count: None,
        }
    }

    /// Scales `base_count` by a factor proportional to the all-time average.
    ///
    /// Below 0.4 the factor runs 0.4..0.56 (lower feedback, smaller factor),
    /// floored at `min_items`. Above 0.7 it runs 1.2..1.5, capped at twice
    /// the base. In between the count is unchanged.
    pub fn adjust_count(&self, base_count: u32, context: &FeedbackContext) -> u32 {
        if !context.has_feedback {
            return base_count;
        }

        let rules = &self.config.counts;
        let avg = context.average_feedback.clamp(0.0, 1.0);

        if avg < rules.low_feedback_below {
            let position = avg / rules.low_feedback_below;
            let factor = rules.min_reduction_factor
                + position * (rules.max_reduction_factor - rules.min_reduction_factor);
            let reduced = (base_count as f64 * factor).round() as u32;
            reduced.max(rules.min_items).min(base_count.max(rules.min_items))
        } else if avg > rules.high_feedback_above {
            let position = (avg - rules.high_feedback_above) / (1.0 - rules.high_feedback_above);
            let factor = rules.min_boost_factor
                + position * (rules.max_boost_factor - rules.min_boost_factor);
            let boosted = (base_count as f64 * factor).round() as u32;
            boosted.min(base_count.saturating_mul(2))
        } else {
            base_count
        }
    }

    /// Context with `adaptive_count` filled in for the given base.
    pub fn context_with_count(
        &self,
        mode: ModeId,
        state: &BanditState,
        base_count: u32,
    ) -> FeedbackContext {
        let mut context = self.build_context(mode, state);
        context.adaptive_count = Some(self.adjust_count(base_count, &context));
        context
    }
}

/// Size-driven item count before any feedback adjustment.
pub fn base_count(content_type: ContentType, num_chunks: usize) -> u32 {
    let n = num_chunks as u32;
    let size = DocumentSize::of(num_chunks);
    match content_type {
        ContentType::Quiz => {
            let cap = match size {
                DocumentSize::Small => 10,
                DocumentSize::Medium => 15,
                DocumentSize::Large => 20,
            };
            (n / 2).clamp(3, cap)
        }
        ContentType::Flashcard => {
            let cap = match size {
                DocumentSize::Small => 15,
                DocumentSize::Medium => 20,
                DocumentSize::Large => 30,
            };
            n.clamp(5, cap)
        }
        ContentType::Interactive => {
            let cap = match size {
                DocumentSize::Small => 5,
                DocumentSize::Medium => 7,
                DocumentSize::Large => 10,
            };
            (n / 3).clamp(2, cap)
        }
        ContentType::Mixed => 5,
    }
}

fn neutral_context(mode: ModeId) -> FeedbackContext {
    FeedbackContext {
        mode,
        has_feedback: false,
        feedback_count: 0,
        average_feedback: 0.5,
        positive_rate: 0.5,
        recent_average: 0.5,
        recent_variance: None,
        tier: AdaptationTier::Balanced,
        mixed_difficulty: false,
        adaptation_instructions: "Provide balanced, clear content.".to_string(),
        adaptive_count: None,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(sum_sq / (values.len() - 1) as f64)
}

fn directive(mode: ModeId, tier: AdaptationTier) -> &'static str {
    match (mode, tier) {
        (ModeId::Quiz, AdaptationTier::Maintain) => {
            "The user responds well to the current quizzes. Keep the same question style and difficulty, with clear and precise wording."
        }
        (ModeId::Quiz, AdaptationTier::Simplify) => {
            "The user has found recent quizzes hard or unengaging. Simplify significantly: use straightforward questions on core facts, unambiguous options and encouraging explanations."
        }
        (ModeId::Quiz, AdaptationTier::Balanced) => {
            "Use a balanced mix of question difficulty, from recall to light application, with clear explanations."
        }
        (ModeId::Flashcard, AdaptationTier::Maintain) => {
            "The user likes the current flashcards. Keep the same card density and phrasing."
        }
        (ModeId::Flashcard, AdaptationTier::Simplify) => {
            "The user has struggled with recent flashcards. Keep each card short: one concept per card, plain wording and concrete examples to raise engagement."
        }
        (ModeId::Flashcard, AdaptationTier::Balanced) => {
            "Balance definitions with short examples and vary card difficulty."
        }
        (ModeId::Interactive, AdaptationTier::Maintain) => {
            "The user enjoys the current lessons. Keep the same step size, pacing and checkpoint style."
        }
        (ModeId::Interactive, AdaptationTier::Simplify) => {
            "The user found recent lessons hard to follow. Use smaller steps, simpler explanations and easier checkpoints, and make each step more engaging."
        }
        (ModeId::Interactive, AdaptationTier::Balanced) => {
            "Build lessons with moderate step sizes and checkpoints of mixed difficulty."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::thompson::apply_feedback;

    fn synthesizer() -> FeedbackSynthesizer {
        FeedbackSynthesizer::new(EngineConfig::default())
    }

    fn context_with_average(avg: f64) -> FeedbackContext {
        let mut ctx = synthesizer().context_from_values(ModeId::Quiz, &[avg]);
        ctx.average_feedback = avg;
        ctx
    }

    #[test]
    fn test_no_history_is_neutral() {
        let ctx = synthesizer().build_context(ModeId::Flashcard, &BanditState::default());
        assert!(!ctx.has_feedback);
        assert_eq!(synthesizer().adjust_count(10, &ctx), 10);
    }

    #[test]
    fn test_only_matching_mode_counts() {
        let mut state = BanditState::default();
        apply_feedback(&mut state, ModeId::Quiz, 1.0, None, 100);
        apply_feedback(&mut state, ModeId::Flashcard, 0.0, None, 100);
        apply_feedback(&mut state, ModeId::Quiz, 0.8, None, 100);

        let ctx = synthesizer().build_context(ModeId::Quiz, &state);
        assert_eq!(ctx.feedback_count, 2);
        assert!((ctx.average_feedback - 0.9).abs() < 1e-12);
        assert_eq!(ctx.positive_rate, 1.0);
    }

    #[test]
    fn test_recent_window_drives_tier() {
        // Old history is positive, the last five are all negative.
        let values = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let ctx = synthesizer().context_from_values(ModeId::Interactive, &values);
        assert_eq!(ctx.recent_average, 0.0);
        assert_eq!(ctx.tier, AdaptationTier::Simplify);
        assert!(ctx.average_feedback > 0.5);
        assert!(ctx.adaptation_instructions.contains("smaller steps"));
    }

    #[test]
    fn test_tiers() {
        let s = synthesizer();
        assert_eq!(s.context_from_values(ModeId::Quiz, &[0.9, 0.8]).tier, AdaptationTier::Maintain);
        assert_eq!(s.context_from_values(ModeId::Quiz, &[0.2, 0.3]).tier, AdaptationTier::Simplify);
        assert_eq!(s.context_from_values(ModeId::Quiz, &[0.5, 0.6]).tier, AdaptationTier::Balanced);
        assert_eq!(s.context_from_values(ModeId::Quiz, &[0.7]).tier, AdaptationTier::Balanced);
        assert_eq!(s.context_from_values(ModeId::Quiz, &[0.4]).tier, AdaptationTier::Balanced);
    }

    #[test]
    fn test_high_variance_appends_mixed_clause() {
        let ctx = synthesizer().context_from_values(ModeId::Quiz, &[1.0, 0.0, 1.0, 0.0]);
        assert!(ctx.mixed_difficulty);
        assert!(ctx.adaptation_instructions.ends_with(MIXED_DIFFICULTY_CLAUSE));

        let single = synthesizer().context_from_values(ModeId::Quiz, &[0.0]);
        assert!(!single.mixed_difficulty);
        assert_eq!(single.recent_variance, None);
    }

    #[test]
    fn test_adjust_count_bounds() {
        let s = synthesizer();
        let low = s.adjust_count(10, &context_with_average(0.3));
        assert!((2..=10).contains(&low), "low = {low}");

        let high = s.adjust_count(10, &context_with_average(0.9));
        assert!((10..=20).contains(&high), "high = {high}");

        assert_eq!(s.adjust_count(10, &context_with_average(0.5)), 10);
    }

    #[test]
    fn test_adjust_count_is_proportional() {
        let s = synthesizer();
        // factor 0.4 at avg 0.0, 0.56 at the top of the band
        assert_eq!(s.adjust_count(100, &context_with_average(0.0)), 40);
        assert_eq!(s.adjust_count(100, &context_with_average(0.2)), 48);
        assert_eq!(s.adjust_count(100, &context_with_average(1.0)), 150);
        assert_eq!(s.adjust_count(3, &context_with_average(0.0)), 2);
    }

    #[test]
    fn test_base_count_tiers() {
        assert_eq!(base_count(ContentType::Quiz, 1), 3);
        assert_eq!(base_count(ContentType::Quiz, 10), 5);
        assert_eq!(base_count(ContentType::Quiz, 40), 15);
        assert_eq!(base_count(ContentType::Quiz, 200), 20);
        assert_eq!(base_count(ContentType::Flashcard, 8), 8);
        assert_eq!(base_count(ContentType::Flashcard, 30), 20);
        assert_eq!(base_count(ContentType::Interactive, 3), 2);
        assert_eq!(base_count(ContentType::Interactive, 90), 10);
    }
}
