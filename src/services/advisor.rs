//! Suggests a percentage mix of modes for a learner.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::engine::types::{FeedbackEvent, ModeId, Recommendation};
use crate::services::generator::strip_code_fence;
use crate::services::llm_provider::LLMProvider;

const HISTORY_WINDOW: usize = 20;

const ADVISOR_SYSTEM_PROMPT: &str =
    "You are an expert learning advisor. Always return valid JSON.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeMix {
    pub quiz: u32,
    pub flashcard: u32,
    pub interactive: u32,
    #[serde(default)]
    pub reasoning: String,
}

impl ModeMix {
    /// Summed in `u64` so model-supplied values cannot overflow.
    pub fn total(&self) -> u64 {
        u64::from(self.quiz) + u64::from(self.flashcard) + u64::from(self.interactive)
    }

    /// Every part is a percentage and the parts add up to 100.
    pub fn is_complete(&self) -> bool {
        [self.quiz, self.flashcard, self.interactive]
            .iter()
            .all(|part| *part <= 100)
            && self.total() == 100
    }
}

#[derive(Clone, Default)]
pub struct PreferenceAdvisor {
    provider: Option<LLMProvider>,
}

impl PreferenceAdvisor {
    pub fn new(provider: Option<LLMProvider>) -> Self {
        Self {
            provider: provider.filter(LLMProvider::is_available),
        }
    }

    /// Posterior means scaled to whole percentages. Quiz and flashcard are
    /// truncated and interactive takes the remainder, so the total is 100.
    pub fn rule_based(recommendation: &Recommendation) -> ModeMix {
        let p = |mode: ModeId| {
            recommendation
                .probabilities
                .get(&mode)
                .copied()
                .unwrap_or(0.0)
                .max(0.0)
        };
        let total = p(ModeId::Quiz) + p(ModeId::Flashcard) + p(ModeId::Interactive);

        let (quiz, flashcard) = if total > 0.0 {
            (
                (p(ModeId::Quiz) / total * 100.0) as u32,
                (p(ModeId::Flashcard) / total * 100.0) as u32,
            )
        } else {
            (33, 33)
        };

        ModeMix {
            quiz,
            flashcard,
            interactive: 100u32.saturating_sub(quiz + flashcard),
            reasoning: format!(
                "Based on bandit recommendation: {}",
                recommendation.recommended_mode
            ),
        }
    }

    /// Asks the model for a mix and falls back to [`rule_based`](Self::rule_based)
    /// on any failure or an answer that does not add up to 100.
    pub async fn advise(
        &self,
        log: &VecDeque<FeedbackEvent>,
        current_preference: Option<ModeId>,
        recommendation: &Recommendation,
    ) -> ModeMix {
        let Some(provider) = &self.provider else {
            return Self::rule_based(recommendation);
        };

        let prompt = format!(
            "Based on the user's learning history, suggest the best learning mode mix.\n\n\
             Current preference: {}\n\
             Feedback history: {}\n\n\
             Percentages must sum to 100. Return JSON: \
             {{\"quiz\": 70, \"flashcard\": 20, \"interactive\": 10, \"reasoning\": \"...\"}}",
            current_preference.map_or("Unknown", |m| m.as_str()),
            summarize_feedback(log)
        );

        match provider.complete_json(ADVISOR_SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => match serde_json::from_str::<ModeMix>(strip_code_fence(&raw)) {
                Ok(mix) if mix.is_complete() => mix,
                Ok(mix) => {
                    tracing::warn!(
                        total = mix.total(),
                        "advisor mix is not a valid split of 100, using rule-based mix"
                    );
                    Self::rule_based(recommendation)
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "advisor returned malformed JSON, using rule-based mix"
                    );
                    Self::rule_based(recommendation)
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "advisor request failed, using rule-based mix");
                Self::rule_based(recommendation)
            }
        }
    }
}

/// `quiz: 4 interactions, 75% positive; flashcard: ...` over the last 20
/// events, modes in order of first appearance.
pub fn summarize_feedback(log: &VecDeque<FeedbackEvent>) -> String {
    if log.is_empty() {
        return "No feedback history".to_string();
    }

    let mut counts: Vec<(ModeId, usize, usize)> = Vec::new();
    for event in log.iter().skip(log.len().saturating_sub(HISTORY_WINDOW)) {
        let positive = usize::from(event.value > 0.5);
        match counts.iter_mut().find(|(mode, _, _)| *mode == event.mode) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 += positive;
            }
            None => counts.push((event.mode, 1, positive)),
        }
    }

    counts
        .iter()
        .map(|(mode, total, positive)| {
            let rate = *positive as f64 / *total as f64 * 100.0;
            format!("{mode}: {total} interactions, {rate:.0}% positive")
        })
        .collect::<Vec<_>>()
        .join("; ")
}
