//! Thompson Sampling over content modes.
//!
//! Each mode keeps a Beta(success, failure) posterior. A recommendation
//! draws one sample per mode and picks the largest, which explores modes
//! with wide posteriors and exploits modes with strong positive history.

use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;

use crate::engine::repository::StateRepository;
use crate::engine::types::{BanditState, FeedbackEvent, ModeId, ModeStatistics, Recommendation};

const MAX_GAMMA_ITERATIONS: usize = 10000;
const FALLBACK_SAMPLE: f64 = 0.5;
/// Values above this count as success; the boundary itself is a failure.
const SUCCESS_CUTOFF: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Applied and written to a backend.
    Persisted,
    /// Applied in memory, but no backend accepted the write.
    Unpersisted,
    /// Input was not usable; nothing changed.
    Ignored,
}

/// Folds one feedback value into the posterior of `mode`.
///
/// `value > 0.5` adds `value` to success. Anything else, including exactly
/// `0.5`, adds `1 - value` to failure, so a neutral rating contributes 0.5
/// to failure rather than being a no-op.
pub fn apply_feedback(
    state: &mut BanditState,
    mode: ModeId,
    value: f64,
    session_id: Option<String>,
    log_cap: usize,
) -> f64 {
    let value = value.clamp(0.0, 1.0);

    if value > SUCCESS_CUTOFF {
        *state.mode_success.entry(mode).or_insert(1.0) += value;
    } else {
        *state.mode_failure.entry(mode).or_insert(1.0) += 1.0 - value;
    }

    let now = Utc::now();
    state.push_event(
        FeedbackEvent {
            mode,
            value,
            timestamp: now,
            session_id,
        },
        log_cap,
    );
    state.last_updated = Some(now);
    value
}

/// Draws one Thompson sample per mode from the given state.
pub fn recommend_from<R: Rng>(
    state: &BanditState,
    param_floor: f64,
    rng: &mut R,
) -> Recommendation {
    let mut samples = BTreeMap::new();
    let mut probabilities = BTreeMap::new();
    let mut best: Option<(ModeId, f64)> = None;

    for mode in ModeId::ALL {
        let alpha = state.success(mode).max(param_floor);
        let beta = state.failure(mode).max(param_floor);

        let sample = match sample_beta(rng, alpha, beta) {
            Some(sample) => sample,
            None => {
                tracing::warn!(mode = %mode, alpha, beta, "beta sampling failed, using 0.5");
                FALLBACK_SAMPLE
            }
        };
        samples.insert(mode, sample);
        probabilities.insert(mode, point_estimate(alpha, beta));

        // Strict comparison keeps the first mode on ties.
        if best.map_or(true, |(_, top)| sample > top) {
            best = Some((mode, sample));
        }
    }

    let (recommended_mode, top) = best.unwrap_or((ModeId::Quiz, FALLBACK_SAMPLE));
    let confidence = match second_highest(&samples, recommended_mode) {
        Some(second) => (top - second).clamp(0.0, 1.0),
        None => 1.0,
    };

    Recommendation {
        recommended_mode,
        probabilities,
        samples,
        confidence,
    }
}

fn second_highest(samples: &BTreeMap<ModeId, f64>, winner: ModeId) -> Option<f64> {
    samples
        .iter()
        .filter(|(mode, _)| **mode != winner)
        .map(|(_, v)| *v)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

fn point_estimate(alpha: f64, beta: f64) -> f64 {
    let sum = alpha + beta;
    if sum > 0.0 {
        alpha / sum
    } else {
        0.5
    }
}

/// `None` when the parameters cannot define a Beta distribution.
pub fn sample_beta<R: Rng>(rng: &mut R, alpha: f64, beta: f64) -> Option<f64> {
    if !alpha.is_finite() || !beta.is_finite() || alpha <= 0.0 || beta <= 0.0 {
        return None;
    }

    let gamma1 = sample_gamma(rng, alpha, 1.0);
    let gamma2 = sample_gamma(rng, beta, 1.0);
    let total = gamma1 + gamma2;

    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let sample = gamma1 / total;
    sample.is_finite().then_some(sample.clamp(0.0, 1.0))
}

// Marsaglia-Tsang; shapes below 1 are boosted and scaled back by u^(1/shape).
fn sample_gamma<R: Rng>(rng: &mut R, shape: f64, scale: f64) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.random();
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..MAX_GAMMA_ITERATIONS {
        let z = random_normal(rng);
        let v = (1.0 + c * z).powi(3);

        if v <= 0.0 {
            continue;
        }

        let u: f64 = rng.random();
        let z_sq = z * z;

        if u < 1.0 - 0.0331 * z_sq * z_sq {
            return d * v * scale;
        }

        if u.ln() < 0.5 * z_sq + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }

    d * scale
}

fn random_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-10);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Per-learner bandit backed by a [`StateRepository`].
#[derive(Clone)]
pub struct BanditEngine {
    repo: StateRepository,
}

impl BanditEngine {
    pub fn new(repo: StateRepository) -> Self {
        Self { repo }
    }

    pub async fn update(
        &self,
        mode: ModeId,
        value: f64,
        session_id: Option<String>,
    ) -> UpdateOutcome {
        if !value.is_finite() {
            tracing::warn!(mode = %mode, value, "ignoring non-finite feedback value");
            return UpdateOutcome::Ignored;
        }

        let config = self.repo.config();
        let mut state = self.repo.load().await;
        let applied =
            apply_feedback(&mut state, mode, value, session_id, config.interaction_log_cap);

        tracing::info!(
            mode = %mode,
            feedback = applied,
            alpha = state.success(mode),
            beta = state.failure(mode),
            "bandit updated"
        );

        match self.repo.save(&state).await {
            Ok(_) => UpdateOutcome::Persisted,
            Err(_) => UpdateOutcome::Unpersisted,
        }
    }

    /// Same as [`update`](Self::update) for an unparsed mode name. Unknown
    /// names are logged and ignored.
    pub async fn update_named(
        &self,
        mode: &str,
        value: f64,
        session_id: Option<String>,
    ) -> UpdateOutcome {
        match ModeId::parse(mode) {
            Some(mode) => self.update(mode, value, session_id).await,
            None => {
                tracing::warn!(mode, "unknown mode in feedback update");
                UpdateOutcome::Ignored
            }
        }
    }

    /// Reloads state first so feedback from other sessions is reflected.
    pub async fn recommend(&self) -> Recommendation {
        let state = self.repo.load().await;
        let mut rng = rand::rng();
        self.log_recommendation(recommend_from(&state, self.repo.config().param_floor, &mut rng))
    }

    pub async fn recommend_with<R: Rng>(&self, rng: &mut R) -> Recommendation {
        let state = self.repo.load().await;
        self.log_recommendation(recommend_from(&state, self.repo.config().param_floor, rng))
    }

    fn log_recommendation(&self, recommendation: Recommendation) -> Recommendation {
        tracing::info!(
            mode = %recommendation.recommended_mode,
            confidence = recommendation.confidence,
            "bandit recommendation"
        );
        recommendation
    }

    pub async fn mode_statistics(&self) -> BTreeMap<ModeId, ModeStatistics> {
        let state = self.repo.load().await;
        mode_statistics(&state)
    }
}

pub fn mode_statistics(state: &BanditState) -> BTreeMap<ModeId, ModeStatistics> {
    ModeId::ALL
        .iter()
        .map(|mode| {
            let alpha = state.success(*mode);
            let beta = state.failure(*mode);
            (
                *mode,
                ModeStatistics {
                    success_rate: point_estimate(alpha, beta),
                    alpha,
                    beta,
                    total_feedback: alpha + beta - 2.0,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_full_positive_only_touches_success() {
        let mut state = BanditState::default();
        apply_feedback(&mut state, ModeId::Quiz, 1.0, None, 10);
        assert_eq!(state.success(ModeId::Quiz), 2.0);
        assert_eq!(state.failure(ModeId::Quiz), 1.0);
    }

    #[test]
    fn test_zero_adds_one_to_failure() {
        let mut state = BanditState::default();
        apply_feedback(&mut state, ModeId::Flashcard, 0.0, None, 10);
        assert_eq!(state.failure(ModeId::Flashcard), 2.0);
        assert_eq!(state.success(ModeId::Flashcard), 1.0);
    }

    #[test]
    fn test_half_goes_to_failure_branch() {
        let mut state = BanditState::default();
        apply_feedback(&mut state, ModeId::Interactive, 0.5, None, 10);
        assert_eq!(state.failure(ModeId::Interactive), 1.5);
        assert_eq!(state.success(ModeId::Interactive), 1.0);
    }

    #[test]
    fn test_values_are_clamped() {
        let mut state = BanditState::default();
        let applied = apply_feedback(&mut state, ModeId::Quiz, 3.0, None, 10);
        assert_eq!(applied, 1.0);
        assert_eq!(state.success(ModeId::Quiz), 2.0);

        apply_feedback(&mut state, ModeId::Quiz, -2.0, None, 10);
        assert_eq!(state.failure(ModeId::Quiz), 2.0);
    }

    #[test]
    fn test_log_is_fifo_bounded() {
        let mut state = BanditState::default();
        for i in 0..15 {
            let value = if i < 5 { 0.0 } else { 1.0 };
            apply_feedback(&mut state, ModeId::Quiz, value, Some(format!("s{i}")), 10);
        }
        assert_eq!(state.interaction_log.len(), 10);
        assert_eq!(state.interaction_log.front().unwrap().session_id.as_deref(), Some("s5"));
    }

    #[test]
    fn test_sample_beta_rejects_bad_params() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sample_beta(&mut rng, 0.0, 1.0).is_none());
        assert!(sample_beta(&mut rng, f64::INFINITY, 1.0).is_none());
        assert!(sample_beta(&mut rng, 1.0, f64::NAN).is_none());
    }

    #[test]
    fn test_sample_beta_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(42);
        for (a, b) in [(0.1, 0.1), (1.0, 1.0), (50.0, 2.0), (0.3, 9.0)] {
            for _ in 0..200 {
                let s = sample_beta(&mut rng, a, b).unwrap();
                assert!((0.0..=1.0).contains(&s));
            }
        }
    }

    #[test]
    fn test_sample_mean_tracks_posterior() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 4000;
        let total: f64 = (0..n).map(|_| sample_beta(&mut rng, 8.0, 2.0).unwrap()).sum();
        let mean = total / n as f64;
        assert!((mean - 0.8).abs() < 0.03, "mean was {mean}");
    }

    #[test]
    fn test_recommendation_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        let state = BanditState::default();
        let rec = recommend_from(&state, 0.1, &mut rng);

        assert!(ModeId::ALL.contains(&rec.recommended_mode));
        assert_eq!(rec.probabilities.len(), 3);
        for p in rec.probabilities.values() {
            assert!((0.0..=1.0).contains(p));
        }
        assert!((0.0..=1.0).contains(&rec.confidence));
        let top = rec.samples[&rec.recommended_mode];
        assert!(rec.samples.values().all(|s| *s <= top));
    }

    #[test]
    fn test_unsampleable_mode_falls_back_to_half() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut state = BanditState::default();
        state.mode_success.insert(ModeId::Flashcard, f64::INFINITY);
        let rec = recommend_from(&state, 0.1, &mut rng);
        assert_eq!(rec.samples[&ModeId::Flashcard], 0.5);
    }

    fn memory_engine() -> (BanditEngine, StateRepository) {
        use crate::engine::config::EngineConfig;
        use crate::store::{MemoryStateStore, StateKey, StoreChain};
        use std::sync::Arc;

        let chain = StoreChain::builder().with(MemoryStateStore::new()).build();
        let config = Arc::new(EngineConfig::default());
        let repo = StateRepository::new(StateKey::user("u1"), chain, config);
        (BanditEngine::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn test_unusable_updates_are_ignored() {
        let (engine, repo) = memory_engine();

        assert_eq!(engine.update_named("podcast", 1.0, None).await, UpdateOutcome::Ignored);
        assert_eq!(engine.update(ModeId::Quiz, f64::NAN, None).await, UpdateOutcome::Ignored);
        assert_eq!(
            engine.update(ModeId::Flashcard, f64::INFINITY, None).await,
            UpdateOutcome::Ignored
        );

        let state = repo.load().await;
        assert_eq!(state, BanditState::default());
        assert!(state.interaction_log.is_empty());
        for mode in ModeId::ALL {
            assert_eq!(state.success(mode), 1.0);
            assert_eq!(state.failure(mode), 1.0);
        }
    }

    #[tokio::test]
    async fn test_named_update_accepts_plural_alias() {
        let (engine, repo) = memory_engine();
        assert_eq!(
            engine.update_named("Flashcards", 0.9, Some("s1".into())).await,
            UpdateOutcome::Persisted
        );
        let state = repo.load().await;
        assert!((state.success(ModeId::Flashcard) - 1.9).abs() < 1e-10);
        assert_eq!(state.interaction_log.len(), 1);
    }

    #[test]
    fn test_statistics_subtract_prior() {
        let mut state = BanditState::default();
        apply_feedback(&mut state, ModeId::Quiz, 1.0, None, 10);
        apply_feedback(&mut state, ModeId::Quiz, 0.0, None, 10);
        let stats = mode_statistics(&state);
        assert_eq!(stats[&ModeId::Quiz].total_feedback, 2.0);
        assert_eq!(stats[&ModeId::Quiz].success_rate, 0.5);
        assert_eq!(stats[&ModeId::Interactive].total_feedback, 0.0);
    }
}
