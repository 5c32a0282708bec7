//! Per-chunk answer tracking and weak/strong area reports.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::engine::repository::StateRepository;
use crate::engine::types::{
    BanditState, ChunkPerformance, ChunkReport, PerformanceSummary, RecentQuestion,
};
use crate::store::StoreError;

const REFERENCE_PREFIX_CHARS: usize = 50;
const SHORT_HASH_LEN: usize = 8;

static CHUNK_ORDINAL_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn chunk_ordinal(reference: &str) -> Option<u64> {
    let re = CHUNK_ORDINAL_RE
        .get_or_init(|| Regex::new(r"(?i)chunk\s*(\d+)").ok())
        .as_ref()?;
    re.captures(reference)?.get(1)?.as_str().parse().ok()
}

/// First eight hex digits of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(SHORT_HASH_LEN);
    hex
}

/// Stable key for a chunk from its source reference (e.g. `"Chunk 3 - Intro"`)
/// and optionally the file it came from.
///
/// With an ordinal: `{filehash}_chunk_{n}` or `chunk_{n}`. Without one the
/// key is a normalized prefix of the reference plus a hash of the full
/// reference, so references sharing a long prefix still get distinct keys.
pub fn chunk_key(reference: &str, file_name: Option<&str>) -> String {
    let file_hash = file_name
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(short_hash);

    if let Some(n) = chunk_ordinal(reference) {
        return match file_hash {
            Some(hash) => format!("{hash}_chunk_{n}"),
            None => format!("chunk_{n}"),
        };
    }

    let prefix: String = reference
        .trim()
        .chars()
        .take(REFERENCE_PREFIX_CHARS)
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect::<String>()
        .to_lowercase();
    let reference_hash = short_hash(reference);

    match file_hash {
        Some(hash) => format!("{hash}_ref_{prefix}_{reference_hash}"),
        None => format!("ref_{prefix}_{reference_hash}"),
    }
}

/// Applies one answer to `state`. Pure; the caller persists.
pub fn record_answer_in(
    state: &mut BanditState,
    chunk_key: &str,
    is_correct: bool,
    question_text: &str,
    source_label: &str,
    question_text_cap: usize,
    recent_question_cap: usize,
) {
    let now = Utc::now();
    let perf = state
        .chunk_stats
        .entry(chunk_key.to_string())
        .or_insert_with(|| ChunkPerformance::new(source_label));

    if perf.source_label.is_empty() && !source_label.is_empty() {
        perf.source_label = source_label.to_string();
    }

    if is_correct {
        perf.correct += 1;
    } else {
        perf.incorrect += 1;
    }
    perf.attempts = perf.correct + perf.incorrect;
    perf.last_attempt = Some(now);

    let text = question_text.trim();
    if !text.is_empty() {
        perf.recent_questions.push_back(RecentQuestion {
            text: text.chars().take(question_text_cap).collect(),
            correct: is_correct,
            timestamp: now,
        });
        while perf.recent_questions.len() > recent_question_cap {
            perf.recent_questions.pop_front();
        }
    }

    state.last_updated = Some(now);
}

pub fn weak_areas_in(state: &BanditState, threshold: f64, min_attempts: u32) -> Vec<ChunkReport> {
    let mut reports: Vec<ChunkReport> = reports_with_attempts(state, min_attempts)
        .filter(|r| r.accuracy < threshold)
        .collect();
    reports.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));
    reports
}

pub fn strong_areas_in(state: &BanditState, threshold: f64, min_attempts: u32) -> Vec<ChunkReport> {
    let mut reports: Vec<ChunkReport> = reports_with_attempts(state, min_attempts)
        .filter(|r| r.accuracy >= threshold)
        .collect();
    reports.sort_by(|a, b| b.accuracy.total_cmp(&a.accuracy));
    reports
}

fn reports_with_attempts(
    state: &BanditState,
    min_attempts: u32,
) -> impl Iterator<Item = ChunkReport> + '_ {
    state
        .chunk_stats
        .iter()
        .filter(move |(_, perf)| perf.attempts >= min_attempts)
        .map(|(key, perf)| ChunkReport::from_performance(key, perf))
}

pub fn summary_of(state: &BanditState) -> PerformanceSummary {
    let mut summary = PerformanceSummary {
        total_chunks: state.chunk_stats.len(),
        ..PerformanceSummary::default()
    };

    for perf in state.chunk_stats.values() {
        summary.total_attempts += u64::from(perf.attempts);
        summary.total_correct += u64::from(perf.correct);
        summary.total_incorrect += u64::from(perf.incorrect);
        if perf.attempts > 0 {
            summary.chunks_with_data += 1;
        }
    }

    if summary.total_attempts > 0 {
        summary.overall_accuracy =
            summary.total_correct as f64 / summary.total_attempts as f64 * 100.0;
    }
    summary
}

/// Analytics bound to one learner's persisted state.
#[derive(Clone)]
pub struct PerformanceAnalytics {
    repo: StateRepository,
}

impl PerformanceAnalytics {
    pub fn new(repo: StateRepository) -> Self {
        Self { repo }
    }

    pub async fn record_answer(
        &self,
        chunk_key: &str,
        is_correct: bool,
        question_text: &str,
        source_label: &str,
    ) -> Result<ChunkReport, StoreError> {
        let config = self.repo.config();
        let mut state = self.repo.load().await;
        record_answer_in(
            &mut state,
            chunk_key,
            is_correct,
            question_text,
            source_label,
            config.question_text_cap,
            config.recent_question_cap,
        );

        let report = state
            .chunk_stats
            .get(chunk_key)
            .map(|perf| ChunkReport::from_performance(chunk_key, perf))
            .unwrap_or_else(|| {
                ChunkReport::from_performance(chunk_key, &ChunkPerformance::default())
            });

        tracing::info!(
            chunk = chunk_key,
            correct = is_correct,
            accuracy = report.accuracy,
            "answer recorded"
        );

        self.repo.save(&state).await?;
        Ok(report)
    }

    pub async fn weak_areas(&self, threshold: f64, min_attempts: u32) -> Vec<ChunkReport> {
        weak_areas_in(&self.repo.load().await, threshold, min_attempts)
    }

    pub async fn strong_areas(&self, threshold: f64, min_attempts: u32) -> Vec<ChunkReport> {
        strong_areas_in(&self.repo.load().await, threshold, min_attempts)
    }

    /// Weak areas with the configured thresholds.
    pub async fn default_weak_areas(&self) -> Vec<ChunkReport> {
        let t = &self.repo.config().analytics;
        self.weak_areas(t.weak_below, t.min_attempts).await
    }

    /// Strong areas with the configured thresholds.
    pub async fn default_strong_areas(&self) -> Vec<ChunkReport> {
        let t = &self.repo.config().analytics;
        self.strong_areas(t.strong_at_least, t.min_attempts).await
    }

    pub async fn summary(&self) -> PerformanceSummary {
        summary_of(&self.repo.load().await)
    }

    pub async fn chunk_performance(&self, chunk_key: &str) -> Option<ChunkReport> {
        let state = self.repo.load().await;
        state
            .chunk_stats
            .get(chunk_key)
            .map(|perf| ChunkReport::from_performance(chunk_key, perf))
    }

    pub async fn all_chunk_performance(&self) -> Vec<ChunkReport> {
        let state = self.repo.load().await;
        state
            .chunk_stats
            .iter()
            .map(|(key, perf)| ChunkReport::from_performance(key, perf))
            .collect()
    }

    /// Stores `file_name` under its short hash for display and returns the hash.
    pub async fn register_file(&self, file_name: &str) -> Result<String, StoreError> {
        let hash = short_hash(file_name.trim());
        let mut state = self.repo.load().await;
        if state.file_registry.get(&hash).map(String::as_str) != Some(file_name) {
            state.file_registry.insert(hash.clone(), file_name.to_string());
            self.repo.save(&state).await?;
            tracing::debug!(file = file_name, hash = %hash, "file registered");
        }
        Ok(hash)
    }
}
