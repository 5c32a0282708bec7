//! Mixed bundle: every mode generated concurrently, partial success allowed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::engine::types::ModeId;
use crate::services::generator::{ContentGenerator, GenerationError, GenerationRequest};

pub fn bundle_key(mode: ModeId) -> &'static str {
    match mode {
        ModeId::Quiz => "quiz",
        ModeId::Flashcard => "flashcards",
        ModeId::Interactive => "interactive",
    }
}

#[derive(Debug)]
pub struct BundleOutcome {
    pub results: BTreeMap<ModeId, Result<Value, String>>,
}

impl BundleOutcome {
    pub fn success(&self) -> bool {
        self.results.values().any(Result::is_ok)
    }

    /// `{quiz, flashcards, interactive}`; failed modes map to `{}`.
    pub fn data(&self) -> Map<String, Value> {
        self.results
            .iter()
            .map(|(mode, result)| {
                let value = match result {
                    Ok(doc) => doc.clone(),
                    Err(_) => Value::Object(Map::new()),
                };
                (bundle_key(*mode).to_string(), value)
            })
            .collect()
    }

    /// `Failed to generate: Quiz: ..., Flashcards: ...` when any mode failed.
    pub fn error_detail(&self) -> Option<String> {
        let failures: Vec<String> = self
            .results
            .iter()
            .filter_map(|(mode, result)| {
                result
                    .as_ref()
                    .err()
                    .map(|e| format!("{}: {}", mode.display_name(), e))
            })
            .collect();

        if failures.is_empty() {
            None
        } else {
            Some(format!("Failed to generate: {}", failures.join(", ")))
        }
    }
}

#[derive(Clone)]
pub struct BundleGenerator {
    generator: Arc<dyn ContentGenerator>,
    workers: usize,
    per_call_timeout: Duration,
}

impl BundleGenerator {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        workers: usize,
        per_call_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            workers: workers.max(1),
            per_call_timeout,
        }
    }

    /// Runs one request per mode. A failure or timeout in one task does
    /// not cancel the others.
    pub async fn generate(&self, requests: Vec<GenerationRequest>) -> BundleOutcome {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut results: BTreeMap<ModeId, Result<Value, String>> = requests
            .iter()
            .map(|r| (r.mode, Err("task did not complete".to_string())))
            .collect();

        for request in requests {
            let generator = Arc::clone(&self.generator);
            let permits = Arc::clone(&permits);
            let limit = self.per_call_timeout;

            tasks.spawn(async move {
                let mode = request.mode;
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let err = GenerationError::Task("worker pool closed".into());
                        return (mode, Err(err));
                    }
                };
                let result = match tokio::time::timeout(limit, generator.generate(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout(limit)),
                };
                (mode, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((mode, Ok(document))) if is_empty_document(&document) => {
                    tracing::error!(mode = %mode, "generator returned an empty document");
                    results.insert(mode, Err("Failed to generate".to_string()));
                }
                Ok((mode, Ok(document))) => {
                    results.insert(mode, Ok(document));
                }
                Ok((mode, Err(err))) => {
                    tracing::error!(mode = %mode, error = %err, "bundle generation failed");
                    results.insert(mode, Err(err.to_string()));
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "bundle task aborted");
                }
            }
        }

        let outcome = BundleOutcome { results };
        tracing::info!(
            succeeded = outcome.results.values().filter(|r| r.is_ok()).count(),
            requested = outcome.results.len(),
            "mixed bundle generated"
        );
        outcome
    }
}

fn is_empty_document(document: &Value) -> bool {
    match document {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Scripted;

    #[async_trait]
    impl ContentGenerator for Scripted {
        async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
            match request.mode {
                ModeId::Quiz => Ok(json!({"questions": [{"question": "q"}]})),
                ModeId::Flashcard => Err(GenerationError::Empty("flashcards")),
                ModeId::Interactive => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Ok(json!({"steps": [1]}))
                }
            }
        }
    }

    fn requests() -> Vec<GenerationRequest> {
        ModeId::ALL
            .iter()
            .map(|m| GenerationRequest::new(*m, vec!["text".into()]))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_success_and_timeout() {
        let bundle = BundleGenerator::new(Arc::new(Scripted), 3, Duration::from_secs(120));
        let outcome = bundle.generate(requests()).await;

        assert!(outcome.success());
        let data = outcome.data();
        assert_eq!(data["quiz"]["questions"][0]["question"], "q");
        assert_eq!(data["flashcards"], json!({}));
        assert_eq!(data["interactive"], json!({}));

        let detail = outcome.error_detail().unwrap();
        assert!(detail
            .starts_with("Failed to generate: Flashcards: generator returned no flashcards"));
        assert!(detail.contains("Interactive: timed out"));
    }

    #[tokio::test]
    async fn test_all_failures_is_not_success() {
        struct Broken;

        #[async_trait]
        impl ContentGenerator for Broken {
            async fn generate(&self, _: &GenerationRequest) -> Result<Value, GenerationError> {
                Err(GenerationError::NoChunks)
            }
        }

        let bundle = BundleGenerator::new(Arc::new(Broken), 1, Duration::from_secs(5));
        let outcome = bundle.generate(requests()).await;
        assert!(!outcome.success());
        assert_eq!(outcome.results.len(), 3);
    }
}
