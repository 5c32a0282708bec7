#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use adaptive_tutor::engine::ModeId;
use adaptive_tutor::services::generator::{
    items_key, ContentGenerator, GenerationError, GenerationRequest,
};
use adaptive_tutor::store::{MemoryStateStore, StateKey, StateStore, StoreChain};
use adaptive_tutor::Orchestrator;

/// Answers every request with `requested_items()` placeholder items and
/// remembers what it was asked for. Modes listed in `failing` error out.
#[derive(Default)]
pub struct RecordingGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub failing: Vec<ModeId>,
}

impl RecordingGenerator {
    pub fn failing(modes: &[ModeId]) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failing: modes.to_vec(),
        }
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl ContentGenerator for RecordingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        self.requests.lock().push(request.clone());

        if self.failing.contains(&request.mode) {
            return Err(GenerationError::Empty(items_key(request.mode)));
        }

        let items: Vec<Value> = (0..request.requested_items())
            .map(|i| json!({ "index": i, "source_reference": format!("Chunk {}", i + 1) }))
            .collect();
        Ok(json!({ items_key(request.mode): items }))
    }
}

pub fn chunks(n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| format!("Paragraph {i} about cell biology and energy."))
        .collect()
}

pub fn orchestrator_with(
    store: Arc<dyn StateStore>,
    generator: Arc<RecordingGenerator>,
) -> Orchestrator {
    let chain = StoreChain::builder().with_shared(store).build();
    Orchestrator::builder(StateKey::user("learner-1"), chain, generator).build()
}

pub fn orchestrator() -> (Orchestrator, Arc<RecordingGenerator>) {
    let generator = Arc::new(RecordingGenerator::default());
    let orch = orchestrator_with(Arc::new(MemoryStateStore::new()), Arc::clone(&generator));
    (orch, generator)
}
