use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::engine::types::BanditState;
use crate::store::{StateKey, StateStore, StoreError};

/// Process-local store. Useful as the last link of a chain and in tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    documents: RwLock<HashMap<StateKey, BanditState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &StateKey) -> Result<Option<BanditState>, StoreError> {
        Ok(self.documents.read().get(key).cloned())
    }

    async fn save(&self, key: &StateKey, state: &BanditState) -> Result<(), StoreError> {
        self.documents.write().insert(key.clone(), state.clone());
        Ok(())
    }
}
