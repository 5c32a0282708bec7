use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::config::EngineConfig;
use crate::engine::types::BanditState;
use crate::store::{LoadOutcome, StateKey, StoreChain, StoreError};

#[derive(Debug, Default)]
struct CachedState {
    state: Option<BanditState>,
    /// Set when the last save failed; the cached copy is then newer than storage.
    dirty: bool,
}

/// Read-modify-write access to one learner's [`BanditState`].
///
/// Each operation loads the latest document, mutates it and writes the
/// whole document back. Nothing is locked across operations.
#[derive(Clone)]
pub struct StateRepository {
    key: StateKey,
    chain: StoreChain,
    config: Arc<EngineConfig>,
    cache: Arc<Mutex<CachedState>>,
}

impl StateRepository {
    pub fn new(key: StateKey, chain: StoreChain, config: Arc<EngineConfig>) -> Self {
        Self {
            key,
            chain,
            config,
            cache: Arc::new(Mutex::new(CachedState::default())),
        }
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.cache.lock().dirty
    }

    /// Never fails: corrupted or unreachable storage yields defaults (or the
    /// cached copy when one exists).
    pub async fn load(&self) -> BanditState {
        {
            let cache = self.cache.lock();
            if cache.dirty {
                if let Some(ref state) = cache.state {
                    tracing::debug!(key = %self.key, "using unsaved in-memory state");
                    return state.clone();
                }
            }
        }

        let state = match self.chain.load(&self.key).await {
            Ok(LoadOutcome::Found { mut state, backend }) => {
                tracing::debug!(key = %self.key, backend, "learner state loaded");
                state.normalize(&self.config);
                state
            }
            Ok(LoadOutcome::NotFound) => BanditState::default(),
            Ok(LoadOutcome::Corrupted { backend, reason }) => {
                tracing::warn!(
                    key = %self.key,
                    backend,
                    reason = %reason,
                    "stored learner state is corrupted, starting from defaults"
                );
                BanditState::default()
            }
            Err(err) => {
                let cached = self.cache.lock().state.clone();
                tracing::error!(key = %self.key, error = %err, "learner state unavailable");
                cached.unwrap_or_default()
            }
        };

        self.cache.lock().state = Some(state.clone());
        state
    }

    /// The cache is updated before the write, so a failed write still
    /// leaves this process with the mutated state.
    pub async fn save(&self, state: &BanditState) -> Result<&'static str, StoreError> {
        self.cache.lock().state = Some(state.clone());

        match self.chain.save(&self.key, state).await {
            Ok(backend) => {
                self.cache.lock().dirty = false;
                Ok(backend)
            }
            Err(err) => {
                self.cache.lock().dirty = true;
                tracing::error!(key = %self.key, error = %err, "failed to persist learner state");
                Err(err)
            }
        }
    }

    pub async fn reset(&self) -> Result<BanditState, StoreError> {
        let state = BanditState::default();
        self.save(&state).await?;
        tracing::info!(key = %self.key, "learner state reset");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ModeId;
    use crate::store::{MemoryStateStore, StateStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyStore {
        inner: MemoryStateStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn load(&self, key: &StateKey) -> Result<Option<BanditState>, StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("down".into()));
            }
            self.inner.load(key).await
        }

        async fn save(&self, key: &StateKey, state: &BanditState) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("down".into()));
            }
            self.inner.save(key, state).await
        }
    }

    fn repo_with(store: Arc<dyn StateStore>) -> StateRepository {
        let chain = StoreChain::builder().with_shared(store).build();
        StateRepository::new(StateKey::user("ana"), chain, Arc::new(EngineConfig::default()))
    }

    #[tokio::test]
    async fn test_fresh_user_gets_defaults() {
        let repo = repo_with(Arc::new(MemoryStateStore::new()));
        assert_eq!(repo.load().await, BanditState::default());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_in_memory_state() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStateStore::new(),
            down: AtomicBool::new(true),
        });
        let repo = repo_with(store.clone());

        let mut state = repo.load().await;
        state.mode_success.insert(ModeId::Quiz, 5.0);
        assert!(repo.save(&state).await.is_err());
        assert!(repo.has_unsaved_changes());

        let reloaded = repo.load().await;
        assert_eq!(reloaded.success(ModeId::Quiz), 5.0);

        store.down.store(false, Ordering::SeqCst);
        repo.save(&reloaded).await.unwrap();
        assert!(!repo.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_reset_replaces_document() {
        let repo = repo_with(Arc::new(MemoryStateStore::new()));
        let mut state = repo.load().await;
        state.survey_completed = true;
        repo.save(&state).await.unwrap();

        repo.reset().await.unwrap();
        assert_eq!(repo.load().await, BanditState::default());
    }
}
