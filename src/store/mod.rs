//! Persistence backends for [`BanditState`].
//!
//! Every backend stores one whole JSON document per [`StateKey`]. Writes
//! replace the document; there is no version stamp, so two writers racing
//! on the same key resolve as last-writer-wins.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::types::BanditState;

pub mod file;
pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use postgres::PgStateStore;
pub use sqlite::SqliteStateStore;

const GLOBAL_KEY: &str = "global";
const USER_KEY_PREFIX: &str = "user:";

/// Identifies whose state a document holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey(Option<String>);

impl StateKey {
    pub fn global() -> Self {
        Self(None)
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        let id = user_id.into();
        if id.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(id))
        }
    }

    pub fn from_option(user_id: Option<&str>) -> Self {
        match user_id {
            Some(id) => Self::user(id),
            None => Self::global(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Row key for database backends. User keys are namespaced so no user
    /// id can address the global document.
    pub fn storage_key(&self) -> String {
        match &self.0 {
            Some(id) => format!("{USER_KEY_PREFIX}{id}"),
            None => GLOBAL_KEY.to_string(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupted state in {backend}: {reason}")]
    Corrupted { backend: &'static str, reason: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("all state stores failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when this backend has never stored the key.
    async fn load(&self, key: &StateKey) -> Result<Option<BanditState>, StoreError>;

    async fn save(&self, key: &StateKey, state: &BanditState) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum LoadOutcome {
    Found {
        state: BanditState,
        backend: &'static str,
    },
    NotFound,
    Corrupted {
        backend: &'static str,
        reason: String,
    },
}

/// Ordered list of backends; the first one that can answer wins.
#[derive(Clone, Default)]
pub struct StoreChain {
    stores: Vec<Arc<dyn StateStore>>,
}

impl StoreChain {
    pub fn builder() -> StoreChainBuilder {
        StoreChainBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.stores.iter().map(|s| s.name()).collect()
    }

    pub async fn load(&self, key: &StateKey) -> Result<LoadOutcome, StoreError> {
        let mut failures = Vec::new();
        let mut answered = false;

        for store in &self.stores {
            match store.load(key).await {
                Ok(Some(state)) => {
                    tracing::debug!(backend = store.name(), key = %key, "state loaded");
                    return Ok(LoadOutcome::Found {
                        state,
                        backend: store.name(),
                    });
                }
                Ok(None) => {
                    answered = true;
                }
                Err(StoreError::Corrupted { backend, reason }) => {
                    return Ok(LoadOutcome::Corrupted { backend, reason });
                }
                Err(err) => {
                    tracing::warn!(
                        backend = store.name(),
                        key = %key,
                        error = %err,
                        "state load failed, trying next store"
                    );
                    failures.push(format!("{}: {}", store.name(), err));
                }
            }
        }

        if answered || self.stores.is_empty() {
            Ok(LoadOutcome::NotFound)
        } else {
            Err(StoreError::Exhausted(failures))
        }
    }

    /// Returns the name of the backend that accepted the write.
    pub async fn save(
        &self,
        key: &StateKey,
        state: &BanditState,
    ) -> Result<&'static str, StoreError> {
        let mut failures = Vec::new();

        for store in &self.stores {
            match store.save(key, state).await {
                Ok(()) => {
                    tracing::debug!(backend = store.name(), key = %key, "state saved");
                    return Ok(store.name());
                }
                Err(err) => {
                    tracing::warn!(
                        backend = store.name(),
                        key = %key,
                        error = %err,
                        "state save failed, trying next store"
                    );
                    failures.push(format!("{}: {}", store.name(), err));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no state stores configured".to_string());
        }
        Err(StoreError::Exhausted(failures))
    }
}

#[derive(Default)]
pub struct StoreChainBuilder {
    stores: Vec<Arc<dyn StateStore>>,
}

impl StoreChainBuilder {
    pub fn with<S: StateStore + 'static>(mut self, store: S) -> Self {
        self.stores.push(Arc::new(store));
        self
    }

    pub fn with_shared(mut self, store: Arc<dyn StateStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn with_optional<S: StateStore + 'static>(self, store: Option<S>) -> Self {
        match store {
            Some(store) => self.with(store),
            None => self,
        }
    }

    pub fn build(self) -> StoreChain {
        StoreChain {
            stores: self.stores,
        }
    }
}

pub(crate) fn corrupted(backend: &'static str, err: impl fmt::Display) -> StoreError {
    StoreError::Corrupted {
        backend,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ModeId;

    struct FailingStore;

    #[async_trait]
    impl StateStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn load(&self, _key: &StateKey) -> Result<Option<BanditState>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn save(&self, _key: &StateKey, _state: &BanditState) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    struct CorruptStore;

    #[async_trait]
    impl StateStore for CorruptStore {
        fn name(&self) -> &'static str {
            "corrupt"
        }

        async fn load(&self, _key: &StateKey) -> Result<Option<BanditState>, StoreError> {
            Err(corrupted("corrupt", "expected value at line 1"))
        }

        async fn save(&self, _key: &StateKey, _state: &BanditState) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_store_is_object_safe() {
        fn _takes_boxed(_: Box<dyn StateStore>) {}
    }

    #[test]
    fn test_state_key() {
        assert_eq!(StateKey::global().storage_key(), "global");
        assert_eq!(StateKey::user("  ").user_id(), None);
        assert_eq!(StateKey::user("ana").storage_key(), "user:ana");
    }

    #[test]
    fn test_user_ids_never_address_global_document() {
        let global = StateKey::global().storage_key();
        for id in ["global", "__global__", "user:", "GLOBAL"] {
            assert_ne!(StateKey::user(id).storage_key(), global, "user id {id:?}");
        }
        assert_ne!(
            StateKey::user("a").storage_key(),
            StateKey::user("user:a").storage_key()
        );
    }

    #[tokio::test]
    async fn test_save_falls_through_to_next_store() {
        let memory = Arc::new(MemoryStateStore::new());
        let chain = StoreChain::builder()
            .with(FailingStore)
            .with_shared(memory.clone())
            .build();
        let key = StateKey::user("ana");
        let mut state = BanditState::default();
        state.mode_success.insert(ModeId::Quiz, 3.0);

        let backend = chain.save(&key, &state).await.unwrap();
        assert_eq!(backend, "memory");

        match chain.load(&key).await.unwrap() {
            LoadOutcome::Found { state: loaded, backend } => {
                assert_eq!(backend, "memory");
                assert_eq!(loaded, state);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_failing_is_exhausted() {
        let chain = StoreChain::builder().with(FailingStore).build();
        let key = StateKey::global();

        assert!(matches!(chain.load(&key).await, Err(StoreError::Exhausted(_))));
        match chain.save(&key, &BanditState::default()).await {
            Err(StoreError::Exhausted(details)) => assert_eq!(details.len(), 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_corruption_is_reported_not_skipped() {
        let chain = StoreChain::builder()
            .with(CorruptStore)
            .with(MemoryStateStore::new())
            .build();

        let outcome = chain.load(&StateKey::global()).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Corrupted { backend: "corrupt", .. }));
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_not_found() {
        let chain = StoreChain::builder()
            .with(FailingStore)
            .with(MemoryStateStore::new())
            .build();

        let outcome = chain.load(&StateKey::user("nobody")).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::NotFound));
    }
}
