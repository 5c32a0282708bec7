use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::engine::types::BanditState;
use crate::store::{corrupted, StateKey, StateStore, StoreError};

const BACKEND: &str = "file";

/// One pretty-printed JSON document per key under a root directory.
///
/// Writes go to a temp file in the same directory and are renamed over the
/// target, so a reader sees either the old or the new document.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &StateKey) -> PathBuf {
        match key.user_id() {
            None => self.root.join("global.json"),
            Some(user) => self
                .root
                .join("users")
                .join(format!("{}.json", file_stem(user))),
        }
    }
}

fn file_stem(user: &str) -> String {
    let sanitized: String = user
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized == user {
        return sanitized;
    }

    // Keep distinct ids distinct after replacement.
    let digest = Sha256::digest(user.as_bytes());
    format!("{}_{}", sanitized, &hex::encode(digest)[..8])
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn load(&self, key: &StateKey) -> Result<Option<BanditState>, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| corrupted(BACKEND, format!("{}: {e}", path.display())))
    }

    async fn save(&self, key: &StateKey, state: &BanditState) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec_pretty(state)?;

        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Unavailable(format!("file writer task failed: {e}")))??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ModeId;
    use tempfile::TempDir;

    #[test]
    fn test_paths_are_distinct_per_user() {
        let store = FileStateStore::new("/data");
        assert_eq!(store.path_for(&StateKey::global()), PathBuf::from("/data/global.json"));
        assert_eq!(
            store.path_for(&StateKey::user("ana")),
            PathBuf::from("/data/users/ana.json")
        );
        assert_ne!(
            store.path_for(&StateKey::user("a/b")),
            store.path_for(&StateKey::user("a?b"))
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.load(&StateKey::user("ana")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let key = StateKey::user("ana");
        let mut state = BanditState::default();
        state.mode_failure.insert(ModeId::Interactive, 2.5);
        state.survey_completed = true;

        store.save(&key, &state).await.unwrap();
        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded, state);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("users"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_is_reported_as_corrupted() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        std::fs::write(dir.path().join("global.json"), b"{ not json").unwrap();

        let err = store.load(&StateKey::global()).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { backend: "file", .. }));
    }
}
