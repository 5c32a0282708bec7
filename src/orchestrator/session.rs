use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Extracted material for one caller session. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionData {
    pub chunks: Vec<String>,
    pub summary: Option<String>,
    pub file_name: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

/// In-memory session store owned by one orchestrator.
#[derive(Debug, Default)]
pub struct SessionContext {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever the session held before.
    pub fn store(
        &self,
        session_id: &str,
        chunks: Vec<String>,
        summary: Option<String>,
        file_name: Option<String>,
    ) {
        let data = SessionData {
            chunks,
            summary,
            file_name,
            extracted_at: Utc::now(),
        };
        self.sessions.write().insert(session_id.to_string(), data);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionData> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn chunks(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .read()
            .get(session_id)
            .map(|d| d.chunks.clone())
            .unwrap_or_default()
    }

    pub fn file_name(&self, session_id: &str) -> Option<String> {
        self.sessions.read().get(session_id).and_then(|d| d.file_name.clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionData> {
        self.sessions.write().remove(session_id)
    }

    pub fn clear(&self) {
        self.sessions.write().clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_replaces_and_clear_empties() {
        let ctx = SessionContext::new();
        ctx.store("s1", vec!["a".into()], None, None);
        ctx.store("s1", vec!["b".into(), "c".into()], Some("sum".into()), Some("f.txt".into()));
        assert_eq!(ctx.chunks("s1"), vec!["b", "c"]);
        assert_eq!(ctx.file_name("s1").as_deref(), Some("f.txt"));
        assert!(ctx.chunks("missing").is_empty());

        ctx.clear();
        assert!(ctx.is_empty());
    }
}
