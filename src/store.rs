use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::event::Event;

/// Persisted `{cursor, events}` state for one session. `events` is contiguous up to
/// `cursor`; stores own a deep copy of whatever they hand back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSessionState {
    pub cursor: u64,
    pub events: Vec<Event>,
}

/// Pluggable persistence of `(cursor, events)` per session, for hydration on rebind.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<PersistedSessionState>, StoreError>;
    async fn save(&self, session_id: &str, state: &PersistedSessionState) -> Result<(), StoreError>;
    async fn clear(&self, session_id: &str) -> Result<(), StoreError>;
}

/// Pluggable persistence of "last processed seq" for durable consumers.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<u64>, StoreError>;
    async fn save(&self, session_id: &str, seq: u64) -> Result<(), StoreError>;
}

/// In-memory reference implementation of [`SessionStore`], scoped to the process.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    states: Mutex<HashMap<String, PersistedSessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<PersistedSessionState>, StoreError> {
        Ok(self.states.lock().unwrap().get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &PersistedSessionState) -> Result<(), StoreError> {
        self.states
            .lock()
            .unwrap()
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.states.lock().unwrap().remove(session_id);
        Ok(())
    }
}

/// In-memory reference implementation of [`CursorStore`], scoped to the process.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<String, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, session_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.cursors.lock().unwrap().get(session_id).copied())
    }

    async fn save(&self, session_id: &str, seq: u64) -> Result<(), StoreError> {
        self.cursors.lock().unwrap().insert(session_id.to_string(), seq);
        Ok(())
    }
}

/// Filesystem-backed reference implementation: one JSON file per session under
/// `root_dir`, named by a filesystem-safe encoding of the session id. Intended for
/// single-process, single-host deployments; concurrent writers across processes are
/// explicitly out of scope (see the session object's own concurrency notes).
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root_dir.join(format!("{}.json", sanitize(session_id)))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<PersistedSessionState>, StoreError> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session_id: &str, state: &PersistedSessionState) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let bytes = serde_json::to_vec(state)?;
        tokio::fs::write(self.path_for(session_id), bytes).await?;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Not used by [`FileSessionStore`] directly but kept alongside it: a thin helper
/// for callers building a cursor-store-per-directory layout without pulling in a
/// database dependency.
pub struct FileCursorStore {
    inner: FileSessionStore,
}

impl FileCursorStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: FileSessionStore::new(root_dir),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.inner.path_for(session_id)
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, session_id: &str) -> Result<Option<u64>, StoreError> {
        let path: &Path = &self.path_for(session_id);
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let seq: u64 = serde_json::from_slice(&bytes)?;
                Ok(Some(seq))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session_id: &str, seq: u64) -> Result<(), StoreError> {
        self.inner.ensure_dir().await?;
        let bytes = serde_json::to_vec(&seq)?;
        tokio::fs::write(self.path_for(session_id), bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_session_store_round_trips() {
        let store = InMemorySessionStore::new();
        assert!(store.load("s1").await.unwrap().is_none());

        let state = PersistedSessionState { cursor: 2, events: vec![] };
        store.save("s1", &state).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.cursor, 2);

        store.clear("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_cursor_store_round_trips() {
        let store = InMemoryCursorStore::new();
        assert_eq!(store.load("s1").await.unwrap(), None);
        store.save("s1", 7).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn file_session_store_round_trips_through_a_temp_dir() {
        let dir = std::env::temp_dir().join(format!("session-tail-client-test-{}", std::process::id()));
        let store = FileSessionStore::new(&dir);
        let state = PersistedSessionState { cursor: 3, events: vec![] };
        store.save("s/weird id", &state).await.unwrap();
        let loaded = store.load("s/weird id").await.unwrap().unwrap();
        assert_eq!(loaded.cursor, 3);
        store.clear("s/weird id").await.unwrap();
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
