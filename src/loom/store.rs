//! Session Store (C3).
//!
//! One JSON file per session under a configured directory. Writes
//! to a given session id are serialized through a per-key lock; a
//! lock-striping map (an outer `RwLock` guarding per-id `Mutex`es) means
//! creating a new session's lock never blocks a write in flight to another
//! session (§4.3, §5).

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::loom::session::Session;

#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(String),
    Io(String),
    Malformed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "session '{}' not found", id),
            StoreError::Io(msg) => write!(f, "session store io error: {}", msg),
            StoreError::Malformed(msg) => write!(f, "malformed session document: {}", msg),
        }
    }
}

impl Error for StoreError {}

pub struct SessionStore {
    dir: PathBuf,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(id) {
            return lock.clone();
        }
        let mut guard = self.locks.write().await;
        guard
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Create a new, empty session and persist it. Returns the new id.
    pub async fn create(&self) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(&id, Utc::now());
        self.put(&id, &session).await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Session, StoreError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.read_from_disk(id).await
    }

    async fn read_from_disk(&self, id: &str) -> Result<Session, StoreError> {
        let path = self.path_for(id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| StoreError::NotFound(id.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Malformed(e.to_string()))
    }

    /// Overwrite a session's document. Writes are serialized per session id.
    pub async fn put(&self, id: &str, session: &Session) -> Result<(), StoreError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let raw = serde_json::to_string_pretty(session).map_err(|e| StoreError::Malformed(e.to_string()))?;
        tokio::fs::write(self.path_for(id), raw)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    /// All sessions currently retained (§4.3: ≥1 message or ≥1 enabled agent).
    pub async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(session) = self.read_from_disk(id).await {
                if session.is_retained() {
                    out.push(session);
                }
            }
        }
        Ok(out)
    }

    /// Delete every session with zero messages and zero enabled agents.
    /// Idempotent: a second call finds nothing left to delete.
    pub async fn cleanup(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        let mut to_delete = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            if let Ok(session) = self.read_from_disk(&id).await {
                if !session.is_retained() {
                    to_delete.push(id);
                }
            }
        }
        for id in to_delete {
            self.delete(&id).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::session::{MessageAnnotations, SenderRole};

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = store.create().await.unwrap();
        let session = store.get(&id).await.unwrap();
        assert_eq!(session.id, id);
    }

    #[tokio::test]
    async fn put_get_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = store.create().await.unwrap();
        let session = store.get(&id).await.unwrap();
        store.put(&id, &session).await.unwrap();
        let reloaded = store.get(&id).await.unwrap();
        assert_eq!(
            serde_json::to_string(&session).unwrap(),
            serde_json::to_string(&reloaded).unwrap()
        );
    }

    #[tokio::test]
    async fn list_excludes_empty_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let empty_id = store.create().await.unwrap();
        let active_id = store.create().await.unwrap();

        let mut active = store.get(&active_id).await.unwrap();
        active.append(SenderRole::User, "hi", MessageAnnotations::default(), Utc::now());
        store.put(&active_id, &active).await.unwrap();

        let listed = store.list().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.clone()).collect();
        assert!(ids.contains(&active_id));
        assert!(!ids.contains(&empty_id));
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create().await.unwrap();
        let first = store.cleanup().await.unwrap();
        let second = store.cleanup().await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }
}
