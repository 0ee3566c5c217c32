//! Integration tests for the session store
//!
//! Tests the history cap, quota degradation and corrupt-data handling

use async_trait::async_trait;
use lyceum::storage::{FileStorage, MemoryStorage, StorageBackend, StorageError};
use lyceum::store::{SaveOutcome, SessionStore};
use lyceum::types::{ChatSession, Message, Part};
use std::sync::{Arc, Mutex};

fn session(ts: i64) -> ChatSession {
    ChatSession::new(
        ts,
        vec![
            Message::user(vec![Part::text(format!("question {ts}"))]),
            Message::model(format!("answer {ts}")),
        ],
    )
}

/// Accepts a write only when it holds at most `max_sessions` sessions.
struct SessionLimitedStorage {
    inner: MemoryStorage,
    max_sessions: usize,
    attempts: Mutex<Vec<usize>>,
}

impl SessionLimitedStorage {
    fn new(max_sessions: usize) -> Self {
        Self {
            inner: MemoryStorage::new(),
            max_sessions,
            attempts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StorageBackend for SessionLimitedStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let count = serde_json::from_str::<Vec<ChatSession>>(value)
            .map(|s| s.len())
            .unwrap_or(usize::MAX);
        self.attempts.lock().unwrap().push(count);
        if count > self.max_sessions {
            return Err(StorageError::QuotaExceeded {
                needed: value.len() as u64,
                limit: 0,
            });
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }
}

/// Fails every write with a non-quota error.
struct BrokenStorage {
    writes: Mutex<usize>,
}

#[async_trait]
impl StorageBackend for BrokenStorage {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        *self.writes.lock().unwrap() += 1;
        Err(StorageError::Unavailable("disk unplugged".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

mod cap_tests {
    use super::*;

    #[tokio::test]
    async fn eleven_sessions_persist_the_newest_ten() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone());
        let sessions: Vec<ChatSession> = (1..=11).map(session).collect();

        let outcome = store.save("physics", &sessions).await;
        let persisted = outcome.persisted().unwrap();
        assert_eq!(persisted.len(), 10);
        assert!(persisted.iter().all(|s| s.timestamp != 1));
        assert_eq!(persisted[0].timestamp, 11);

        let loaded = store.load("physics").await;
        assert_eq!(loaded, persisted);
    }
}

mod quota_tests {
    use super::*;

    #[tokio::test]
    async fn degrades_to_the_sessions_that_fit() {
        let storage = Arc::new(SessionLimitedStorage::new(3));
        let store = SessionStore::new(storage.clone());
        let sessions: Vec<ChatSession> = (1..=6).map(session).collect();

        let outcome = store.save("history", &sessions).await;
        match &outcome {
            SaveOutcome::Degraded { persisted, dropped } => {
                assert_eq!(*dropped, 3);
                let kept: Vec<i64> = persisted.iter().map(|s| s.timestamp).collect();
                assert_eq!(kept, vec![6, 5, 4]);
            }
            other => panic!("expected a degraded save, got {other:?}"),
        }
        assert_eq!(*storage.attempts.lock().unwrap(), vec![6, 5, 4, 3]);
        assert_eq!(store.load("history").await.len(), 3);
    }

    #[tokio::test]
    async fn skips_when_nothing_fits() {
        let storage = Arc::new(SessionLimitedStorage::new(0));
        let store = SessionStore::new(storage.clone());

        let outcome = store.save("history", &[session(1), session(2)]).await;
        assert_eq!(outcome, SaveOutcome::Skipped);
        assert!(storage.inner.get("chat_history_history").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let storage = Arc::new(BrokenStorage {
            writes: Mutex::new(0),
        });
        let store = SessionStore::new(storage.clone());

        let outcome = store.save("history", &[session(1), session(2)]).await;
        assert!(matches!(outcome, SaveOutcome::Failed(StorageError::Unavailable(_))));
        assert_eq!(*storage.writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn byte_quota_drops_oldest() {
        let one = serde_json::to_string(&[session(1)]).unwrap().len() as u64;
        let key_len = "chat_history_math".len() as u64;
        let storage = Arc::new(MemoryStorage::with_quota(key_len + one * 2));
        let store = SessionStore::new(storage);

        let outcome = store.save("math", &[session(1), session(2), session(3)]).await;
        let persisted = outcome.persisted().unwrap();
        assert!(!persisted.is_empty() && persisted.len() < 3);
        assert_eq!(persisted[0].timestamp, 3);
    }
}

mod load_tests {
    use super::*;

    #[tokio::test]
    async fn corrupt_json_loads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set("chat_history_biology", "{not json")
            .await
            .unwrap();
        let store = SessionStore::new(storage);
        assert!(store.load("biology").await.is_empty());
    }

    #[tokio::test]
    async fn wrong_shape_loads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set("chat_history_biology", r#"{"id":"1"}"#)
            .await
            .unwrap();
        let store = SessionStore::new(storage);
        assert!(store.load("biology").await.is_empty());
    }

    #[tokio::test]
    async fn file_storage_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Arc::new(FileStorage::new(dir.path(), None)));

        store.save("english", &[session(5), session(9)]).await;
        let loaded = store.load("english").await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].timestamp, 9);

        store.clear("english").await;
        assert!(store.load("english").await.is_empty());
    }
}
