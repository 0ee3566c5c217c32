//! Per-subject persistence of chat history.
//!
//! The store owns the durable copy of every subject's sessions. Writes are
//! capped at [`MAX_HISTORY_ITEMS`] and degrade under quota pressure by
//! dropping the oldest sessions until the rest fit.

use crate::storage::{StorageBackend, StorageError};
use crate::subjects::history_key;
use crate::types::{ChatSession, MAX_HISTORY_ITEMS, sort_newest_first};
use std::sync::Arc;

/// Result of a save attempt. Memory should mirror `persisted` whenever it is
/// present.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Every session (after the cap) was written.
    Saved { persisted: Vec<ChatSession> },
    /// The quota forced the oldest `dropped` sessions out.
    Degraded {
        persisted: Vec<ChatSession>,
        dropped: usize,
    },
    /// Not even the newest session fits; nothing was written.
    Skipped,
    /// A non-quota error aborted the write.
    Failed(StorageError),
}

impl SaveOutcome {
    pub fn persisted(&self) -> Option<&[ChatSession]> {
        match self {
            SaveOutcome::Saved { persisted } | SaveOutcome::Degraded { persisted, .. } => {
                Some(persisted)
            }
            SaveOutcome::Skipped | SaveOutcome::Failed(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Read a subject's sessions. Missing or corrupt data yields an empty list.
    pub async fn load(&self, subject_id: &str) -> Vec<ChatSession> {
        let key = history_key(subject_id);
        let raw = match self.backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::error!(subject = subject_id, error = %err, "failed to read chat history");
                return Vec::new();
            }
        };

        let mut sessions: Vec<ChatSession> = match serde_json::from_str(&raw) {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::error!(
                    subject = subject_id,
                    error = %err,
                    "discarding corrupt chat history"
                );
                return Vec::new();
            }
        };

        for session in &mut sessions {
            session.messages.retain(|msg| !msg.parts.is_empty());
        }
        sort_newest_first(&mut sessions);
        sessions.truncate(MAX_HISTORY_ITEMS);
        sessions
    }

    /// Persist `history` newest first, capped, degrading under quota pressure.
    pub async fn save(&self, subject_id: &str, history: &[ChatSession]) -> SaveOutcome {
        let key = history_key(subject_id);
        let mut ordered = history.to_vec();
        sort_newest_first(&mut ordered);
        if ordered.len() > MAX_HISTORY_ITEMS {
            tracing::debug!(
                subject = subject_id,
                evicted = ordered.len() - MAX_HISTORY_ITEMS,
                "evicting sessions over the history cap"
            );
            ordered.truncate(MAX_HISTORY_ITEMS);
        }

        if ordered.is_empty() {
            return match self.write(&key, &ordered).await {
                Ok(()) => SaveOutcome::Saved {
                    persisted: ordered,
                },
                Err(err) => SaveOutcome::Failed(err),
            };
        }

        let total = ordered.len();
        for keep in (1..=total).rev() {
            let candidate = &ordered[..keep];
            match self.write(&key, candidate).await {
                Ok(()) => {
                    let dropped = total - keep;
                    if dropped == 0 {
                        return SaveOutcome::Saved {
                            persisted: ordered,
                        };
                    }
                    tracing::info!(
                        subject = subject_id,
                        dropped,
                        "storage was full; cleared oldest chats to make space"
                    );
                    return SaveOutcome::Degraded {
                        persisted: candidate.to_vec(),
                        dropped,
                    };
                }
                Err(err) if err.is_quota() => {
                    if keep == total {
                        tracing::warn!(
                            subject = subject_id,
                            "storage quota exceeded; dropping old chats"
                        );
                    }
                }
                Err(err) => {
                    tracing::error!(subject = subject_id, error = %err, "failed to save chat history");
                    return SaveOutcome::Failed(err);
                }
            }
        }

        tracing::error!(
            subject = subject_id,
            "could not save chat history; the most recent chat alone exceeds the storage quota"
        );
        SaveOutcome::Skipped
    }

    /// Delete every persisted session for a subject.
    pub async fn clear(&self, subject_id: &str) {
        if let Err(err) = self.backend.remove(&history_key(subject_id)).await {
            tracing::error!(subject = subject_id, error = %err, "failed to clear chat history");
        }
    }

    async fn write(&self, key: &str, sessions: &[ChatSession]) -> Result<(), StorageError> {
        let payload = serde_json::to_string(sessions)
            .map_err(|e| StorageError::Io(format!("failed to encode chat history: {e}")))?;
        self.backend.set(key, &payload).await
    }
}
