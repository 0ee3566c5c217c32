//! Chat session controller.
//!
//! One controller is mounted per subject view. It owns the in-memory session
//! list, drives each turn against the backend, publishes every state change
//! on a watch channel, and writes through the [`SessionStore`] when a turn
//! settles.
//!
//! ```text
//! Idle -> Sending -> Streaming -> SettledOk | SettledError -> Idle
//! ```

pub mod reduce;
pub mod retry;

use crate::ai::{ChatError, ChatResult, INTERRUPTED_TEXT, LlmBackend, ReplyRequest};
use crate::store::{SaveOutcome, SessionStore};
use crate::study::{self, Flashcard, QuizQuestion};
use crate::subjects::Subject;
use crate::types::{ChatSession, Message, Part, now_millis};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use retry::RetryError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TurnStatus {
    #[default]
    Idle,
    Sending,
    Streaming,
    SettledOk,
    SettledError,
}

/// Everything a view needs to render the subject's chat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatSnapshot {
    /// Newest first.
    pub sessions: Vec<ChatSession>,
    /// `None` while a new session is pending its first message.
    pub active: Option<String>,
    pub status: TurnStatus,
    /// Session the running turn writes into.
    pub in_flight: Option<String>,
}

impl ChatSnapshot {
    pub fn active_session(&self) -> Option<&ChatSession> {
        let id = self.active.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }
}

/// How a turn ended.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Completed { text: String },
    Failed(ChatError),
    /// Cut off by teardown.
    Interrupted,
}

/// Handle to a running turn.
pub struct TurnHandle {
    session_id: String,
    outcome: oneshot::Receiver<TurnOutcome>,
}

impl TurnHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the turn to settle and be persisted.
    pub async fn outcome(self) -> TurnOutcome {
        self.outcome.await.unwrap_or(TurnOutcome::Interrupted)
    }
}

#[derive(Default)]
struct ControllerState {
    sessions: Vec<ChatSession>,
    active: Option<String>,
    status: TurnStatus,
    in_flight: Option<String>,
    last_timestamp: i64,
}

impl ControllerState {
    fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            sessions: self.sessions.clone(),
            active: self.active.clone(),
            status: self.status,
            in_flight: self.in_flight.clone(),
        }
    }

    /// Strictly increasing, so ids stay unique and ordering is total.
    fn next_timestamp(&mut self) -> i64 {
        let ts = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    fn sessions_mut(&mut self, update: impl FnOnce(Vec<ChatSession>) -> Vec<ChatSession>) {
        let sessions = std::mem::take(&mut self.sessions);
        self.sessions = update(sessions);
    }

    fn has_session(&self, id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    /// Start a turn against `session_id`. The caller has already checked
    /// that the controller is idle.
    fn begin(&mut self, session_id: &str) {
        self.status = TurnStatus::Sending;
        self.in_flight = Some(session_id.to_string());
    }
}

struct Inner {
    subject: Subject,
    backend: Arc<dyn LlmBackend>,
    store: SessionStore,
    state: Mutex<ControllerState>,
    updates: watch::Sender<ChatSnapshot>,
    shutdown: CancellationToken,
    turns: Mutex<Vec<JoinHandle<()>>>,
    /// Held for the whole of a storage write.
    saving: tokio::sync::Mutex<()>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate state and publish the result before releasing the lock.
    fn update<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.updates.send_replace(state.snapshot());
        result
    }

    fn accepting_turns(&self, state: &ControllerState) -> bool {
        state.status == TurnStatus::Idle && !self.shutdown.is_cancelled()
    }

    /// Save the current list and drop whatever the store had to evict.
    ///
    /// Saves run one at a time and copy the list only once they hold the
    /// save lock. A turn still streaming is written as interrupted; memory
    /// keeps its placeholder.
    async fn persist(&self) {
        let _saving = self.saving.lock().await;
        let sessions = {
            let state = self.lock();
            let mut sessions = state.sessions.clone();
            let streaming = matches!(state.status, TurnStatus::Sending | TurnStatus::Streaming);
            if let Some(id) = state.in_flight.as_deref().filter(|_| streaming) {
                sessions = reduce::fail_turn(sessions, id, INTERRUPTED_TEXT);
            }
            sessions
        };
        let outcome = self.store.save(&self.subject.id, &sessions).await;
        if let SaveOutcome::Degraded { dropped, .. } = &outcome {
            tracing::info!(subject = %self.subject.id, dropped, "history trimmed to fit storage");
        }
        let Some(persisted) = outcome.persisted() else {
            return;
        };
        let evicted = reduce::evicted_ids(&sessions, persisted);
        if evicted.is_empty() {
            return;
        }
        self.update(|state| {
            state.sessions_mut(|sessions| reduce::evict(sessions, &evicted));
            let active_gone = state
                .active
                .as_deref()
                .is_some_and(|active| !state.has_session(active));
            if active_gone {
                state.active = None;
            }
        });
    }

    async fn stream_into(&self, session_id: &str, request: ReplyRequest) -> ChatResult<String> {
        let mut stream = self.backend.stream_reply(request).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            text.push_str(&chunk);
            tracing::debug!(session = session_id, len = chunk.len(), "chunk");
            self.update(|state| {
                state.status = TurnStatus::Streaming;
                state.sessions_mut(|sessions| reduce::append_chunk(sessions, session_id, &chunk));
            });
        }
        Ok(text)
    }

    async fn settle(&self, session_id: &str, result: ChatResult<String>) -> TurnOutcome {
        let outcome = match result {
            Ok(text) => {
                self.update(|state| {
                    state.status = TurnStatus::SettledOk;
                    state.sessions_mut(|sessions| reduce::complete_turn(sessions, session_id));
                });
                tracing::info!(subject = %self.subject.id, session = session_id, "turn complete");
                TurnOutcome::Completed { text }
            }
            Err(err) => {
                let text = err.user_message();
                self.update(|state| {
                    state.status = TurnStatus::SettledError;
                    state.sessions_mut(|sessions| reduce::fail_turn(sessions, session_id, &text));
                });
                if err == ChatError::Cancelled {
                    tracing::warn!(subject = %self.subject.id, session = session_id, "turn interrupted");
                    TurnOutcome::Interrupted
                } else {
                    tracing::warn!(subject = %self.subject.id, session = session_id, error = %err, "turn failed");
                    TurnOutcome::Failed(err)
                }
            }
        };

        self.persist().await;
        self.update(|state| {
            state.status = TurnStatus::Idle;
            state.in_flight = None;
        });
        outcome
    }

    async fn run_turn(
        self: Arc<Self>,
        session_id: String,
        request: ReplyRequest,
        done: oneshot::Sender<TurnOutcome>,
    ) {
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ChatError::Cancelled),
            result = self.stream_into(&session_id, request) => result,
        };
        let outcome = self.settle(&session_id, result).await;
        let _ = done.send(outcome);
    }
}

/// Controller for one subject's chat.
pub struct ChatController {
    inner: Arc<Inner>,
}

impl ChatController {
    /// Load the subject's history and start on a pending new session.
    pub async fn mount(subject: Subject, backend: Arc<dyn LlmBackend>, store: SessionStore) -> Self {
        let sessions = store.load(&subject.id).await;
        tracing::debug!(
            subject = %subject.id,
            sessions = sessions.len(),
            backend = backend.name(),
            "mounting chat"
        );
        let last_timestamp = sessions.iter().map(|s| s.timestamp).max().unwrap_or(0);
        let state = ControllerState {
            sessions,
            last_timestamp,
            ..ControllerState::default()
        };
        let (updates, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Inner {
                subject,
                backend,
                store,
                state: Mutex::new(state),
                updates,
                shutdown: CancellationToken::new(),
                turns: Mutex::new(Vec::new()),
                saving: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn subject(&self) -> &Subject {
        &self.inner.subject
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn status(&self) -> TurnStatus {
        self.inner.lock().status
    }

    /// Messages of the active session; empty while a new session is pending.
    pub fn messages(&self) -> Vec<Message> {
        self.snapshot()
            .active_session()
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// Start a turn in the active session. Returns `None` for empty input or
    /// while another turn is running.
    pub fn send_message(&self, parts: Vec<Part>) -> Option<TurnHandle> {
        if parts.is_empty() {
            return None;
        }
        let turn = self.inner.update(|state| {
            if !self.inner.accepting_turns(state) {
                return None;
            }
            let ts = state.next_timestamp();
            let session_id = match state.active.clone() {
                Some(id) if state.has_session(&id) => id,
                _ => {
                    let session = ChatSession::new(ts, Vec::new());
                    let id = session.id.clone();
                    state.sessions_mut(|sessions| reduce::insert_session(sessions, session));
                    state.active = Some(id.clone());
                    id
                }
            };
            let history = state
                .sessions
                .iter()
                .find(|s| s.id == session_id)
                .map(|s| reduce::history_for_request(&s.messages))
                .unwrap_or_default();
            state.sessions_mut(|sessions| reduce::begin_turn(sessions, &session_id, parts.clone(), ts));
            state.begin(&session_id);
            Some((session_id, history))
        });

        let Some((session_id, history)) = turn else {
            tracing::debug!(subject = %self.inner.subject.id, "message ignored while a turn is running");
            return None;
        };
        Some(self.spawn_turn(session_id, history, parts))
    }

    fn spawn_turn(&self, session_id: String, history: Vec<Message>, new_parts: Vec<Part>) -> TurnHandle {
        tracing::debug!(
            subject = %self.inner.subject.id,
            session = %session_id,
            history = history.len(),
            "starting turn"
        );
        let request = ReplyRequest {
            subject: self.inner.subject.clone(),
            history,
            new_parts,
        };
        let (done, outcome) = oneshot::channel();
        let task = tokio::spawn(self.inner.clone().run_turn(session_id.clone(), request, done));

        let mut turns = self.inner.turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.retain(|handle| !handle.is_finished());
        turns.push(task);

        TurnHandle {
            session_id,
            outcome,
        }
    }

    /// Point the view at an existing session. Running turns keep writing to
    /// the session they started in.
    pub fn select_session(&self, session_id: &str) -> bool {
        self.inner.update(|state| {
            if state.has_session(session_id) {
                state.active = Some(session_id.to_string());
                true
            } else {
                false
            }
        })
    }

    /// Leave the current session; the next message opens a new one.
    pub fn start_new_session(&self) {
        self.inner.update(|state| state.active = None);
    }

    pub async fn delete_session(&self, session_id: &str) -> bool {
        let removed = self.inner.update(|state| {
            if !state.has_session(session_id) {
                return false;
            }
            state.sessions_mut(|sessions| reduce::remove_session(sessions, session_id));
            if state.active.as_deref() == Some(session_id) {
                state.active = state.sessions.first().map(|s| s.id.clone());
            }
            true
        });
        if removed {
            tracing::debug!(subject = %self.inner.subject.id, session = session_id, "deleted session");
            self.inner.persist().await;
        }
        removed
    }

    /// Forget every session for this subject.
    pub async fn clear_history(&self) {
        self.inner.update(|state| {
            state.sessions.clear();
            state.active = None;
        });
        {
            let _saving = self.inner.saving.lock().await;
            self.inner.store.clear(&self.inner.subject.id).await;
        }
        tracing::info!(subject = %self.inner.subject.id, "chat history cleared");
    }

    pub async fn generate_quiz(&self, count: usize, hard: bool) -> Option<Vec<QuizQuestion>> {
        let messages = self.messages();
        study::generate_quiz(self.inner.backend.as_ref(), &self.inner.subject, &messages, count, hard)
            .await
    }

    pub async fn generate_flashcards(&self, count: usize) -> Option<Vec<Flashcard>> {
        let messages = self.messages();
        study::generate_flashcards(self.inner.backend.as_ref(), &self.inner.subject, &messages, count)
            .await
    }

    /// Tear down: interrupt running turns and wait until they are persisted.
    pub async fn unmount(self) {
        self.inner.shutdown.cancel();
        let turns = std::mem::take(&mut *self.inner.turns.lock().unwrap_or_else(|e| e.into_inner()));
        for turn in turns {
            if let Err(err) = turn.await {
                tracing::error!(subject = %self.inner.subject.id, error = %err, "turn task failed");
            }
        }
        tracing::debug!(subject = %self.inner.subject.id, "chat unmounted");
    }
}
