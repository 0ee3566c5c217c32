//! Retrying an interrupted reply.

use super::{ChatController, TurnHandle, reduce};
use crate::types::{Part, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The message at `index` is not an interrupted reply directly after its
    /// question, or two interrupted replies are stacked back to back.
    #[error("session {session_id} cannot be retried at message {index}")]
    MalformedSession { session_id: String, index: usize },
}

impl ChatController {
    /// Re-ask the question behind the interrupted reply at `failed_index`.
    ///
    /// The question and everything after it are replaced by a new user
    /// message built from `user_parts` and a fresh placeholder. Returns
    /// `Ok(None)` when there is nothing to retry.
    pub fn try_again(
        &self,
        user_parts: Vec<Part>,
        failed_index: usize,
    ) -> Result<Option<TurnHandle>, RetryError> {
        if user_parts.is_empty() {
            return Ok(None);
        }
        let turn = self.inner.update(|state| {
            if !self.inner.accepting_turns(state) {
                return Ok(None);
            }
            let Some(session_id) = state.active.clone() else {
                return Ok(None);
            };
            let Some(session) = state.sessions.iter().find(|s| s.id == session_id) else {
                return Ok(None);
            };
            let messages = &session.messages;
            if failed_index == 0 || failed_index >= messages.len() {
                return Ok(None);
            }
            let user_index = failed_index - 1;
            if messages[user_index].role != Role::User {
                return Ok(None);
            }

            let stacked = user_index
                .checked_sub(1)
                .is_some_and(|before| reduce::is_interrupted_reply(&messages[before]));
            if !reduce::is_interrupted_reply(&messages[failed_index]) || stacked {
                tracing::error!(
                    session = %session_id,
                    index = failed_index,
                    "refusing to retry a malformed session"
                );
                return Err(RetryError::MalformedSession {
                    session_id,
                    index: failed_index,
                });
            }

            let history = reduce::history_for_request(&messages[..user_index]);
            let ts = state.next_timestamp();
            state.sessions_mut(|sessions| {
                reduce::rewind_for_retry(sessions, &session_id, user_index, user_parts.clone(), ts)
            });
            state.begin(&session_id);
            Ok(Some((session_id, history)))
        })?;

        Ok(turn.map(|(session_id, history)| {
            tracing::debug!(session = %session_id, index = failed_index, "retrying interrupted reply");
            self.spawn_turn(session_id, history, user_parts)
        }))
    }
}
