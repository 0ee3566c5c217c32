//! Session-list updates as pure functions keyed by session id.
//!
//! Every function takes the current list by value and returns the next one.
//! An id that is no longer present makes the update a no-op, so a turn whose
//! session was deleted mid-stream simply stops landing anywhere.

use crate::types::{ChatSession, MAX_HISTORY_ITEMS, Message, Part, Role, sort_newest_first};
use std::collections::HashSet;

fn with_session(
    mut sessions: Vec<ChatSession>,
    session_id: &str,
    update: impl FnOnce(&mut ChatSession),
) -> Vec<ChatSession> {
    if let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) {
        update(session);
    }
    sessions
}

fn with_placeholder(
    sessions: Vec<ChatSession>,
    session_id: &str,
    update: impl FnOnce(&mut Message),
) -> Vec<ChatSession> {
    with_session(sessions, session_id, |session| {
        if let Some(last) = session.messages.last_mut().filter(|m| m.is_model()) {
            update(last);
        }
    })
}

/// Put a fresh session at the head of the list, evicting past the cap.
pub fn insert_session(mut sessions: Vec<ChatSession>, session: ChatSession) -> Vec<ChatSession> {
    sessions.insert(0, session);
    sort_newest_first(&mut sessions);
    sessions.truncate(MAX_HISTORY_ITEMS);
    sessions
}

/// Append the user message and an empty placeholder, bumping the session to
/// the top.
pub fn begin_turn(
    sessions: Vec<ChatSession>,
    session_id: &str,
    user_parts: Vec<Part>,
    timestamp: i64,
) -> Vec<ChatSession> {
    let mut sessions = with_session(sessions, session_id, |session| {
        session.messages.push(Message::user(user_parts));
        session.messages.push(Message::placeholder());
        session.touch(timestamp);
    });
    sort_newest_first(&mut sessions);
    sessions
}

/// Replace everything from `user_index` on with a new user message and an
/// empty placeholder.
pub fn rewind_for_retry(
    sessions: Vec<ChatSession>,
    session_id: &str,
    user_index: usize,
    user_parts: Vec<Part>,
    timestamp: i64,
) -> Vec<ChatSession> {
    let mut sessions = with_session(sessions, session_id, |session| {
        session.messages.truncate(user_index);
        session.messages.push(Message::user(user_parts));
        session.messages.push(Message::placeholder());
        session.touch(timestamp);
    });
    sort_newest_first(&mut sessions);
    sessions
}

pub fn append_chunk(sessions: Vec<ChatSession>, session_id: &str, chunk: &str) -> Vec<ChatSession> {
    with_placeholder(sessions, session_id, |message| {
        match message.parts.iter_mut().rev().find_map(|p| match p {
            Part::Text { text } => Some(text),
            Part::Inline { .. } => None,
        }) {
            Some(text) => text.push_str(chunk),
            None => message.parts.push(Part::text(chunk)),
        }
    })
}

pub fn complete_turn(sessions: Vec<ChatSession>, session_id: &str) -> Vec<ChatSession> {
    with_placeholder(sessions, session_id, |message| {
        message.is_interrupted = false;
    })
}

/// Swap whatever streamed so far for `error_text` and flag the reply.
pub fn fail_turn(sessions: Vec<ChatSession>, session_id: &str, error_text: &str) -> Vec<ChatSession> {
    with_placeholder(sessions, session_id, |message| {
        message.parts = vec![Part::text(error_text)];
        message.is_interrupted = true;
    })
}

pub fn remove_session(mut sessions: Vec<ChatSession>, session_id: &str) -> Vec<ChatSession> {
    sessions.retain(|s| s.id != session_id);
    sessions
}

/// Ids in `saved` that the store left out of `persisted`.
pub fn evicted_ids(saved: &[ChatSession], persisted: &[ChatSession]) -> Vec<String> {
    let kept: HashSet<&str> = persisted.iter().map(|s| s.id.as_str()).collect();
    saved
        .iter()
        .filter(|s| !kept.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect()
}

/// Drop the given sessions. Anything else, including sessions created after
/// the save was taken, stays.
pub fn evict(mut sessions: Vec<ChatSession>, evicted: &[String]) -> Vec<ChatSession> {
    sessions.retain(|s| !evicted.contains(&s.id));
    sessions
}

/// Prior turns as sent to the backend.
///
/// An interrupted reply is left out together with the question it answered,
/// so user and model turns keep alternating.
pub fn history_for_request(messages: &[Message]) -> Vec<Message> {
    let mut history: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        if is_interrupted_reply(message) {
            if history.last().is_some_and(|m| m.role == Role::User) {
                history.pop();
            }
            continue;
        }
        history.push(message.clone());
    }
    history
}

pub(crate) fn is_interrupted_reply(message: &Message) -> bool {
    message.role == Role::Model && message.is_interrupted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> Vec<ChatSession> {
        vec![
            ChatSession::new(20, vec![Message::user(vec![Part::text("b")])]),
            ChatSession::new(10, vec![Message::user(vec![Part::text("a")])]),
        ]
    }

    #[test]
    fn updates_follow_the_id_after_reordering() {
        let sessions = begin_turn(list(), "10", vec![Part::text("again")], 30);
        assert_eq!(sessions[0].id, "10");
        assert_eq!(sessions[0].timestamp, 30);

        let sessions = append_chunk(sessions, "10", "Hel");
        let sessions = append_chunk(sessions, "10", "lo");
        assert_eq!(sessions[0].messages.last().unwrap().text(), "Hello");
        assert_eq!(sessions[1].messages.len(), 1);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        assert_eq!(append_chunk(list(), "99", "x"), list());
        assert_eq!(fail_turn(list(), "99", "err"), list());
    }

    #[test]
    fn chunks_never_land_on_a_user_message() {
        assert_eq!(append_chunk(list(), "20", "x"), list());
    }

    #[test]
    fn failure_replaces_partial_text() {
        let sessions = begin_turn(list(), "20", vec![Part::text("q")], 30);
        let sessions = append_chunk(sessions, "20", "half an ans");
        let sessions = fail_turn(sessions, "20", "network down");
        let last = sessions[0].messages.last().unwrap();
        assert_eq!(last.parts, vec![Part::text("network down")]);
        assert!(last.is_interrupted);
    }

    #[test]
    fn insert_caps_the_list() {
        let mut sessions = Vec::new();
        for ts in 1..=MAX_HISTORY_ITEMS as i64 {
            sessions = insert_session(sessions, ChatSession::new(ts, vec![]));
        }
        let sessions = insert_session(sessions, ChatSession::new(100, vec![]));
        assert_eq!(sessions.len(), MAX_HISTORY_ITEMS);
        assert_eq!(sessions[0].id, "100");
        assert!(sessions.iter().all(|s| s.id != "1"));
    }

    #[test]
    fn eviction_only_touches_dropped_ids() {
        let saved = list();
        let persisted = vec![ChatSession::new(20, vec![])];
        let evicted = evicted_ids(&saved, &persisted);
        assert_eq!(evicted, vec!["10".to_string()]);

        // A session created while the save was running is not in `saved`.
        let current = insert_session(list(), ChatSession::new(30, vec![]));
        let sessions = evict(current, &evicted);
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["30", "20"]);
        // In-memory content wins over the persisted copy.
        assert_eq!(sessions[1].messages.len(), 1);
    }

    #[test]
    fn history_skips_interrupted_turns() {
        let mut failed = Message::model("oops");
        failed.is_interrupted = true;
        let messages = vec![
            Message::user(vec![Part::text("q1")]),
            Message::model("a1"),
            Message::user(vec![Part::text("q2")]),
            failed,
        ];
        let history = history_for_request(&messages);
        assert_eq!(history, messages[..2].to_vec());
        assert!(is_interrupted_reply(&messages[3]));

        assert!(history_for_request(&messages[2..]).is_empty());
    }
}
