use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Maximum number of chat sessions kept per subject.
pub const MAX_HISTORY_ITEMS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 payload, kept opaque.
    pub data: String,
}

/// One content unit of a message: text or inline binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::Inline {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::Inline { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_interrupted: bool,
}

impl Message {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
            is_interrupted: false,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
            is_interrupted: false,
        }
    }

    /// The empty model message appended when a turn begins.
    pub fn placeholder() -> Self {
        Self::model(String::new())
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn is_model(&self) -> bool {
        matches!(self.role, Role::Model)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    /// Last-modified instant in milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub messages: Vec<Message>,
}

impl ChatSession {
    pub fn new(timestamp: i64, messages: Vec<Message>) -> Self {
        Self {
            id: timestamp.to_string(),
            timestamp,
            messages,
        }
    }

    pub fn touch(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// First user text, trimmed to `max_chars`, for session lists.
    pub fn title(&self, max_chars: usize) -> String {
        let first = self
            .messages
            .iter()
            .find(|msg| matches!(msg.role, Role::User))
            .map(Message::text)
            .unwrap_or_default();
        let trimmed = first.trim();
        if trimmed.is_empty() {
            return "New chat".to_string();
        }
        let mut title: String = trimmed.chars().take(max_chars).collect();
        if trimmed.chars().count() > max_chars {
            title.push('…');
        }
        title
    }
}

/// Sort newest first. Ties keep their relative order.
pub fn sort_newest_first(sessions: &mut [ChatSession]) {
    sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
