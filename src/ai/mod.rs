//! AI module for Lyceum
//!
//! This module provides a unified interface to the tutor's text-generation
//! service. Every backend can stream a reply and produce structured JSON for
//! quizzes and flashcards; the controller never knows which one it talks to.
//!
//! # Architecture
//!
//! - `endpoint` - Hosted tutor proxy (`/api/chat`, `/api/quiz`, ...)
//! - `gemini` - Direct Gemini REST calls with SSE streaming
//! - `ollama` - Local Ollama with JSONL streaming
//! - `hosted` - OpenAI / Anthropic through Rig agents (single-shot replies)
//! - `demo` - Canned, offline replies
//!
//! # Usage
//!
//! ```rust,no_run
//! use lyceum::ai::backend_from_settings;
//! use lyceum::config::Settings;
//!
//! # fn example() -> anyhow::Result<()> {
//! let settings = Settings::load()?;
//! let backend = backend_from_settings(&settings)?;
//! println!("using {}", backend.name());
//! # Ok(())
//! # }
//! ```

mod decode;
pub mod demo;
pub mod endpoint;
pub mod gemini;
pub mod hosted;
pub mod ollama;

use crate::config::Settings;
use crate::study::StudyKind;
use crate::subjects::Subject;
use crate::types::{Message, Part};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub use decode::{Utf8Decoder, parse_sse_line};
pub use demo::DemoBackend;
pub use endpoint::EndpointBackend;
pub use gemini::GeminiBackend;
pub use hosted::RigBackend;
pub use ollama::OllamaBackend;

/// Text shown in place of a reply that was cut off by teardown.
pub const INTERRUPTED_TEXT: &str =
    "This response was interrupted before it finished. Please try again.";

const NETWORK_ERROR_TEXT: &str =
    "I'm sorry, I encountered a network error. Please check your connection and try again.";
const GENERIC_ERROR_TEXT: &str = "I'm sorry, I encountered an error while processing your request. Please try again later. Here's an example of what you could ask: 'Explain Newton's laws of motion.'";

// ============================================
// Error Types
// ============================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("service error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("stream broke off: {0}")]
    Stream(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("{0}")]
    NotConfigured(String),

    #[error("turn cancelled")]
    Cancelled,
}

impl ChatError {
    /// The text written into a failed reply.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Http(_) | ChatError::Stream(_) => NETWORK_ERROR_TEXT.to_string(),
            ChatError::Status { message, .. } => {
                format!("I'm sorry, I encountered an error: {message}")
            }
            ChatError::Decode(_) | ChatError::Provider(_) => GENERIC_ERROR_TEXT.to_string(),
            ChatError::NotConfigured(msg) => msg.clone(),
            ChatError::Cancelled => INTERRUPTED_TEXT.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChatError::Decode(err.to_string())
        } else {
            ChatError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Decode(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

// ============================================
// Requests
// ============================================

/// Ordered text fragments of one reply, ending at end-of-stream.
pub type ReplyStream = Pin<Box<dyn Stream<Item = ChatResult<String>> + Send>>;

#[derive(Clone, Debug)]
pub struct ReplyRequest {
    pub subject: Subject,
    /// Prior turns, interrupted replies already removed.
    pub history: Vec<Message>,
    pub new_parts: Vec<Part>,
}

#[derive(Clone, Debug)]
pub struct StructuredRequest {
    pub kind: StudyKind,
    pub subject: Subject,
    /// Recent conversation the items are drawn from.
    pub context: Vec<Message>,
    pub count: usize,
    pub system_instruction: String,
    pub prompt: String,
    /// Gemini-style response schema describing the expected JSON array.
    pub schema: serde_json::Value,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Start a reply. Errors before the first fragment come back here;
    /// errors mid-stream come back as stream items.
    async fn stream_reply(&self, request: ReplyRequest) -> ChatResult<ReplyStream>;

    /// Produce a JSON document for a study set.
    async fn complete_json(&self, request: StructuredRequest) -> ChatResult<serde_json::Value>;
}

/// Wrap a completed reply as a one-fragment stream.
pub fn single_chunk(text: String) -> ReplyStream {
    Box::pin(futures::stream::once(async move { Ok(text) }))
}

/// Parse model text that should hold JSON, tolerating a markdown fence.
pub fn parse_json_text(text: &str) -> ChatResult<serde_json::Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(body.trim())?)
}

/// Pick a backend. Priority: demo mode -> hosted endpoint -> Gemini ->
/// OpenAI -> Anthropic -> Ollama.
pub fn backend_from_settings(settings: &Settings) -> ChatResult<Arc<dyn LlmBackend>> {
    let http = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()?;

    if settings.demo_mode {
        return Ok(Arc::new(DemoBackend::default()));
    }
    if let Some(endpoint) = &settings.endpoint {
        return Ok(Arc::new(EndpointBackend::new(http, endpoint.clone())));
    }
    if let Some(key) = &settings.gemini_api_key {
        return Ok(Arc::new(GeminiBackend::new(
            http,
            key.clone(),
            settings.gemini_model.clone(),
        )));
    }
    if let Some(key) = &settings.openai_api_key {
        return Ok(Arc::new(RigBackend::openai(key, &settings.openai_model)));
    }
    if let Some(key) = &settings.anthropic_api_key {
        return Ok(Arc::new(RigBackend::anthropic(
            key,
            &settings.anthropic_model,
        )));
    }
    if settings.use_ollama {
        return Ok(Arc::new(OllamaBackend::new(
            http,
            &settings.ollama_host,
            settings.ollama_model.clone(),
        )));
    }

    Err(ChatError::NotConfigured(
        "No AI provider configured. Set LYCEUM_DEMO_MODE=true, LYCEUM_ENDPOINT, GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY, or LLM_USE_OLLAMA=true.".to_string(),
    ))
}

/// Text-only view of a message, used by backends without multimodal input.
pub(crate) fn text_of(message: &Message) -> String {
    message
        .parts
        .iter()
        .filter_map(Part::as_text)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let value = parse_json_text("```json\n[{\"a\":1}]\n```").unwrap();
        assert!(value.is_array());
        assert!(parse_json_text("not json").is_err());
    }

    #[test]
    fn status_errors_surface_the_service_message() {
        let err = ChatError::Status {
            status: 500,
            message: "Internal Server Error".to_string(),
        };
        assert_eq!(
            err.user_message(),
            "I'm sorry, I encountered an error: Internal Server Error"
        );
        assert_eq!(ChatError::Cancelled.user_message(), INTERRUPTED_TEXT);
    }

    #[test]
    fn selection_prefers_demo_then_endpoint() {
        let mut settings = Settings {
            demo_mode: true,
            endpoint: Some("http://localhost:3000".to_string()),
            ..Settings::default()
        };
        assert_eq!(backend_from_settings(&settings).unwrap().name(), "demo");

        settings.demo_mode = false;
        assert_eq!(backend_from_settings(&settings).unwrap().name(), "endpoint");

        let err = backend_from_settings(&Settings::default()).err().unwrap();
        assert!(matches!(err, ChatError::NotConfigured(_)));
    }
}
