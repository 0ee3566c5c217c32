use super::{ChatResult, LlmBackend, ReplyRequest, ReplyStream, StructuredRequest};
use crate::study::StudyKind;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const FALLBACK_REPLY: &str = "This is a demo response. Everything seems to be working!";

/// Offline backend that replays each subject's canned answer.
pub struct DemoBackend {
    delay: Duration,
}

impl Default for DemoBackend {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(20),
        }
    }
}

impl DemoBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl LlmBackend for DemoBackend {
    fn name(&self) -> &str {
        "demo"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> ChatResult<ReplyStream> {
        let reply = request
            .subject
            .demo_response
            .unwrap_or_else(|| FALLBACK_REPLY.to_string());
        let delay = self.delay;
        Ok(Box::pin(async_stream::stream! {
            for ch in reply.chars() {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(ch.to_string());
            }
        }))
    }

    async fn complete_json(&self, request: StructuredRequest) -> ChatResult<serde_json::Value> {
        let items = match request.kind {
            StudyKind::Quiz | StudyKind::ExtraHardQuiz => vec![
                json!({"question": "What is 2 + 2?", "options": ["3", "4", "5", "6"], "correctAnswer": "4"}),
                json!({"question": "What is the capital of France?", "options": ["London", "Berlin", "Paris", "Madrid"], "correctAnswer": "Paris"}),
                json!({"question": "Which planet is known as the Red Planet?", "options": ["Earth", "Mars", "Jupiter", "Venus"], "correctAnswer": "Mars"}),
            ],
            StudyKind::Flashcards => vec![
                json!({"front": "Photosynthesis", "back": "Turning light energy into chemical energy."}),
                json!({"front": "Inertia", "back": "An object's resistance to changes in its motion."}),
                json!({"front": "Covalent bond", "back": "A bond formed by sharing electron pairs."}),
            ],
        };
        Ok(serde_json::Value::Array(
            items.into_iter().take(request.count).collect(),
        ))
    }
}
