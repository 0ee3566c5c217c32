use super::decode::Utf8Decoder;
use super::{ChatError, ChatResult, LlmBackend, ReplyRequest, ReplyStream, StructuredRequest};
use crate::study::StudyKind;
use crate::subjects::Subject;
use crate::types::{Message, Part};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Client for the hosted tutor proxy.
///
/// `POST /api/chat` streams the reply as a plain-text body; the structured
/// routes answer with a JSON array. Failures carry `{ "error": ... }`.
pub struct EndpointBackend {
    client: Client,
    base_url: String,
}

impl EndpointBackend {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/api/{}", self.base_url.trim_end_matches('/'), route)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    subject: &'a Subject,
    messages: &'a [Message],
    new_parts: &'a [Part],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StudyRequest<'a> {
    subject: &'a Subject,
    messages: &'a [Message],
    question_count: usize,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

fn route_for(kind: StudyKind) -> &'static str {
    match kind {
        StudyKind::Quiz => "quiz",
        StudyKind::ExtraHardQuiz => "quiz-hard",
        StudyKind::Flashcards => "flashcards",
    }
}

/// Turn a non-2xx response into a `Status` error, preferring the body's
/// `error` field over the reason phrase.
async fn status_error(response: reqwest::Response) -> ChatError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|parsed| parsed.error)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| body.clone());
    ChatError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl LlmBackend for EndpointBackend {
    fn name(&self) -> &str {
        "endpoint"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> ChatResult<ReplyStream> {
        let response = self
            .client
            .post(self.url("chat"))
            .json(&ChatRequest {
                subject: &request.subject,
                messages: &request.history,
                new_parts: &request.new_parts,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let mut body = response.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            let mut decoder = Utf8Decoder::default();
            while let Some(item) = body.next().await {
                let bytes = item.map_err(|e| ChatError::Stream(e.to_string()))?;
                let text = decoder.push(&bytes);
                if !text.is_empty() {
                    yield text;
                }
            }
            let rest = decoder.finish();
            if !rest.is_empty() {
                yield rest;
            }
        }))
    }

    async fn complete_json(&self, request: StructuredRequest) -> ChatResult<serde_json::Value> {
        let response = self
            .client
            .post(self.url(route_for(request.kind)))
            .json(&StudyRequest {
                subject: &request.subject,
                messages: &request.context,
                question_count: request.count,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_routes_from_base_url() {
        let backend = EndpointBackend::new(Client::new(), "https://tutor.example/");
        assert_eq!(backend.url("chat"), "https://tutor.example/api/chat");
        assert_eq!(route_for(StudyKind::Flashcards), "flashcards");
    }

    #[test]
    fn chat_request_uses_wire_field_names() {
        let subject = crate::subjects::find("physics").unwrap();
        let parts = vec![Part::text("Define kinetic energy.")];
        let json = serde_json::to_value(ChatRequest {
            subject,
            messages: &[],
            new_parts: &parts,
        })
        .unwrap();
        assert_eq!(json["newParts"][0]["text"], "Define kinetic energy.");
        assert_eq!(json["subject"]["systemPrompt"], subject.system_prompt);
    }
}
