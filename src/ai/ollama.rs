use super::decode::LineBuffer;
use super::{
    ChatError, ChatResult, LlmBackend, ReplyRequest, ReplyStream, StructuredRequest,
    parse_json_text, text_of,
};
use crate::types::{Message, Part, Role};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct OllamaBackend {
    client: Client,
    model: String,
    endpoint: String,
}

impl OllamaBackend {
    pub fn new(client: Client, host: &str, model: String) -> Self {
        Self {
            client,
            model,
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

impl OllamaMessage {
    fn system(content: &str) -> Self {
        Self {
            role: "system",
            content: content.to_string(),
            images: Vec::new(),
        }
    }

    fn from_parts(role: Role, parts: &[Part]) -> Self {
        let images = parts
            .iter()
            .filter_map(|part| match part {
                Part::Inline { inline_data } if inline_data.mime_type.starts_with("image/") => {
                    Some(inline_data.data.clone())
                }
                _ => None,
            })
            .collect();
        let content = text_of(&Message {
            role,
            parts: parts.to_vec(),
            is_interrupted: false,
        });
        Self {
            role: match role {
                Role::User => "user",
                Role::Model => "assistant",
            },
            content,
            images,
        }
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChunkMessage {
    pub content: String,
}

#[derive(Deserialize, Debug)]
pub struct StreamChunk {
    pub message: Option<StreamChunkMessage>,
    pub done: Option<bool>,
    pub error: Option<String>,
}

/// One JSONL line of `/api/chat` streaming output as `(piece, done)`.
pub fn parse_ollama_stream_line(line_with_ws: &str) -> ChatResult<Option<(String, bool)>> {
    let line = line_with_ws.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: StreamChunk = serde_json::from_str(line)?;
    if let Some(error) = parsed.error {
        return Err(ChatError::Stream(error));
    }
    let piece = parsed.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((piece, parsed.done.unwrap_or(false))))
}

fn build_messages(system_prompt: &str, history: &[Message], new_parts: &[Part]) -> Vec<OllamaMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(OllamaMessage::system(system_prompt));
    messages.extend(
        history
            .iter()
            .map(|m| OllamaMessage::from_parts(m.role, &m.parts)),
    );
    messages.push(OllamaMessage::from_parts(Role::User, new_parts));
    messages
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> ChatResult<ReplyStream> {
        let messages = build_messages(
            &request.subject.system_prompt,
            &request.history,
            &request.new_parts,
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaChatRequest {
                model: &self.model,
                messages: &messages,
                stream: true,
                format: None,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: format!("Ollama error: {body}"),
            });
        }

        let mut body = response.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            let mut lines = LineBuffer::default();
            'read: while let Some(item) = body.next().await {
                let bytes = item.map_err(|e| ChatError::Stream(e.to_string()))?;
                for line in lines.push(&bytes) {
                    if let Some((piece, done)) = parse_ollama_stream_line(&line)? {
                        if !piece.is_empty() {
                            yield piece;
                        }
                        if done {
                            break 'read;
                        }
                    }
                }
            }
        }))
    }

    async fn complete_json(&self, request: StructuredRequest) -> ChatResult<serde_json::Value> {
        let messages = vec![
            OllamaMessage::system(&request.system_instruction),
            OllamaMessage::from_parts(Role::User, &[Part::text(request.prompt.clone())]),
        ];
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaChatRequest {
                model: &self.model,
                messages: &messages,
                stream: false,
                format: Some("json"),
            })
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: format!("Ollama error: {body}"),
            });
        }

        #[derive(Deserialize)]
        struct OllamaChatResponse {
            message: Option<StreamChunkMessage>,
        }

        let parsed: OllamaChatResponse = serde_json::from_str(&body)?;
        let content = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| ChatError::Decode("Ollama reply had no message".to_string()))?;
        parse_json_text(&content)
    }
}
