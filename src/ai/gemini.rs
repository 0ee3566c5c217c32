use super::decode::{LineBuffer, SseAccumulator};
use super::{
    ChatError, ChatResult, LlmBackend, ReplyRequest, ReplyStream, StructuredRequest,
    parse_json_text,
};
use crate::types::{Part, Role};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const CHAT_TEMPERATURE: f32 = 0.5;

/// Direct client for the Gemini REST API.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl GeminiBackend {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
            api_base: API_BASE.to_string(),
        }
    }

    /// Point at a different API root (proxies, test servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}:{}", self.api_base, self.model, method)
    }
}

#[derive(Serialize)]
struct Content<'a> {
    role: Role,
    parts: &'a [Part],
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: SystemInstruction,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Text carried by one SSE payload of `streamGenerateContent`.
pub fn parse_gemini_sse_data(data: &str) -> ChatResult<String> {
    let parsed: GenerateResponse = serde_json::from_str(data.trim())?;
    Ok(parsed.text())
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> ChatResult<ReplyStream> {
        let mut contents: Vec<Content<'_>> = request
            .history
            .iter()
            .map(|m| Content {
                role: m.role,
                parts: &m.parts,
            })
            .collect();
        contents.push(Content {
            role: Role::User,
            parts: &request.new_parts,
        });

        let response = self
            .client
            .post(format!("{}?alt=sse", self.url("streamGenerateContent")))
            .header("x-goog-api-key", &self.api_key)
            .header("accept", "text/event-stream")
            .json(&GenerateRequest {
                contents,
                system_instruction: SystemInstruction {
                    parts: vec![Part::text(request.subject.system_prompt.clone())],
                },
                generation_config: GenerationConfig {
                    temperature: Some(CHAT_TEMPERATURE),
                    response_mime_type: None,
                    response_schema: None,
                },
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        let mut body = response.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            let mut lines = LineBuffer::default();
            let mut events = SseAccumulator::default();
            while let Some(item) = body.next().await {
                let bytes = item.map_err(|e| ChatError::Stream(e.to_string()))?;
                for line in lines.push(&bytes) {
                    if let Some(data) = events.push(&line) {
                        let piece = parse_gemini_sse_data(&data)?;
                        if !piece.is_empty() {
                            yield piece;
                        }
                    }
                }
            }
            let tail = lines.finish().and_then(|line| events.push(&line));
            if let Some(data) = tail.or_else(|| events.finish()) {
                let piece = parse_gemini_sse_data(&data)?;
                if !piece.is_empty() {
                    yield piece;
                }
            }
        }))
    }

    async fn complete_json(&self, request: StructuredRequest) -> ChatResult<serde_json::Value> {
        let prompt = [Part::text(request.prompt.clone())];
        let response = self
            .client
            .post(self.url("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateRequest {
                contents: vec![Content {
                    role: Role::User,
                    parts: &prompt,
                }],
                system_instruction: SystemInstruction {
                    parts: vec![Part::text(request.system_instruction.clone())],
                },
                generation_config: GenerationConfig {
                    temperature: None,
                    response_mime_type: Some("application/json"),
                    response_schema: Some(request.schema.clone()),
                },
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        parse_json_text(&parsed.text())
    }
}
