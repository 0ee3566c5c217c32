use super::{
    ChatError, ChatResult, LlmBackend, ReplyRequest, ReplyStream, StructuredRequest,
    parse_json_text, single_chunk, text_of,
};
use crate::types::{Message, Role};
use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{Chat, Prompt};
use rig::providers;

const MAX_TOKENS: u64 = 4096;
const CHAT_TEMPERATURE: f64 = 0.5;

enum ProviderClient {
    OpenAI(providers::openai::Client),
    Anthropic(providers::anthropic::Client),
}

/// OpenAI or Anthropic through Rig agents. Replies arrive in one piece.
pub struct RigBackend {
    client: ProviderClient,
    model: String,
}

impl RigBackend {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            client: ProviderClient::OpenAI(providers::openai::Client::new(api_key)),
            model: model.to_string(),
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            client: ProviderClient::Anthropic(providers::anthropic::Client::new(api_key)),
            model: model.to_string(),
        }
    }

    async fn chat(&self, preamble: &str, message: String, history: Vec<Message>) -> ChatResult<String> {
        let rig_messages = convert_to_rig_messages(history);
        let reply = match &self.client {
            ProviderClient::OpenAI(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(preamble)
                    .max_tokens(MAX_TOKENS)
                    .temperature(CHAT_TEMPERATURE)
                    .build();
                agent.chat(message.as_str(), rig_messages).await
            }
            ProviderClient::Anthropic(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(preamble)
                    .max_tokens(MAX_TOKENS)
                    .temperature(CHAT_TEMPERATURE)
                    .build();
                agent.chat(message.as_str(), rig_messages).await
            }
        };
        reply.map_err(|e| ChatError::Provider(e.to_string()))
    }

    async fn prompt(&self, preamble: &str, message: &str) -> ChatResult<String> {
        let reply = match &self.client {
            ProviderClient::OpenAI(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(preamble)
                    .max_tokens(MAX_TOKENS)
                    .build();
                agent.prompt(message).await
            }
            ProviderClient::Anthropic(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(preamble)
                    .max_tokens(MAX_TOKENS)
                    .build();
                agent.prompt(message).await
            }
        };
        reply.map_err(|e| ChatError::Provider(e.to_string()))
    }
}

/// Convert tutor messages to Rig's text-only message format.
fn convert_to_rig_messages(messages: Vec<Message>) -> Vec<rig::message::Message> {
    messages
        .into_iter()
        .map(|msg| {
            let content = text_of(&msg);
            match msg.role {
                Role::User => rig::message::Message::user(content),
                Role::Model => rig::message::Message::assistant(content),
            }
        })
        .collect()
}

#[async_trait]
impl LlmBackend for RigBackend {
    fn name(&self) -> &str {
        match self.client {
            ProviderClient::OpenAI(_) => "openai",
            ProviderClient::Anthropic(_) => "anthropic",
        }
    }

    async fn stream_reply(&self, request: ReplyRequest) -> ChatResult<ReplyStream> {
        let message = text_of(&Message::user(request.new_parts));
        let reply = self
            .chat(&request.subject.system_prompt, message, request.history)
            .await?;
        Ok(single_chunk(reply))
    }

    async fn complete_json(&self, request: StructuredRequest) -> ChatResult<serde_json::Value> {
        let prompt = format!(
            "{}\n\nRespond with JSON only, matching this schema:\n{}",
            request.prompt, request.schema
        );
        let reply = self.prompt(&request.system_instruction, &prompt).await?;
        parse_json_text(&reply)
    }
}
