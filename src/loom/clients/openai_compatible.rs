//! Reference LLM provider client: any OpenAI Chat Completions-compatible
//! endpoint.
//!
//! This is the one concrete [`ClientWrapper`] implementation the crate
//! bundles; the concrete LLM provider is out of core scope beyond this one
//! reference client, implemented directly against the HTTP wire format over
//! a pooled `reqwest::Client`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::loom::catalog::AgentDefinition;
use crate::loom::client_wrapper::{
    ClientFactory, ClientWrapper, Message, MessageChunk, MessageChunkStream, Role, TokenUsage,
};
use crate::loom::clients::common::get_shared_http_client;

/// A client for any OpenAI Chat Completions-compatible API.
pub struct OpenAiCompatibleClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: Option<u32>,
    last_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAiCompatibleClient {
    /// Construct a client targeting the default `https://api.openai.com/v1`
    /// base URL.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1")
    }

    /// Construct a client targeting a custom base URL, for self-hosted or
    /// third-party OpenAI-compatible gateways.
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            temperature: 0.7,
            max_tokens: None,
            last_usage: Mutex::new(None),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content.as_ref() })
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[async_trait]
impl ClientWrapper for OpenAiCompatibleClient {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::wire_messages(messages),
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let resp = get_shared_http_client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("provider returned {}: {}", status, text).into());
        }

        let parsed: ChatResponse = resp.json().await?;
        if let Some(usage) = parsed.usage {
            let mut slot = self.last_usage.lock().await;
            *slot = Some(TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(Message::new(Role::Assistant, content))
    }

    async fn send_message_stream(
        &self,
        messages: &[Message],
    ) -> Result<MessageChunkStream, Box<dyn Error + Send + Sync>> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::wire_messages(messages),
            "temperature": self.temperature,
            "stream": true,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let resp = get_shared_http_client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("provider returned {}: {}", status, text).into());
        }

        let byte_stream = resp.bytes_stream();
        let stream = byte_stream.flat_map(|chunk_result| {
            let chunks: Vec<Result<MessageChunk, Box<dyn Error + Send + Sync>>> =
                match chunk_result {
                    Ok(bytes) => parse_sse_chunk(&bytes),
                    Err(e) => vec![Err(Box::new(e) as Box<dyn Error + Send + Sync>)],
                };
            futures_util::stream::iter(chunks)
        });

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.last_usage)
    }
}

/// Parse a raw SSE frame (`data: {...}\n\n`, possibly multiple lines, possibly
/// the `[DONE]` sentinel) into zero or more chunks.
fn parse_sse_chunk(bytes: &[u8]) -> Vec<Result<MessageChunk, Box<dyn Error + Send + Sync>>> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if payload == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(parsed) => {
                if let Some(choice) = parsed.choices.into_iter().next() {
                    out.push(Ok(MessageChunk {
                        content: choice.delta.content.unwrap_or_default(),
                        finish_reason: choice.finish_reason,
                    }));
                }
            }
            Err(e) => out.push(Err(format!("malformed stream chunk: {}", e).into())),
        }
    }
    out
}

/// Builds and caches one [`OpenAiCompatibleClient`] per agent id, keyed on
/// the agent's own model/temperature/max_tokens so two agents sharing a
/// model but differing in parameters never collide (§4.6, §6).
pub struct OpenAiClientFactory {
    api_key: String,
    base_url: Option<String>,
    cache: RwLock<HashMap<String, Arc<dyn ClientWrapper>>>,
}

impl OpenAiClientFactory {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[async_trait]
impl ClientFactory for OpenAiClientFactory {
    async fn client_for(&self, agent: &AgentDefinition) -> Arc<dyn ClientWrapper> {
        if let Some(existing) = self.cache.read().await.get(&agent.id) {
            return existing.clone();
        }
        let mut client = match &self.base_url {
            Some(url) => OpenAiCompatibleClient::with_base_url(
                self.api_key.clone(),
                agent.parameters.model.clone(),
                url.clone(),
            ),
            None => OpenAiCompatibleClient::new(self.api_key.clone(), agent.parameters.model.clone()),
        };
        client = client
            .with_temperature(agent.parameters.temperature)
            .with_max_tokens(agent.parameters.max_tokens);
        let client: Arc<dyn ClientWrapper> = Arc::new(client);
        self.cache
            .write()
            .await
            .insert(agent.id.clone(), client.clone());
        client
    }
}
