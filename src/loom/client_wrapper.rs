//! Shared primitives for provider-agnostic LLM clients.
//!
//! The agent runner (C6) talks to a concrete LLM provider only through the
//! [`ClientWrapper`] trait defined here, a narrow-capability shape that
//! decouples the orchestrator from any one vendor SDK. There is no native
//! function-calling surface: this system runs tools itself (C2) and folds
//! their output into the prompt text handed to the agent (§4.6), so the wire
//! types stay to chat messages, streaming chunks, and token accounting.

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Represents the possible roles for a message sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// A single chat message exchanged with the provider.
#[derive(Clone, Debug)]
pub struct Message {
    pub role: Role,
    /// Stored as `Arc<str>` so conversation histories can be cheaply cloned.
    pub content: Arc<str>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One incremental chunk of a streaming completion.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content delta in this chunk. May be empty for chunks
    /// that only carry a finish reason.
    pub content: String,
    pub finish_reason: Option<String>,
}

/// Stream of message chunks compatible with `Send` executors.
pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, Box<dyn Error + Send + Sync>>> + Send>>;

/// Trait-driven abstraction for a concrete LLM provider.
///
/// Implementations translate chat requests into the provider's wire format
/// and back. All implementations must be `Send + Sync` so they can be shared
/// across concurrently-running session turns.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion.
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Request a streaming completion. The default implementation degrades to
    /// a single-chunk stream built from [`ClientWrapper::send_message`] so
    /// that a provider need not implement true token streaming to satisfy the
    /// trait; providers that do support it should override this.
    async fn send_message_stream(
        &self,
        messages: &[Message],
    ) -> Result<MessageChunkStream, Box<dyn Error + Send + Sync>> {
        let full = self.send_message(messages).await?;
        let chunk = MessageChunk {
            content: full.content.to_string(),
            finish_reason: Some("stop".to_string()),
        };
        Ok(Box::pin(futures_util::stream::once(async { Ok(chunk) })))
    }

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1-mini"`).
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the most recent call.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared mutable slot where an implementation can persist token usage.
    /// Providers that expose billing information should return
    /// `Some(&Mutex<Option<TokenUsage>>)`.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}

/// Resolves the concrete [`ClientWrapper`] to use for a given agent's
/// configured model/parameters. Kept separate from `ClientWrapper` itself so
/// the orchestrator never has to know how a client is constructed or cached.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client_for(&self, agent: &crate::loom::catalog::AgentDefinition) -> Arc<dyn ClientWrapper>;
}
