//! Agent Runner (C6).
//!
//! Composes one agent's LLM input for a turn and drives its streaming
//! completion, forwarding `stream_start`/`stream_chunk`/`stream_end` frames
//! through an [`EventHandler`] as they arrive (§4.6). Cancellation is
//! cooperative and edge-triggered: checked once per chunk, and on a trip a
//! terminal `stream_end{error:true}` frame is emitted with no text — a
//! cancelled turn never commits a partial assistant message to history
//! (stream-then-commit: nothing is appended until the full reply is in
//! hand).

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;

use crate::loom::catalog::AgentDefinition;
use crate::loom::client_wrapper::{ClientWrapper, Message as LlmMessage, Role};
use crate::loom::event::{EventHandler, StreamEvent};
use crate::loom::session::{Message as HistoryMessage, SenderRole};

/// Bounded conversation window handed to the LLM alongside the live turn
/// (§4.6).
pub const HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub enum AgentTurnOutcome {
    Completed { text: String },
    Cancelled,
    Failed { error: String },
}

pub struct AgentRunner;

impl AgentRunner {
    pub fn new() -> Self {
        Self
    }

    /// Build the composed LLM input: system prompt, tool-output prefix,
    /// prior-agent output, context-fusion directive, a bounded history
    /// window, then the live user prompt (§4.6, six-part structure).
    pub fn compose_prompt(
        &self,
        agent: &AgentDefinition,
        tool_outputs: &[(String, String)],
        prior_agent_output: Option<&str>,
        context_fusion_directive: Option<&str>,
        user_prompt: &str,
        history: &[HistoryMessage],
    ) -> Vec<LlmMessage> {
        let mut system_text = agent.system_prompt.clone();

        if !tool_outputs.is_empty() {
            let joined = tool_outputs
                .iter()
                .map(|(id, text)| format!("[{}]\n{}", id, text))
                .collect::<Vec<_>>()
                .join("\n\n");
            system_text.push_str(&format!(
                "\n\nTool results available for this turn:\n{}",
                joined
            ));
        }

        if let Some(prior) = prior_agent_output {
            system_text.push_str(&format!(
                "\n\nOutput from the prior agent in this turn:\n{}",
                prior
            ));
        }

        if let Some(directive) = context_fusion_directive {
            system_text.push_str(&format!("\n\n{}", directive));
        }

        let mut messages = vec![LlmMessage::new(Role::System, system_text)];

        let start = history.len().saturating_sub(HISTORY_WINDOW);
        if start > 0 {
            messages.push(LlmMessage::new(
                Role::System,
                format!("[{} earlier message(s) omitted from this turn's context]", start),
            ));
        }
        for entry in &history[start..] {
            let role = match &entry.sender {
                SenderRole::User => Role::User,
                SenderRole::Agent { .. } | SenderRole::Supervisor => Role::Assistant,
                SenderRole::Tool { .. } | SenderRole::System => continue,
            };
            messages.push(LlmMessage::new(role, entry.text.clone()));
        }

        messages.push(LlmMessage::new(Role::User, user_prompt.to_string()));
        messages
    }

    /// Drive one agent's streaming completion, forwarding frames through
    /// `events` as they arrive. `cancel` is polled once per chunk; `timeout`
    /// bounds the whole call — an elapsed deadline ends the turn the same
    /// way a provider error does, with a `stream_end{error:true}` frame and
    /// no committed text.
    pub async fn run(
        &self,
        session_id: &str,
        agent: &AgentDefinition,
        client: &dyn ClientWrapper,
        messages: &[LlmMessage],
        events: &dyn EventHandler,
        cancel: &AtomicBool,
        timeout: std::time::Duration,
    ) -> AgentTurnOutcome {
        let sender = agent.id.clone();
        events
            .on_event(session_id, &StreamEvent::StreamStart { sender: sender.clone() })
            .await;

        match tokio::time::timeout(
            timeout,
            self.stream_to_completion(session_id, &sender, client, messages, events, cancel),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                events
                    .on_event(
                        session_id,
                        &StreamEvent::StreamEnd {
                            sender: sender.clone(),
                            text: String::new(),
                            error: true,
                        },
                    )
                    .await;
                AgentTurnOutcome::Failed {
                    error: format!("agent '{}' timed out after {:?}", sender, timeout),
                }
            }
        }
    }

    async fn stream_to_completion(
        &self,
        session_id: &str,
        sender: &str,
        client: &dyn ClientWrapper,
        messages: &[LlmMessage],
        events: &dyn EventHandler,
        cancel: &AtomicBool,
    ) -> AgentTurnOutcome {
        let mut stream = match client.send_message_stream(messages).await {
            Ok(s) => s,
            Err(e) => {
                events
                    .on_event(
                        session_id,
                        &StreamEvent::StreamEnd {
                            sender: sender.to_string(),
                            text: String::new(),
                            error: true,
                        },
                    )
                    .await;
                return AgentTurnOutcome::Failed { error: e.to_string() };
            }
        };

        let mut buffer = String::new();
        while let Some(item) = stream.next().await {
            if cancel.load(Ordering::Relaxed) {
                events
                    .on_event(
                        session_id,
                        &StreamEvent::StreamEnd {
                            sender: sender.to_string(),
                            text: String::new(),
                            error: true,
                        },
                    )
                    .await;
                return AgentTurnOutcome::Cancelled;
            }
            match item {
                Ok(chunk) => {
                    if !chunk.content.is_empty() {
                        buffer.push_str(&chunk.content);
                        events
                            .on_event(
                                session_id,
                                &StreamEvent::StreamChunk {
                                    sender: sender.to_string(),
                                    text: chunk.content.clone(),
                                },
                            )
                            .await;
                    }
                }
                Err(e) => {
                    events
                        .on_event(
                            session_id,
                            &StreamEvent::StreamEnd {
                                sender: sender.to_string(),
                                text: String::new(),
                                error: true,
                            },
                        )
                        .await;
                    return AgentTurnOutcome::Failed { error: e.to_string() };
                }
            }
        }

        events
            .on_event(
                session_id,
                &StreamEvent::StreamEnd {
                    sender: sender.to_string(),
                    text: buffer.clone(),
                    error: false,
                },
            )
            .await;
        AgentTurnOutcome::Completed { text: buffer }
    }
}

impl Default for AgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::catalog::AgentParameters;
    use crate::loom::client_wrapper::{MessageChunk, MessageChunkStream};
    use async_trait::async_trait;
    use std::error::Error;

    fn agent() -> AgentDefinition {
        AgentDefinition {
            id: "granny".to_string(),
            name: "Granny".to_string(),
            description: String::new(),
            system_prompt: "You are a warm grandmother.".to_string(),
            capabilities: vec![],
            skills: vec![],
            parameters: AgentParameters {
                temperature: 0.8,
                model: "m".to_string(),
                max_tokens: 256,
            },
            routing_keywords: vec![],
            active: true,
            category: String::new(),
            version: String::new(),
        }
    }

    struct StubClient {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl ClientWrapper for StubClient {
        async fn send_message(
            &self,
            _messages: &[LlmMessage],
        ) -> Result<LlmMessage, Box<dyn Error + Send + Sync>> {
            Ok(LlmMessage::new(Role::Assistant, self.chunks.concat()))
        }

        async fn send_message_stream(
            &self,
            _messages: &[LlmMessage],
        ) -> Result<MessageChunkStream, Box<dyn Error + Send + Sync>> {
            let items: Vec<Result<MessageChunk, Box<dyn Error + Send + Sync>>> = self
                .chunks
                .iter()
                .map(|c| {
                    Ok(MessageChunk {
                        content: c.to_string(),
                        finish_reason: None,
                    })
                })
                .collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }

        fn model_name(&self) -> &str {
            "m"
        }
    }

    #[test]
    fn compose_prompt_includes_tool_output_and_history_window() {
        let runner = AgentRunner::new();
        let history = vec![HistoryMessage {
            seq: 0,
            sender: SenderRole::User,
            text: "earlier message".to_string(),
            timestamp: chrono::Utc::now(),
            annotations: Default::default(),
        }];
        let messages = runner.compose_prompt(
            &agent(),
            &[("web_search".to_string(), "result text".to_string())],
            None,
            Some("Integrate the tool output into a warm narrative."),
            "what's the weather",
            &history,
        );
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("result text"));
        assert!(messages[0].content.contains("warm narrative"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(&*messages[1].content, "earlier message");
        assert_eq!(messages.last().unwrap().role, Role::User);
        assert_eq!(&*messages.last().unwrap().content, "what's the weather");
    }

    #[test]
    fn compose_prompt_marks_elided_history_with_a_placeholder() {
        let runner = AgentRunner::new();
        let history: Vec<HistoryMessage> = (0..HISTORY_WINDOW + 5)
            .map(|i| HistoryMessage {
                seq: i as u64,
                sender: SenderRole::User,
                text: format!("message {}", i),
                timestamp: chrono::Utc::now(),
                annotations: Default::default(),
            })
            .collect();
        let messages = runner.compose_prompt(&agent(), &[], None, None, "latest", &history);
        assert_eq!(messages[1].role, Role::System);
        assert!(messages[1].content.contains('5'));
        assert_eq!(&*messages[2].content, "message 5");
    }

    #[tokio::test]
    async fn run_streams_chunks_and_pairs_start_end() {
        use crate::loom::event::NoopEventHandler;
        let runner = AgentRunner::new();
        let client = StubClient {
            chunks: vec!["Hello", ", dear."],
        };
        let cancel = AtomicBool::new(false);
        let outcome = runner
            .run(
                "s1",
                &agent(),
                &client,
                &[LlmMessage::new(Role::User, "hi")],
                &NoopEventHandler,
                &cancel,
                std::time::Duration::from_secs(5),
            )
            .await;
        match outcome {
            AgentTurnOutcome::Completed { text } => assert_eq!(text, "Hello, dear."),
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancellation_before_any_chunk_yields_no_committed_text() {
        use crate::loom::event::NoopEventHandler;
        let runner = AgentRunner::new();
        let client = StubClient {
            chunks: vec!["partial"],
        };
        let cancel = AtomicBool::new(true);
        let outcome = runner
            .run(
                "s1",
                &agent(),
                &client,
                &[LlmMessage::new(Role::User, "hi")],
                &NoopEventHandler,
                &cancel,
                std::time::Duration::from_secs(5),
            )
            .await;
        assert!(matches!(outcome, AgentTurnOutcome::Cancelled));
    }

    #[tokio::test]
    async fn run_times_out_without_committing_partial_text() {
        use crate::loom::event::NoopEventHandler;
        struct StallingClient;
        #[async_trait]
        impl ClientWrapper for StallingClient {
            async fn send_message(
                &self,
                _messages: &[LlmMessage],
            ) -> Result<LlmMessage, Box<dyn Error + Send + Sync>> {
                unreachable!()
            }
            async fn send_message_stream(
                &self,
                _messages: &[LlmMessage],
            ) -> Result<MessageChunkStream, Box<dyn Error + Send + Sync>> {
                let stream = futures_util::stream::pending::<Result<MessageChunk, Box<dyn Error + Send + Sync>>>();
                Ok(Box::pin(stream))
            }
            fn model_name(&self) -> &str {
                "stall"
            }
        }

        let runner = AgentRunner::new();
        let cancel = AtomicBool::new(false);
        let outcome = runner
            .run(
                "s1",
                &agent(),
                &StallingClient,
                &[LlmMessage::new(Role::User, "hi")],
                &NoopEventHandler,
                &cancel,
                std::time::Duration::from_millis(20),
            )
            .await;
        assert!(matches!(outcome, AgentTurnOutcome::Failed { .. }));
    }
}
