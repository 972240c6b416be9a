//! The streaming message protocol (C8).
//!
//! One [`StreamEvent`] per newline-delimited JSON frame on the live response
//! stream (§6). The wire shape intentionally varies field-by-field between
//! variants (e.g. `tool` carries `for_agent`, `supervisor` carries
//! `routing_decision`), so frames are built directly as [`serde_json::Value`]
//! rather than through a single `#[derive(Serialize)]` enum whose field
//! presence can't vary per-variant without extra attributes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// One framed record on a session's response stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    User {
        text: String,
    },
    Tool {
        tool_id: String,
        text: String,
        for_agent: String,
        via_supervisor: Option<bool>,
    },
    Supervisor {
        text: String,
        routing_decision: Option<String>,
        chosen_agent: Option<String>,
        supervisor_type: Option<String>,
    },
    StreamStart {
        sender: String,
    },
    StreamChunk {
        sender: String,
        text: String,
    },
    StreamEnd {
        sender: String,
        text: String,
        error: bool,
    },
    SystemError {
        text: String,
    },
}

impl StreamEvent {
    /// Render this event as the JSON object that goes out on the wire.
    pub fn to_json(&self) -> Value {
        match self {
            StreamEvent::User { text } => json!({ "sender": "user", "text": text }),
            StreamEvent::Tool {
                tool_id,
                text,
                for_agent,
                via_supervisor,
            } => {
                let mut obj = json!({
                    "sender": "tool",
                    "tool_id": tool_id,
                    "text": text,
                    "for_agent": for_agent,
                });
                if let Some(v) = via_supervisor {
                    obj["via_supervisor"] = json!(v);
                }
                obj
            }
            StreamEvent::Supervisor {
                text,
                routing_decision,
                chosen_agent,
                supervisor_type,
            } => {
                let mut obj = json!({ "sender": "supervisor", "text": text });
                if let Some(v) = routing_decision {
                    obj["routing_decision"] = json!(v);
                }
                if let Some(v) = chosen_agent {
                    obj["chosen_agent"] = json!(v);
                }
                if let Some(v) = supervisor_type {
                    obj["supervisor_type"] = json!(v);
                }
                obj
            }
            StreamEvent::StreamStart { sender } => {
                json!({ "sender": sender, "stream_start": true })
            }
            StreamEvent::StreamChunk { sender, text } => {
                json!({ "sender": sender, "stream_chunk": true, "text": text })
            }
            StreamEvent::StreamEnd {
                sender,
                text,
                error,
            } => {
                let mut obj = json!({ "sender": sender, "stream_end": true, "text": text });
                if *error {
                    obj["error"] = json!(true);
                }
                obj
            }
            StreamEvent::SystemError { text } => {
                json!({ "sender": "system", "error": true, "text": text })
            }
        }
    }

    /// Render as one NDJSON line, including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{}\n", self.to_json())
    }

    /// The `sender` this frame is attributed to, used for pairing
    /// `stream_start`/`stream_end` frames per agent id (Testable Properties §8).
    pub fn sender(&self) -> &str {
        match self {
            StreamEvent::User { .. } => "user",
            StreamEvent::Tool { .. } => "tool",
            StreamEvent::Supervisor { .. } => "supervisor",
            StreamEvent::StreamStart { sender }
            | StreamEvent::StreamChunk { sender, .. }
            | StreamEvent::StreamEnd { sender, .. } => sender,
            StreamEvent::SystemError { .. } => "system",
        }
    }
}

/// Observer for frames as they are emitted during a turn.
///
/// Default methods are no-ops — implementors override only the notifications
/// they care about (structured test assertions, metrics, audit logging).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, _session_id: &str, _event: &StreamEvent) {}
}

/// An `EventHandler` that observes nothing.
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {
    async fn on_event(&self, _session_id: &str, _event: &StreamEvent) {}
}

/// Fans out events to whichever session ids currently have an active
/// `/message/stream` subscriber, and drops them otherwise (§6's streaming
/// route is the only consumer; a plain `/message` call has no subscriber and
/// every frame is a no-op send). Used by the HTTP surface (C9) to bridge one
/// [`Orchestrator`](crate::loom::orchestrator::Orchestrator) instance's
/// single `events` field to per-request NDJSON streams.
pub struct BroadcastEventHandler {
    subscribers: RwLock<HashMap<String, mpsc::UnboundedSender<StreamEvent>>>,
}

impl BroadcastEventHandler {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.insert(session_id.to_string(), tx);
        rx
    }

    pub async fn unsubscribe(&self, session_id: &str) {
        self.subscribers.write().await.remove(session_id);
    }
}

impl Default for BroadcastEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for BroadcastEventHandler {
    async fn on_event(&self, session_id: &str, event: &StreamEvent) {
        if let Some(tx) = self.subscribers.read().await.get(session_id) {
            let _ = tx.send(event.clone());
        }
    }
}
