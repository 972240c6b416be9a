//! Data model (§3): sessions, messages, and the manual plan.
//!
//! Messages are timestamped and role-tagged, with a closed sender-role set
//! and structured annotations rather than a free-form metadata map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of message senders (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SenderRole {
    User,
    Agent { agent_id: String },
    Tool { tool_id: String },
    Supervisor,
    System,
}

impl SenderRole {
    /// The wire-facing sender string used in stream events and history
    /// rendering, e.g. `"agent:granny"`.
    pub fn as_wire_string(&self) -> String {
        match self {
            SenderRole::User => "user".to_string(),
            SenderRole::Agent { agent_id } => agent_id.clone(),
            SenderRole::Tool { tool_id } => format!("tool:{}", tool_id),
            SenderRole::Supervisor => "supervisor".to_string(),
            SenderRole::System => "system".to_string(),
        }
    }
}

/// Structured annotations a message may carry (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageAnnotations {
    pub tool_id: Option<String>,
    pub target_agent_id: Option<String>,
    pub via_supervisor: Option<bool>,
    #[serde(default)]
    pub error: bool,
}

/// One immutable entry in session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Monotonic per-session sequence number assigned at append time, giving
    /// the append-only log a stable total order independent of wall-clock
    /// resolution.
    pub seq: u64,
    pub sender: SenderRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub annotations: MessageAnnotations,
}

/// A tool bound to a manual-plan entry. Only `knowledgebase` uses `option`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolBinding {
    Bare(String),
    WithOption { tool_id: String, option: String },
}

impl ToolBinding {
    pub fn tool_id(&self) -> &str {
        match self {
            ToolBinding::Bare(id) => id,
            ToolBinding::WithOption { tool_id, .. } => tool_id,
        }
    }

    pub fn option(&self) -> Option<&str> {
        match self {
            ToolBinding::Bare(_) => None,
            ToolBinding::WithOption { option, .. } => Some(option),
        }
    }
}

/// One entry in a manual pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub agent_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
}

/// A user-authored ordered sequence of plan entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualPlan {
    pub entries: Vec<PlanEntry>,
}

impl ManualPlan {
    pub fn enabled_entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_entries().count()
    }
}

/// Per-session settings: which mode is active, and the manual plan (kept even
/// while supervisor mode is on, so toggling back off restores it — scenario 5
/// in §8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    pub supervisor_mode: bool,
    pub manual_plan: ManualPlan,
}

/// A conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub history: Vec<Message>,
    pub settings: SessionSettings,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    next_seq: u64,
}

impl Session {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            settings: SessionSettings::default(),
            created_at,
            next_seq: 0,
        }
    }

    /// Append a message, assigning it the next sequence number.
    pub fn append(
        &mut self,
        sender: SenderRole,
        text: impl Into<String>,
        annotations: MessageAnnotations,
        now: DateTime<Utc>,
    ) -> &Message {
        let message = Message {
            seq: self.next_seq,
            sender,
            text: text.into(),
            timestamp: now,
            annotations,
        };
        self.next_seq += 1;
        self.history.push(message);
        self.history.last().expect("just pushed")
    }

    /// A session is retained by `list()`/`cleanup()` iff it has ≥1 message OR
    /// ≥1 enabled agent in its manual plan (§3, §4.3).
    pub fn is_retained(&self) -> bool {
        !self.history.is_empty() || self.settings.manual_plan.enabled_count() > 0
    }
}
