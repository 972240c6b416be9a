//! Tool execution protocol.
//!
//! This system has exactly two statically-known tools (`web_search`,
//! `knowledgebase`) addressed directly by id from
//! [`crate::loom::tool_runtime::ToolRuntime`] — no pluggable multi-protocol
//! registry is needed. What's kept is a narrow trait and result/error shape
//! general enough to cover both tools without per-tool branching above this
//! layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Outcome of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The result text surfaced to consumers (§4.2 — "consumers display only
    /// the result text").
    pub fn text(&self) -> String {
        if self.success {
            self.output
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| self.output.to_string())
        } else {
            self.error.clone().unwrap_or_default()
        }
    }
}

/// A tool's execution interface. One implementation per statically-known
/// tool id.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn execute(
        &self,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    fn tool_id(&self) -> &str;
}

#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    ExecutionFailed(String),
    InvalidParameters(String),
    Timeout(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "invalid parameters: {}", msg),
            ToolError::Timeout(name) => write!(f, "tool '{}' timed out", name),
        }
    }
}

impl Error for ToolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prefers_string_output() {
        let result = ToolResult::success(serde_json::json!("hello"));
        assert_eq!(result.text(), "hello");
    }

    #[test]
    fn text_falls_back_to_error_on_failure() {
        let result = ToolResult::failure("boom");
        assert_eq!(result.text(), "boom");
    }
}
