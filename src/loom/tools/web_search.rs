//! The `web_search` tool.
//!
//! Wraps a [`SearchProvider`] behind the [`ToolProtocol`] interface so the
//! tool runtime can invoke it uniformly alongside `knowledgebase` — a thin
//! struct over a pooled HTTP client, returning structured results that get
//! flattened to text for the caller.

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

use crate::loom::search_provider::SearchProvider;
use crate::loom::tool_protocol::{ToolProtocol, ToolResult};

pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ToolProtocol for WebSearchTool {
    async fn execute(
        &self,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let query = parameters
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or("web_search requires a 'query' parameter")?;

        let results = self.provider.search(query).await?;
        if results.is_empty() {
            return Ok(ToolResult::success(serde_json::json!(
                "No web results found."
            ))
            .with_metadata("query", serde_json::json!(query)));
        }

        let text = results
            .iter()
            .take(5)
            .map(|r| format!("{} — {} ({})", r.title, r.snippet, r.url))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolResult::success(serde_json::json!(text))
            .with_metadata("query", serde_json::json!(query))
            .with_metadata("result_count", serde_json::json!(results.len())))
    }

    fn tool_id(&self) -> &str {
        "web_search"
    }
}
