//! The `knowledgebase` tool.
//!
//! Backed by a static JSON map of key → `{label, path|inline_text}` (§6).
//! `inline_text` is held in memory; `path` entries are read lazily on first
//! use and then cached, following the lazy-load-then-cache shape of the
//! teacher's `tools/memory.rs` key-value store (there TTL-based, here simply
//! load-once since the source documents are static for the process
//! lifetime).

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use tokio::sync::RwLock;

use crate::loom::tool_protocol::{ToolProtocol, ToolResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KnowledgeSource {
    Path { path: String, label: String },
    Inline { inline_text: String, label: String },
}

/// Parsed `key → {label, path|inline_text}` document.
#[derive(Debug, Clone)]
pub struct KnowledgeCatalog {
    entries: HashMap<String, KnowledgeSource>,
}

impl KnowledgeCatalog {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, KnowledgeSource> = serde_json::from_str(raw)?;
        Ok(Self { entries })
    }

    pub fn keys(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|(k, v)| {
                let label = match v {
                    KnowledgeSource::Path { label, .. } => label.as_str(),
                    KnowledgeSource::Inline { label, .. } => label.as_str(),
                };
                (k.as_str(), label)
            })
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

pub struct KnowledgebaseTool {
    catalog: KnowledgeCatalog,
    cache: RwLock<HashMap<String, String>>,
}

impl KnowledgebaseTool {
    pub fn new(catalog: KnowledgeCatalog) -> Self {
        Self {
            catalog,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &KnowledgeCatalog {
        &self.catalog
    }

    async fn body_for(&self, key: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        if let Some(cached) = self.cache.read().await.get(key) {
            return Ok(cached.clone());
        }

        let source = self
            .catalog
            .entries
            .get(key)
            .ok_or_else(|| format!("unknown knowledgebase key '{}'", key))?;

        let body = match source {
            KnowledgeSource::Inline { inline_text, .. } => inline_text.clone(),
            KnowledgeSource::Path { path, .. } => tokio::fs::read_to_string(path).await?,
        };

        self.cache
            .write()
            .await
            .insert(key.to_string(), body.clone());
        Ok(body)
    }
}

#[async_trait]
impl ToolProtocol for KnowledgebaseTool {
    async fn execute(
        &self,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let key = parameters
            .get("key")
            .and_then(|v| v.as_str())
            .ok_or("knowledgebase requires a 'key' parameter")?;

        let body = self.body_for(key).await?;
        Ok(ToolResult::success(serde_json::json!(body))
            .with_metadata("key", serde_json::json!(key)))
    }

    fn tool_id(&self) -> &str {
        "knowledgebase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_inline_text() {
        let catalog = KnowledgeCatalog::parse(
            r#"{"ciorba": {"label": "Ciorba", "inline_text": "Romanian sour soup."}}"#,
        )
        .unwrap();
        let tool = KnowledgebaseTool::new(catalog);
        let result = tool
            .execute(serde_json::json!({"key": "ciorba"}))
            .await
            .unwrap();
        assert!(result.text().contains("sour soup"));
    }

    #[tokio::test]
    async fn unknown_key_fails() {
        let catalog = KnowledgeCatalog::parse("{}").unwrap();
        let tool = KnowledgebaseTool::new(catalog);
        assert!(tool.execute(serde_json::json!({"key": "nope"})).await.is_err());
    }
}
