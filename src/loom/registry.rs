//! Agent Registry (C1).
//!
//! An `Arc<RwLock<Catalog>>`-style snapshot registry: readers take a brief
//! read-lock to clone the `Arc<Catalog>` and then operate on it lock-free,
//! while `reload()` builds the replacement catalog to completion off to the
//! side before swapping it in under a brief write-lock. No reader ever
//! observes a partially constructed catalog.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::loom::catalog::{AgentDefinition, Catalog, ToolDefinition};
use crate::loom::error::CatalogError;

pub struct AgentRegistry {
    catalog: RwLock<Arc<Catalog>>,
}

impl AgentRegistry {
    /// Load the catalog document at `path` and build a registry from it.
    pub async fn load(path: &str) -> Result<Self, CatalogError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogError::Io(e.to_string()))?;
        let catalog = Catalog::parse(&raw)?;
        Ok(Self {
            catalog: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Build a registry directly from an already-parsed catalog (tests, or a
    /// caller that fetches the document from somewhere other than the
    /// filesystem).
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Re-read and re-validate the catalog document, then atomically swap it
    /// in. On parse failure the previously loaded catalog remains active.
    pub async fn reload(&self, path: &str) -> Result<(), CatalogError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogError::Io(e.to_string()))?;
        let next = Catalog::parse(&raw)?;
        let mut guard = self.catalog.write().await;
        *guard = Arc::new(next);
        log::info!("agent/tool catalog reloaded from {}", path);
        Ok(())
    }

    async fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<AgentDefinition> {
        self.snapshot().await.agent(id).cloned()
    }

    pub async fn list(&self) -> Vec<AgentDefinition> {
        self.snapshot()
            .await
            .agents()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn by_capability(&self, tag: &str) -> Vec<String> {
        self.snapshot()
            .await
            .agents_by_capability(tag)
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub async fn keywords(&self, id: &str) -> Vec<String> {
        self.snapshot().await.routing_keywords(id).to_vec()
    }

    pub async fn tool(&self, id: &str) -> Option<ToolDefinition> {
        self.snapshot().await.tool(id).cloned()
    }

    pub async fn tools(&self) -> Vec<ToolDefinition> {
        self.snapshot().await.tools().into_iter().cloned().collect()
    }

    /// The agents are scored against in declaration order for tie-breaking
    /// (§4.4 step 4); expose the live snapshot so the analyzer can iterate it
    /// directly without a second lock round-trip per agent.
    pub async fn snapshot_catalog(&self) -> Arc<Catalog> {
        self.snapshot().await
    }
}
