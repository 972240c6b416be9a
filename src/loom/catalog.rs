//! Static agent/tool catalog document model and loader (§6).
//!
//! The catalog is the one JSON document the process reads at startup: a map
//! of agent definitions, a map of skill definitions, a map of tool
//! definitions, and a metadata block.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::loom::error::CatalogError;

/// Model parameters bound to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParameters {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

/// One agent definition loaded from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub parameters: AgentParameters,
    #[serde(default)]
    pub routing_keywords: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub version: String,
}

fn default_active() -> bool {
    true
}

/// A skill an agent may declare by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Relevance/fallback metadata for a tool (`web_search` or `knowledgebase`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    #[serde(default)]
    pub fallback_policy: String,
}

fn default_relevance_threshold() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub schema_version: String,
}

/// Raw on-disk document shape, deserialized as-is before validation.
///
/// `agents` is an [`IndexMap`] rather than a [`HashMap`] so that iteration
/// order matches the order keys appear in the source JSON object —
/// `serde_json` visits object keys in document order, and `IndexMap`'s
/// `Deserialize` impl inserts in visitation order. This is what lets
/// [`Catalog::agents`] expose real registry declaration order instead of an
/// incidental one.
#[derive(Debug, Clone, Deserialize)]
struct CatalogDocument {
    agents: IndexMap<String, AgentDefinition>,
    #[serde(default)]
    skills: HashMap<String, SkillDefinition>,
    #[serde(default)]
    tools: HashMap<String, ToolDefinition>,
    #[serde(default)]
    metadata: CatalogMetadata,
}

/// The validated, in-memory agent/tool catalog. Immutable once built —
/// [`crate::loom::registry::AgentRegistry`] swaps whole instances on reload
/// rather than mutating one in place.
#[derive(Debug, Clone)]
pub struct Catalog {
    agents: IndexMap<String, AgentDefinition>,
    skills: HashMap<String, SkillDefinition>,
    tools: HashMap<String, ToolDefinition>,
    pub metadata: CatalogMetadata,
}

impl Catalog {
    /// Parse and validate a catalog document. Rejects any agent missing `id`
    /// or `system_prompt` (serde already enforces both are present and
    /// non-optional); warns, but does not fail, on an agent referencing an
    /// unknown skill id, per §6.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument =
            serde_json::from_str(raw).map_err(|e| CatalogError::Malformed(e.to_string()))?;

        for (id, agent) in &doc.agents {
            if agent.id.is_empty() {
                return Err(CatalogError::InvalidAgent(format!(
                    "agent '{}' has an empty id",
                    id
                )));
            }
            if agent.system_prompt.trim().is_empty() {
                return Err(CatalogError::InvalidAgent(format!(
                    "agent '{}' has no system_prompt",
                    id
                )));
            }
            for skill_id in &agent.skills {
                if !doc.skills.contains_key(skill_id) {
                    log::warn!(
                        "agent '{}' references unknown skill id '{}'",
                        id,
                        skill_id
                    );
                }
            }
        }

        Ok(Self {
            agents: doc.agents,
            skills: doc.skills,
            tools: doc.tools,
            metadata: doc.metadata,
        })
    }

    pub fn agent(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    /// All agents, in true registry declaration order — the order they
    /// appear in the catalog JSON — which the analyzer's tie-breaking rule
    /// (§4.4 step 4) relies on.
    pub fn agents(&self) -> Vec<&AgentDefinition> {
        self.agents.values().collect()
    }

    pub fn agents_by_capability(&self, tag: &str) -> Vec<&str> {
        self.agents()
            .into_iter()
            .filter(|a| a.capabilities.iter().any(|c| c == tag))
            .map(|a| a.id.as_str())
            .collect()
    }

    pub fn routing_keywords(&self, id: &str) -> &[String] {
        self.agents
            .get(id)
            .map(|a| a.routing_keywords.as_slice())
            .unwrap_or(&[])
    }

    pub fn tool(&self, id: &str) -> Option<&ToolDefinition> {
        self.tools.get(id)
    }

    pub fn tools(&self) -> Vec<&ToolDefinition> {
        self.tools.values().collect()
    }

    pub fn skill(&self, id: &str) -> Option<&SkillDefinition> {
        self.skills.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> &'static str {
        r#"{
            "agents": {
                "granny": {
                    "id": "granny",
                    "name": "Granny",
                    "system_prompt": "You are a warm grandmother.",
                    "capabilities": ["cultural", "storytelling"],
                    "routing_keywords": ["granny", "grandmother", "tradition"],
                    "parameters": {"model": "gpt-4.1-mini", "temperature": 0.8, "max_tokens": 512}
                }
            },
            "skills": {},
            "tools": {
                "web_search": {"id": "web_search", "relevance_threshold": 0.4}
            },
            "metadata": {"version": "1", "schema_version": "1"}
        }"#
    }

    #[test]
    fn parses_valid_catalog() {
        let catalog = Catalog::parse(sample_doc()).unwrap();
        assert!(catalog.agent("granny").is_some());
        assert_eq!(catalog.agents().len(), 1);
        assert_eq!(catalog.tool("web_search").unwrap().relevance_threshold, 0.4);
    }

    #[test]
    fn rejects_missing_system_prompt() {
        let doc = r#"{"agents": {"x": {"id": "x", "name": "X", "system_prompt": "",
            "parameters": {"model": "m", "temperature": 0.5, "max_tokens": 10}}}}"#;
        assert!(Catalog::parse(doc).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Catalog::parse("not json").is_err());
    }
}
