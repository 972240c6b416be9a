//! Tool Runtime (C2).
//!
//! Decides whether a tool is relevant to a prompt, generates a focused query,
//! and executes it with a timeout and a per-turn result cache. The relevance
//! heuristics are plain keyword/regex rules (§4.2) — no LLM call is on this
//! path, keeping tool selection fast and deterministic.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::loom::registry::AgentRegistry;
use crate::loom::tool_protocol::{ToolProtocol, ToolResult};

/// Outcome of one `maybe_run` call, matching the three shapes in §4.2.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Used { result: ToolResult, query: String },
    Skipped { reason: String },
    Failed { error: String },
}

/// Key identifying one tool invocation for the per-turn cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolCacheKey {
    pub tool_id: String,
    pub prompt: String,
    pub option: Option<String>,
}

/// Process-local, single-turn result cache (§5 — "not shared across turns or
/// sessions"). Owned by the orchestrator for the duration of one turn and
/// handed to the tool runtime by reference.
pub type ToolCache = HashMap<ToolCacheKey, ToolOutcome>;

const TEMPORAL_CUES: &[&str] = &[
    "today", "now", "latest", "weather", "news", "price", "current", "this week",
];

const CIORBA_CUES: &[&str] = &["ciorba", "romanian soup", "sour soup"];

const KNOWN_LOCATIONS: &[&str] = &[
    "bucharest", "romania", "paris", "london", "new york", "berlin", "tokyo",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "of", "in", "on", "at", "to", "and", "for", "me", "what",
    "what's", "can", "you", "tell", "about", "please",
];

pub struct ToolRuntime {
    tools: HashMap<String, Arc<dyn ToolProtocol>>,
    registry: Arc<AgentRegistry>,
    timeout: Duration,
    date_re: Regex,
}

impl ToolRuntime {
    pub fn new(
        tools: Vec<Arc<dyn ToolProtocol>>,
        registry: Arc<AgentRegistry>,
        timeout: Duration,
    ) -> Self {
        let mut map = HashMap::new();
        for tool in tools {
            map.insert(tool.tool_id().to_string(), tool);
        }
        Self {
            tools: map,
            registry,
            timeout,
            date_re: Regex::new(r"(?i)\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}(/\d{2,4})?|yesterday|tomorrow|last week|next week)\b")
                .expect("static regex"),
        }
    }

    /// Decide relevance, execute if relevant, and populate `cache`.
    pub async fn maybe_run(
        &self,
        cache: &mut ToolCache,
        tool_id: &str,
        prompt: &str,
        option: Option<&str>,
        for_agent: &str,
    ) -> ToolOutcome {
        let key = ToolCacheKey {
            tool_id: tool_id.to_string(),
            prompt: prompt.to_string(),
            option: option.map(|s| s.to_string()),
        };
        if let Some(cached) = cache.get(&key) {
            return cached.clone();
        }

        let outcome = self.run_uncached(tool_id, prompt, option, for_agent).await;
        cache.insert(key, outcome.clone());
        outcome
    }

    async fn run_uncached(
        &self,
        tool_id: &str,
        prompt: &str,
        option: Option<&str>,
        for_agent: &str,
    ) -> ToolOutcome {
        let relevance = match tool_id {
            "web_search" => self.web_search_relevance(prompt).await,
            "knowledgebase" => self.knowledgebase_relevance(prompt, option),
            other => {
                return ToolOutcome::Failed {
                    error: format!("unknown tool id '{}'", other),
                }
            }
        };

        let query = match relevance {
            None => {
                return ToolOutcome::Skipped {
                    reason: format!("'{}' not relevant to prompt", tool_id),
                }
            }
            Some(q) => q,
        };

        let Some(tool) = self.tools.get(tool_id) else {
            return ToolOutcome::Skipped {
                reason: format!("tool '{}' is not configured", tool_id),
            };
        };

        let params = match tool_id {
            "web_search" => serde_json::json!({ "query": query }),
            "knowledgebase" => serde_json::json!({ "key": option.unwrap_or_default() }),
            _ => serde_json::Value::Null,
        };

        let call = tool.execute(params);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => {
                log::debug!("tool '{}' ran for agent '{}'", tool_id, for_agent);
                ToolOutcome::Used { result, query }
            }
            Ok(Err(e)) => ToolOutcome::Failed {
                error: e.to_string(),
            },
            Err(_) => ToolOutcome::Failed {
                error: format!("tool '{}' timed out after {:?}", tool_id, self.timeout),
            },
        }
    }

    /// `web_search` relevance: temporal/current-information cues (§4.2).
    /// Returns the focused query when relevant.
    async fn web_search_relevance(&self, prompt: &str) -> Option<String> {
        let lower = prompt.to_lowercase();
        let hit = TEMPORAL_CUES.iter().any(|cue| lower.contains(cue)) || self.date_re.is_match(prompt);
        if !hit {
            return None;
        }
        Some(self.focused_query(prompt, "web_search").await)
    }

    /// `knowledgebase` relevance: requires at least one domain-specific term
    /// (conservative — a generic word is not enough, per §4.2).
    fn knowledgebase_relevance(&self, prompt: &str, option: Option<&str>) -> Option<String> {
        let lower = prompt.to_lowercase();
        match option {
            Some("ciorba") | None => {
                if CIORBA_CUES.iter().any(|cue| lower.contains(cue)) {
                    Some(option.unwrap_or("ciorba").to_string())
                } else {
                    None
                }
            }
            Some(other) => {
                // Unrecognized sub-document key: still allow the caller to
                // force a lookup (manual plan explicitly bound this option).
                Some(other.to_string())
            }
        }
    }

    /// Build a focused search query by combining extracted entities
    /// (locations, dates) with the tool's `use_cases` template, falling back
    /// to the raw prompt minus stop words when extraction yields nothing
    /// usable (§4.2).
    async fn focused_query(&self, prompt: &str, tool_id: &str) -> String {
        let lower = prompt.to_lowercase();
        let mut entities: Vec<String> = KNOWN_LOCATIONS
            .iter()
            .filter(|loc| lower.contains(*loc))
            .map(|loc| capitalize_words(loc))
            .collect();
        entities.extend(self.date_re.find_iter(prompt).map(|m| m.as_str().to_string()));

        if entities.is_empty() {
            return self.stopword_fallback(prompt);
        }

        let use_cases = self
            .registry
            .tool(tool_id)
            .await
            .map(|t| t.use_cases)
            .unwrap_or_default();
        if use_cases.is_empty() {
            entities.join(" ")
        } else {
            format!("{} {}", entities.join(" "), use_cases.join(" "))
        }
    }

    fn stopword_fallback(&self, prompt: &str) -> String {
        let words: Vec<&str> = prompt
            .split_whitespace()
            .filter(|w| {
                let cleaned = w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
                !cleaned.is_empty() && !STOP_WORDS.contains(&cleaned.as_str())
            })
            .collect();
        if words.is_empty() {
            prompt.to_string()
        } else {
            words.join(" ")
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }
}

fn capitalize_words(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
