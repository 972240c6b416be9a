//! Process configuration.
//!
//! A plain struct read directly from the environment — no file-format
//! parsing dependency is introduced for it.

use std::time::Duration;

/// Runtime configuration for the orchestrator process.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// API key for the LLM provider. Required.
    pub llm_api_key: String,
    /// API key for the web-search provider. Absence disables the
    /// `web_search` tool definition at registry load time.
    pub web_search_api_key: Option<String>,
    /// Path to the agent/tool catalog document.
    pub catalog_path: String,
    /// Directory backing the session store.
    pub sessions_path: String,
    /// Path to the knowledgebase tool's key → source document.
    pub knowledge_path: String,
    /// Port the HTTP server binds to, when built with the `server` feature.
    pub port: u16,
    /// Default timeout for a single tool call.
    pub tool_timeout: Duration,
    /// Default timeout for a single agent (LLM) call.
    pub agent_timeout: Duration,
    /// Default timeout for an entire turn.
    pub turn_timeout: Duration,
    /// Number of trailing history messages fed to an agent as context.
    pub history_window: usize,
}

/// Failure loading configuration from the environment.
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl OrchestratorConfig {
    /// Load configuration from environment variables, applying defaults for
    /// everything but `LLM_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| ConfigError("LLM_API_KEY is required".to_string()))?;

        Ok(Self {
            llm_api_key,
            web_search_api_key: std::env::var("WEB_SEARCH_API_KEY").ok(),
            catalog_path: std::env::var("CATALOG_PATH").unwrap_or_else(|_| "catalog.json".into()),
            sessions_path: std::env::var("SESSIONS_PATH").unwrap_or_else(|_| "sessions".into()),
            knowledge_path: std::env::var("KNOWLEDGE_PATH").unwrap_or_else(|_| "knowledge.json".into()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            tool_timeout: Duration::from_secs(15),
            agent_timeout: Duration::from_secs(60),
            turn_timeout: Duration::from_secs(120),
            history_window: 20,
        })
    }
}
