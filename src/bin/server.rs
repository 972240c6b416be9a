//! HTTP server entry point (requires the `server` feature).
//!
//! Wires together the catalog-backed registry, the session store, the tool
//! runtime, and the orchestrator, then serves the axum router from
//! [`agentloom::loom::api`]. Exit codes follow §6: 0 clean exit, 1
//! configuration error, 2 unexpected crash.

use std::sync::Arc;

use agentloom::loom::api::{router, AppState};
use agentloom::loom::clients::openai_compatible::OpenAiClientFactory;
use agentloom::loom::config::OrchestratorConfig;
use agentloom::loom::event::BroadcastEventHandler;
use agentloom::loom::registry::AgentRegistry;
use agentloom::loom::search_provider::HttpSearchProvider;
use agentloom::loom::store::SessionStore;
use agentloom::loom::tool_protocol::ToolProtocol;
use agentloom::loom::tool_runtime::ToolRuntime;
use agentloom::loom::tools::knowledgebase::{KnowledgeCatalog, KnowledgebaseTool};
use agentloom::loom::tools::web_search::WebSearchTool;
use agentloom::Orchestrator;

const DEFAULT_AGENT_ID: &str = "narrator";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env().init();

    let config = match OrchestratorConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let registry = match AgentRegistry::load(&config.catalog_path).await {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("failed to load catalog '{}': {}", config.catalog_path, e);
            std::process::exit(1);
        }
    };

    let knowledge = match tokio::fs::read_to_string(&config.knowledge_path).await {
        Ok(raw) => match KnowledgeCatalog::parse(&raw) {
            Ok(catalog) => Arc::new(catalog),
            Err(e) => {
                eprintln!("malformed knowledge catalog '{}': {}", config.knowledge_path, e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            log::warn!(
                "knowledge catalog '{}' not readable ({}); knowledgebase tool will have no entries",
                config.knowledge_path,
                e
            );
            Arc::new(KnowledgeCatalog::parse("{}").expect("empty catalog always parses"))
        }
    };

    let mut tools: Vec<Arc<dyn ToolProtocol>> = vec![Arc::new(KnowledgebaseTool::new((*knowledge).clone()))];
    if let Some(search_key) = &config.web_search_api_key {
        let provider = Arc::new(HttpSearchProvider::new(search_key.clone()));
        tools.push(Arc::new(WebSearchTool::new(provider)));
    } else {
        log::info!("WEB_SEARCH_API_KEY not set; web_search tool disabled");
    }

    let store = Arc::new(SessionStore::new(config.sessions_path.clone()));
    let tool_runtime = Arc::new(ToolRuntime::new(tools, registry.clone(), config.tool_timeout));
    let client_factory = Arc::new(OpenAiClientFactory::new(config.llm_api_key.clone()));
    let broadcaster = Arc::new(BroadcastEventHandler::new());

    let orchestrator = Arc::new(
        Orchestrator::new(
            registry.clone(),
            store.clone(),
            tool_runtime,
            client_factory,
            broadcaster.clone(),
            DEFAULT_AGENT_ID,
        )
        .with_timeouts(config.agent_timeout, config.turn_timeout),
    );

    let state = AppState {
        orchestrator,
        registry,
        store,
        broadcaster,
        knowledge,
    };

    let app = router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {}: {}", addr, e);
            std::process::exit(2);
        }
    };

    log::info!("agentloom-server listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("server error: {}", e);
        std::process::exit(2);
    }
}
