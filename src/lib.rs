// src/lib.rs

pub mod loom;

pub use loom::agent::{AgentRunner, AgentTurnOutcome};
pub use loom::catalog::Catalog;
pub use loom::client_wrapper::{ClientFactory, ClientWrapper, Message, Role};
pub use loom::error::OrchestratorError;
pub use loom::event::{EventHandler, StreamEvent};
pub use loom::orchestrator::Orchestrator;
pub use loom::registry::AgentRegistry;
pub use loom::session::Session;
pub use loom::store::SessionStore;
