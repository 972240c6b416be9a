//! Central error types for the orchestrator.
//!
//! Mirrors the hand-rolled `Display`/`Error` enums used throughout the rest of
//! this crate (see [`crate::loom::tool_protocol::ToolError`] and the
//! orchestration error types it descends from) rather than reaching for an
//! error-derive crate.

use std::error::Error;
use std::fmt;

use crate::loom::store::StoreError;
use crate::loom::tool_protocol::ToolError;

/// The five error kinds from the error-handling design, plus the catalog
/// loader's own failure mode.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// Fatal at process start; recoverable across a subsequent `reload()`.
    Catalog(String),
    /// An LLM or search provider call failed.
    Provider(String),
    /// The supervisor analyzer failed to produce a plan.
    Plan(String),
    /// Session persistence failed; the turn is aborted.
    Store(String),
    /// The turn was cancelled, cooperatively, before completion.
    Cancelled,
    /// A second turn was attempted on a session with one already in flight.
    Busy,
    /// The caller supplied an empty prompt.
    EmptyPrompt,
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Catalog(msg) => write!(f, "catalog error: {}", msg),
            OrchestratorError::Provider(msg) => write!(f, "provider error: {}", msg),
            OrchestratorError::Plan(msg) => write!(f, "plan error: {}", msg),
            OrchestratorError::Store(msg) => write!(f, "store error: {}", msg),
            OrchestratorError::Cancelled => write!(f, "turn cancelled"),
            OrchestratorError::Busy => write!(f, "a turn is already in progress for this session"),
            OrchestratorError::EmptyPrompt => write!(f, "prompt must not be empty"),
        }
    }
}

impl Error for OrchestratorError {}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        OrchestratorError::Store(e.to_string())
    }
}

impl From<ToolError> for OrchestratorError {
    fn from(e: ToolError) -> Self {
        OrchestratorError::Provider(e.to_string())
    }
}

impl From<Box<dyn Error + Send + Sync>> for OrchestratorError {
    fn from(e: Box<dyn Error + Send + Sync>) -> Self {
        OrchestratorError::Provider(e.to_string())
    }
}

/// Errors raised while loading or reloading the agent/tool catalog.
#[derive(Debug, Clone)]
pub enum CatalogError {
    /// The catalog document failed to parse as JSON.
    Malformed(String),
    /// An agent entry was missing `id` or `system_prompt`.
    InvalidAgent(String),
    /// The backing file could not be read.
    Io(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Malformed(msg) => write!(f, "malformed catalog: {}", msg),
            CatalogError::InvalidAgent(msg) => write!(f, "invalid agent definition: {}", msg),
            CatalogError::Io(msg) => write!(f, "catalog io error: {}", msg),
        }
    }
}

impl Error for CatalogError {}

impl From<CatalogError> for OrchestratorError {
    fn from(e: CatalogError) -> Self {
        OrchestratorError::Catalog(e.to_string())
    }
}
