//! Concrete LLM and search provider clients.
//!
//! Only one of each is bundled, matching the scope boundary in §1: a
//! reference OpenAI-compatible chat client and a reference HTTP-based search
//! client. Everything else in the orchestrator talks to providers only
//! through the [`crate::loom::client_wrapper::ClientWrapper`] and
//! [`crate::loom::search_provider::SearchProvider`] traits.

pub mod common;
pub mod openai_compatible;
