//! Session API (C9) — thin HTTP CRUD surface (§6), behind the `server`
//! feature.
//!
//! A thin axum router over a shared app-state handle, with concrete, fully
//! implemented routes. This system carries no authentication at all, so the
//! adapter here is transport plumbing only.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::loom::event::BroadcastEventHandler;
use crate::loom::orchestrator::Orchestrator;
use crate::loom::registry::AgentRegistry;
use crate::loom::session::PlanEntry;
use crate::loom::store::SessionStore;
use crate::loom::tools::knowledgebase::KnowledgeCatalog;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<AgentRegistry>,
    pub store: Arc<SessionStore>,
    pub broadcaster: Arc<BroadcastEventHandler>,
    pub knowledge: Arc<KnowledgeCatalog>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/cleanup", post(cleanup_chats))
        .route("/chats/{id}", get(get_chat))
        .route("/chats/{id}/settings", post(update_settings))
        .route("/chats/{id}/supervisor", post(set_supervisor))
        .route("/chats/{id}/message", post(send_message))
        .route("/chats/{id}/message/stream", post(stream_message))
        .route("/agents", get(list_agents))
        .route("/tools", get(list_tools))
        .route("/knowledgebase", get(list_knowledgebase))
        .with_state(state)
}

fn err_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

async fn list_chats(State(state): State<AppState>) -> Response {
    match state.store.list().await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn create_chat(State(state): State<AppState>) -> Response {
    match state.store.create().await {
        Ok(id) => match state.store.get(&id).await {
            Ok(session) => {
                (StatusCode::CREATED, Json(json!({ "id": id, "created_at": session.created_at }))).into_response()
            }
            Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn get_chat(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id).await {
        Ok(session) => Json(session).into_response(),
        Err(_) => err_response(StatusCode::NOT_FOUND, format!("session '{}' not found", id)),
    }
}

#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    agent_sequence: Option<Vec<PlanEntry>>,
    supervisor_mode: Option<bool>,
}

async fn update_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SettingsUpdate>,
) -> Response {
    let mut session = match state.store.get(&id).await {
        Ok(s) => s,
        Err(_) => return err_response(StatusCode::NOT_FOUND, format!("session '{}' not found", id)),
    };
    if let Some(entries) = body.agent_sequence {
        session.settings.manual_plan.entries = entries;
    }
    if let Some(mode) = body.supervisor_mode {
        session.settings.supervisor_mode = mode;
    }
    match state.store.put(&id, &session).await {
        Ok(()) => Json(session).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Debug, Deserialize)]
struct SupervisorQuery {
    enabled: bool,
}

async fn set_supervisor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SupervisorQuery>,
) -> Response {
    let mut session = match state.store.get(&id).await {
        Ok(s) => s,
        Err(_) => return err_response(StatusCode::NOT_FOUND, format!("session '{}' not found", id)),
    };
    session.settings.supervisor_mode = query.enabled;
    match state.store.put(&id, &session).await {
        Ok(()) => Json(session).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    prompt: String,
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MessageRequest>,
) -> Response {
    match state.orchestrator.handle_turn(&id, &body.prompt).await {
        Ok(()) => match state.store.get(&id).await {
            Ok(session) => Json(session).into_response(),
            Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        Err(e) => err_response(StatusCode::from_u16(status_for(&e)).unwrap(), e),
    }
}

/// Signals [`Orchestrator::cancel_turn`] for its session when dropped —
/// i.e. when the NDJSON response body is torn down, whether because the
/// turn finished normally or because the client disconnected mid-stream
/// (§5). Calling `cancel_turn` after the turn already completed is a
/// documented no-op, so this is safe to run unconditionally.
struct CancelOnDrop {
    orchestrator: Arc<Orchestrator>,
    session_id: String,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.orchestrator.cancel_turn(&self.session_id);
    }
}

/// Wraps the NDJSON body stream together with a [`CancelOnDrop`] guard so
/// the guard's `Drop` fires exactly when axum tears down the response body
/// (stream exhaustion or client disconnect), without changing any item the
/// stream yields.
struct GuardedStream<S> {
    inner: S,
    _guard: CancelOnDrop,
}

impl<S: Stream + Unpin> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

async fn stream_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MessageRequest>,
) -> Response {
    let rx = state.broadcaster.subscribe(&id).await;
    let broadcaster = state.broadcaster.clone();
    let orchestrator = state.orchestrator.clone();
    let session_id = id.clone();
    let prompt = body.prompt.clone();

    tokio::spawn(async move {
        let _ = orchestrator.handle_turn(&session_id, &prompt).await;
        broadcaster.unsubscribe(&session_id).await;
    });

    let inner =
        UnboundedReceiverStream::new(rx).map(|event| Ok::<String, std::io::Error>(event.to_line()));
    let body_stream = GuardedStream {
        inner,
        _guard: CancelOnDrop {
            orchestrator: state.orchestrator.clone(),
            session_id: id,
        },
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .body(Body::from_stream(body_stream))
        .expect("static response parts")
}

async fn list_agents(State(state): State<AppState>) -> Response {
    Json(state.registry.list().await).into_response()
}

async fn list_tools(State(state): State<AppState>) -> Response {
    Json(state.registry.tools().await).into_response()
}

async fn list_knowledgebase(State(state): State<AppState>) -> Response {
    let entries: Vec<serde_json::Value> = state
        .knowledge
        .keys()
        .into_iter()
        .map(|(key, label)| json!({ "key": key, "label": label }))
        .collect();
    Json(entries).into_response()
}

async fn cleanup_chats(State(state): State<AppState>) -> Response {
    match state.store.cleanup().await {
        Ok(removed) => Json(json!({ "removed": removed })).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn status_for(error: &crate::loom::error::OrchestratorError) -> u16 {
    use crate::loom::error::OrchestratorError::*;
    match error {
        EmptyPrompt => 400,
        Busy => 409,
        Cancelled => 499,
        Catalog(_) | Plan(_) => 500,
        Provider(_) => 502,
        Store(_) => 500,
    }
}
