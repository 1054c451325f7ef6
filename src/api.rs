//! HTTP API over the assistant.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::agent::{Assistant, TurnRequest};
use crate::capabilities::Capability;
use crate::config::parse_tags;
use crate::error::{Error, SessionError, WorkflowError};
use crate::workflow::error_chain;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
}

/// Build the Axum router.
pub fn routes(assistant: Arc<Assistant>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/capabilities", get(list_capabilities))
        .route("/api/turn", post(turn))
        .route("/api/stream/{key}", get(open_stream))
        .route("/api/sessions/{id}", delete(abandon_session))
        .layer(cors)
        .with_state(AppState { assistant })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "hive-mind"
    }))
}

// ── Capabilities ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CapabilityQuery {
    tags: Option<String>,
}

#[derive(Serialize)]
struct CapabilitySummary {
    name: String,
    description: String,
    tags: Vec<String>,
    parameters: serde_json::Value,
}

impl CapabilitySummary {
    fn of(capability: &dyn Capability) -> Self {
        Self {
            name: capability.name().to_string(),
            description: capability.description().to_string(),
            tags: capability.tags().iter().map(|t| t.to_string()).collect(),
            parameters: capability.parameters().to_json_schema(),
        }
    }
}

async fn list_capabilities(
    State(state): State<AppState>,
    Query(query): Query<CapabilityQuery>,
) -> impl IntoResponse {
    let tags = query.tags.as_deref().map(parse_tags).unwrap_or_default();
    let capabilities = state.assistant.registry().find_by_tags(&tags).await;
    Json(
        capabilities
            .iter()
            .map(|c| CapabilitySummary::of(c.as_ref()))
            .collect::<Vec<_>>(),
    )
}

// ── Turns ───────────────────────────────────────────────────────────────

async fn turn(State(state): State<AppState>, Json(request): Json<TurnRequest>) -> Response {
    match state.assistant.handle_turn(request).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => turn_error(e).into_response(),
    }
}

fn turn_error(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    match e {
        Error::Workflow(WorkflowError::Session(e)) => {
            warn!(error = %e, "Turn referenced an unusable session");
            let status = if matches!(e, SessionError::NotFound { .. }) {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::CONFLICT
            };
            (status, Json(serde_json::json!({"error": e.to_string()})))
        }
        Error::Dispatch(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
        other => {
            error!(error = %error_chain(&other), "Turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Something went wrong. Please try again."})),
            )
        }
    }
}

// ── Streams ─────────────────────────────────────────────────────────────

async fn open_stream(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.assistant.open_stream(&key) {
        Some(stream) => {
            info!(key = %key, "Stream claimed");
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                Body::from_stream(stream),
            )
                .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No stream under this key"})),
        )
            .into_response(),
    }
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn abandon_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if state.assistant.abandon(&id).await {
        (
            StatusCode::OK,
            Json(serde_json::json!({"status": "abandoned"})),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Session not found"})),
        )
    }
}
