use crate::auth::verify_internal_token;
use crate::dispatcher::DomainTrigger;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use staffpulse_core::{PrincipalId, CLOSE_SERVER_DISCONNECT};
use staffpulse_telemetry::RealtimeSnapshot;
use tracing::{info, warn};

/// Header collaborator services authenticate with
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

// ============================================================================
// Health and inspection
// ============================================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub online: usize,
    pub users: usize,
    pub rooms: usize,
    pub metrics: RealtimeSnapshot,
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        online: state.registry.online_count(),
        users: state.registry.principal_count(),
        rooms: state.registry.room_count(),
        metrics: state.metrics.snapshot(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Internal endpoints
// ============================================================================

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.config.internal_token.as_deref() else {
        return false;
    };
    let provided = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    verify_internal_token(expected, provided)
}

/// Raise a domain trigger on behalf of a collaborator service
pub async fn internal_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(trigger): Json<DomainTrigger>,
) -> Response {
    if !authorized(&state, &headers) {
        warn!("Rejected internal event: bad or missing internal token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let report = state.dispatcher.raise(trigger);
    Json(report).into_response()
}

/// Force every connection of a user to close
pub async fn evict_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Response {
    if !authorized(&state, &headers) {
        warn!("Rejected eviction: bad or missing internal token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let principal = PrincipalId::new(user_id);
    let closed = state
        .registry
        .evict(&principal, CLOSE_SERVER_DISCONNECT, "disconnected by server");
    info!(user_id = %principal, closed, "Evicted user connections");

    Json(serde_json::json!({ "closed": closed })).into_response()
}
