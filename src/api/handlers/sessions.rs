//! Self-service session management for the authenticated user.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::authenticate;
use crate::security::SecurityState;

#[utoipa::path(
    get,
    path = "/v1/me/sessions",
    responses(
        (status = 200, description = "Active sessions for the caller", body = [crate::security::session::Session]),
        (status = 401, description = "Not authenticated")
    ),
    tag = "sessions"
)]
pub async fn list_sessions(headers: HeaderMap, state: Extension<Arc<SecurityState>>) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state.sessions().list_for_user(&identity.user_id).await {
        Ok(sessions) => (StatusCode::OK, Json(sessions)).into_response(),
        Err(err) => {
            error!("failed to list sessions: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/me/sessions",
    responses(
        (status = 204, description = "All sessions revoked"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "sessions"
)]
pub async fn revoke_all_sessions(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state.sessions().end_all_for_user(&identity.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("failed to revoke sessions: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/me/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session to revoke")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such session for this user")
    ),
    tag = "sessions"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    // Sessions of other users look like missing ones to prevent enumeration.
    match state.sessions().get(&session_id).await {
        Ok(Some(session)) if session.user_id == identity.user_id => {}
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("failed to look up session: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.sessions().end(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("failed to revoke session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Not authenticated" })),
    )
        .into_response()
}
