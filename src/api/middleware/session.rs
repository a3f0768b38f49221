//! Session middleware: validation, sliding renewal, response echo headers.

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::security::SecurityState;

const SESSION_EXPIRES_HEADER: &str = "x-session-expires";

/// Validate and renew the session named by the session header, if present.
///
/// Requests without the header pass through untouched (they may still be
/// authenticated by bearer credential in the security layer). Store failures
/// fail closed: an unverifiable session is treated as unauthenticated.
pub async fn session_layer(
    State(state): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.config().is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let header_name = state.config().session_header().to_string();
    let Some(session_id) = request
        .headers()
        .get(&header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
    else {
        return next.run(request).await;
    };

    match state.sessions().validate(&session_id).await {
        Ok(true) => {}
        Ok(false) => return unauthorized("Invalid or expired session"),
        Err(err) => {
            // Granting access on a store outage is worse than denying it.
            error!("session validation failed, failing closed: {err:#}");
            return unauthorized("Session could not be verified");
        }
    }

    let expires_at = match state.sessions().get(&session_id).await {
        Ok(Some(session)) => session.expires_at,
        Ok(None) => return unauthorized("Session not found"),
        Err(err) => {
            error!("session lookup failed, failing closed: {err:#}");
            return unauthorized("Session could not be verified");
        }
    };

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(header_name.as_bytes()),
        HeaderValue::from_str(&session_id),
    ) {
        headers.insert(name, value);
    }
    if let Ok(value) = HeaderValue::from_str(&expires_at.timestamp().to_string()) {
        headers.insert(HeaderName::from_static(SESSION_EXPIRES_HEADER), value);
    }

    response
}

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": detail })),
    )
        .into_response()
}
