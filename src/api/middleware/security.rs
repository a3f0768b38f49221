//! Security gateway: single-pass decision pipeline per request.
//!
//! Order is fixed: exclusion check, identity resolution, brute-force
//! lockout, device trust, step-up gating, then the downstream handler.
//! Best-effort checks (brute force, device trust, step-up availability)
//! fail open on store errors; hardening headers go on every non-excluded
//! response, short circuits included.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use super::apply_hardening_headers;
use crate::security::SecurityState;
use crate::security::identity::{Identity, IdentityResolver};
use crate::security::signals::RequestSignals;

pub async fn security_layer(
    State(state): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.config().is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let signals = RequestSignals::from_headers(request.headers());
    let identity = resolve_identity(&state, request.headers()).await;

    if let Some(response) = check_brute_force(&state, identity.as_ref(), &signals).await {
        return finish(response);
    }

    if let Some(identity) = &identity {
        if let Some(response) = check_device(&state, identity, &signals).await {
            return finish(response);
        }
    }

    finish(next.run(request).await)
}

fn finish(mut response: Response) -> Response {
    apply_hardening_headers(response.headers_mut());
    response
}

async fn resolve_identity(state: &SecurityState, headers: &HeaderMap) -> Option<Identity> {
    let bearer = crate::api::handlers::bearer_token(headers)?;
    state.identity().resolve(&bearer).await
}

/// Lockout short circuit; a failing store check lets the request continue.
async fn check_brute_force(
    state: &SecurityState,
    identity: Option<&Identity>,
    signals: &RequestSignals,
) -> Option<Response> {
    let user_id = identity.map(|identity| identity.user_id.as_str());
    match state
        .brute_force()
        .status(user_id, &signals.client_address)
        .await
    {
        Ok(status) if status.blocked => Some(
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "detail": format!(
                        "Too many attempts. Try again in {} seconds.",
                        status.wait_seconds
                    ),
                    "wait_seconds": status.wait_seconds,
                })),
            )
                .into_response(),
        ),
        Ok(_) => None,
        Err(err) => {
            warn!("brute-force check unavailable, failing open: {err:#}");
            None
        }
    }
}

/// Device trust and step-up gating for authenticated callers.
async fn check_device(
    state: &SecurityState,
    identity: &Identity,
    signals: &RequestSignals,
) -> Option<Response> {
    let device = match state.devices().process(&identity.user_id, signals).await {
        Ok(device) => device,
        Err(err) => {
            warn!("device trust check unavailable, failing open: {err:#}");
            return None;
        }
    };
    if device.is_trusted {
        return None;
    }

    let methods = match state.step_up().available_methods(&identity.user_id).await {
        Ok(methods) => methods,
        Err(err) => {
            warn!("step-up lookup unavailable, failing open: {err:#}");
            return None;
        }
    };

    if methods.is_empty() {
        return Some(
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "detail": "Device not trusted. Set up a step-up authentication method.",
                })),
            )
                .into_response(),
        );
    }

    Some(
        (
            StatusCode::PRECONDITION_REQUIRED,
            Json(json!({
                "detail": "Additional verification required.",
                "methods": methods,
                "device_info": {
                    "fingerprint": device.fingerprint,
                    "location": device.location,
                    "trust_score": device.trust_score,
                },
            })),
        )
            .into_response(),
    )
}
