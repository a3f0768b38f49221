//! Login and logout endpoints.
//!
//! Primary credential verification is delegated to the injected
//! [`crate::security::identity::CredentialVerifier`]; this handler owns the
//! security bookkeeping around it: lockout checks, failure counters, session
//! creation, device processing, and login analytics.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::bearer_token;
use crate::security::SecurityState;
use crate::security::geo::Location;
use crate::security::identity::CredentialVerifier;
use crate::security::signals::RequestSignals;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub user_id: String,
    pub secret: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct DeviceSummary {
    pub fingerprint: String,
    pub trust_score: f64,
    pub is_trusted: bool,
    pub location: Option<Location>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub device: Option<DeviceSummary>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many failed attempts")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let signals = RequestSignals::from_headers(&headers);
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "user_id is required" })),
        )
            .into_response();
    }

    // The gateway already checked the address-scoped counter; the
    // user-scoped one needs the claimed identity from the body.
    match state
        .brute_force()
        .status(Some(user_id), &signals.client_address)
        .await
    {
        Ok(status) if status.blocked => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "detail": format!(
                        "Too many attempts. Try again in {} seconds.",
                        status.wait_seconds
                    ),
                    "wait_seconds": status.wait_seconds,
                })),
            )
                .into_response();
        }
        Ok(_) => {}
        Err(err) => warn!("brute-force check unavailable, failing open: {err:#}"),
    }

    if !state.credentials().verify(user_id, &request.secret).await {
        record_failed_login(&state, user_id, &signals).await;
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Invalid credentials" })),
        )
            .into_response();
    }

    for identifier in [user_id, signals.client_address.as_str()] {
        if let Err(err) = state.brute_force().record_success(identifier).await {
            warn!("failed to clear brute-force counter: {err:#}");
        }
    }

    let session = match state
        .sessions()
        .create(user_id, &signals.client_address, &signals.user_agent)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            error!("failed to create session: {err:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Failed to create session" })),
            )
                .into_response();
        }
    };

    // Anomalies are evaluated against the history before this login lands.
    match state.analytics().detect_anomalies(user_id, &signals).await {
        Ok(anomalies) if !anomalies.is_empty() => {
            info!(user_id, ?anomalies, "anomalous login detected");
            if let Err(err) = state
                .analytics()
                .record_security_event(
                    "anomalous_login",
                    &session.id,
                    user_id,
                    &signals,
                    json!({ "anomalies": anomalies }),
                )
                .await
            {
                warn!("failed to record anomaly event: {err:#}");
            }
        }
        Ok(_) => {}
        Err(err) => warn!("anomaly detection unavailable: {err:#}"),
    }

    let device = match state.devices().process(user_id, &signals).await {
        Ok(record) => Some(DeviceSummary {
            fingerprint: record.fingerprint,
            trust_score: record.trust_score,
            is_trusted: record.is_trusted,
            location: record.location,
        }),
        Err(err) => {
            warn!("device processing unavailable: {err:#}");
            None
        }
    };

    if let Err(err) = state
        .analytics()
        .record_login(&session.id, user_id, &signals, true)
        .await
    {
        warn!("failed to record login event: {err:#}");
    }

    (
        StatusCode::OK,
        Json(LoginResponse {
            session_id: session.id,
            expires_at: session.expires_at,
            device,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session ended")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<SecurityState>>) -> Response {
    // Logout is idempotent; a missing or already-ended session is fine.
    if let Some(bearer) = bearer_token(&headers) {
        if let Err(err) = state.sessions().end(&bearer).await {
            error!("failed to end session: {err:#}");
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn record_failed_login(state: &SecurityState, user_id: &str, signals: &RequestSignals) {
    for identifier in [user_id, signals.client_address.as_str()] {
        if let Err(err) = state.brute_force().record_failure(identifier).await {
            warn!("failed to record brute-force failure: {err:#}");
        }
    }
    if let Err(err) = state
        .analytics()
        .record_login("", user_id, signals, false)
        .await
    {
        warn!("failed to record failed login event: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::geo::NoopGeoLocator;
    use crate::security::identity::CredentialVerifier;
    use crate::security::mail::LogMailer;
    use crate::security::SecurityConfig;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use axum::http::HeaderValue;

    struct StaticVerifier;

    #[async_trait]
    impl CredentialVerifier for StaticVerifier {
        async fn verify(&self, user_id: &str, secret: &str) -> bool {
            user_id == "alice" && secret == "correct-horse"
        }
    }

    fn state() -> Arc<SecurityState> {
        Arc::new(SecurityState::new(
            Arc::new(MemoryStore::new()),
            SecurityConfig::new(),
            Arc::new(NoopGeoLocator),
            Arc::new(LogMailer),
            Arc::new(StaticVerifier),
        ))
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("test-agent"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.5"));
        headers
    }

    #[tokio::test]
    async fn successful_login_creates_session_and_device() {
        let state = state();
        let response = login(
            headers(),
            Extension(state.clone()),
            Json(LoginRequest {
                user_id: "alice".to_string(),
                secret: "correct-horse".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let session_id = json["session_id"].as_str().unwrap();
        assert!(state.sessions().validate(session_id).await.unwrap());
        // A first-seen device is reported but never trusted.
        assert_eq!(json["device"]["is_trusted"], false);
        assert_eq!(json["device"]["trust_score"], 0.5);
    }

    #[tokio::test]
    async fn failed_logins_escalate_to_lockout() {
        let state = state();
        for _ in 0..5 {
            let response = login(
                headers(),
                Extension(state.clone()),
                Json(LoginRequest {
                    user_id: "alice".to_string(),
                    secret: "wrong".to_string(),
                }),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        // Sixth attempt is blocked before credentials are even checked.
        let response = login(
            headers(),
            Extension(state.clone()),
            Json(LoginRequest {
                user_id: "alice".to_string(),
                secret: "correct-horse".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["wait_seconds"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn success_clears_previous_failures() {
        let state = state();
        for _ in 0..3 {
            login(
                headers(),
                Extension(state.clone()),
                Json(LoginRequest {
                    user_id: "alice".to_string(),
                    secret: "wrong".to_string(),
                }),
            )
            .await;
        }

        let response = login(
            headers(),
            Extension(state.clone()),
            Json(LoginRequest {
                user_id: "alice".to_string(),
                secret: "correct-horse".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let status = state
            .brute_force()
            .status(Some("alice"), "10.0.0.5")
            .await
            .unwrap();
        assert_eq!(status.attempts, 0);
    }

    #[tokio::test]
    async fn logout_ends_the_bearer_session() {
        let state = state();
        let session = state
            .sessions()
            .create("alice", "10.0.0.5", "test-agent")
            .await
            .unwrap();

        let mut auth_headers = headers();
        auth_headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", session.id).parse().unwrap(),
        );
        let response = logout(auth_headers, Extension(state.clone())).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!state.sessions().validate(&session.id).await.unwrap());
    }
}
