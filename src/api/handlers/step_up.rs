//! Step-up setup and verification endpoints.
//!
//! The gateway's `428` challenge points callers here. A successful
//! verification of any kind marks the calling device trusted, so the next
//! request from the same fingerprint passes straight through. A failed
//! verification counts against the user's brute-force budget.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

use super::authenticate;
use crate::security::SecurityState;
use crate::security::identity::Identity;
use crate::security::signals::RequestSignals;
use crate::security::step_up::{MethodKind, SecurityQuestion, StepUpError, TotpSetup};

#[derive(ToSchema, Serialize, Debug)]
pub struct MethodsResponse {
    pub methods: Vec<MethodKind>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RecoveryCodesResponse {
    pub codes: Vec<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct QuestionsSetupRequest {
    pub questions: Vec<SecurityQuestion>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct QuestionsVerifyRequest {
    pub answers: Vec<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct EmailSendRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct VerifyResponse {
    pub verified: bool,
}

#[utoipa::path(
    get,
    path = "/v1/auth/step-up/methods",
    responses(
        (status = 200, description = "Enabled step-up methods", body = MethodsResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn methods(headers: HeaderMap, state: Extension<Arc<SecurityState>>) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state.step_up().available_methods(&identity.user_id).await {
        Ok(methods) => (StatusCode::OK, Json(MethodsResponse { methods })).into_response(),
        Err(err) => step_up_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/totp/setup",
    responses(
        (status = 200, description = "Generator enrolled", body = TotpSetup),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn totp_setup(headers: HeaderMap, state: Extension<Arc<SecurityState>>) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state.step_up().setup_totp(&identity.user_id).await {
        Ok(setup) => (StatusCode::OK, Json(setup)).into_response(),
        Err(err) => step_up_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/totp/verify",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Verification outcome", body = VerifyResponse),
        (status = 400, description = "Method not configured"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn totp_verify(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Json(request): Json<CodeRequest>,
) -> Response {
    let Some((identity, bearer)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    let result = state
        .step_up()
        .verify_totp(&identity.user_id, &request.code)
        .await;
    finish_verification(&state, &identity, &bearer, &headers, MethodKind::Totp, result).await
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/recovery/setup",
    responses(
        (status = 200, description = "Fresh recovery codes", body = RecoveryCodesResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn recovery_setup(headers: HeaderMap, state: Extension<Arc<SecurityState>>) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state.step_up().setup_recovery_codes(&identity.user_id).await {
        Ok(codes) => (StatusCode::OK, Json(RecoveryCodesResponse { codes })).into_response(),
        Err(err) => step_up_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/recovery/verify",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Verification outcome", body = VerifyResponse),
        (status = 400, description = "Method not configured"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn recovery_verify(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Json(request): Json<CodeRequest>,
) -> Response {
    let Some((identity, bearer)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    let result = state
        .step_up()
        .verify_recovery_code(&identity.user_id, &request.code)
        .await;
    finish_verification(
        &state,
        &identity,
        &bearer,
        &headers,
        MethodKind::Recovery,
        result,
    )
    .await
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/questions/setup",
    request_body = QuestionsSetupRequest,
    responses(
        (status = 204, description = "Questions stored"),
        (status = 400, description = "Invalid question set"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn questions_setup(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Json(request): Json<QuestionsSetupRequest>,
) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state
        .step_up()
        .setup_security_questions(&identity.user_id, request.questions)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => step_up_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/questions/verify",
    request_body = QuestionsVerifyRequest,
    responses(
        (status = 200, description = "Verification outcome", body = VerifyResponse),
        (status = 400, description = "Method not configured"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn questions_verify(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Json(request): Json<QuestionsVerifyRequest>,
) -> Response {
    let Some((identity, bearer)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    let result = state
        .step_up()
        .verify_security_questions(&identity.user_id, &request.answers)
        .await;
    finish_verification(
        &state,
        &identity,
        &bearer,
        &headers,
        MethodKind::Questions,
        result,
    )
    .await
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/email/send",
    request_body = EmailSendRequest,
    responses(
        (status = 202, description = "Challenge code dispatched"),
        (status = 400, description = "Invalid email address"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn email_send(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Json(request): Json<EmailSendRequest>,
) -> Response {
    let Some((identity, _)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state
        .step_up()
        .send_email_challenge(&identity.user_id, &request.email)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => step_up_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/step-up/email/verify",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Verification outcome", body = VerifyResponse),
        (status = 400, description = "Method not configured"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "step-up"
)]
pub async fn email_verify(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Json(request): Json<CodeRequest>,
) -> Response {
    let Some((identity, bearer)) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    let result = state
        .step_up()
        .verify_email_code(&identity.user_id, &request.code)
        .await;
    finish_verification(&state, &identity, &bearer, &headers, MethodKind::Email, result).await
}

/// Shared completion path for every verify endpoint: trust grant and
/// security event on success, brute-force debit and event on failure.
async fn finish_verification(
    state: &SecurityState,
    identity: &Identity,
    session_id: &str,
    headers: &HeaderMap,
    method: MethodKind,
    result: Result<bool, StepUpError>,
) -> Response {
    let verified = match result {
        Ok(verified) => verified,
        Err(err) => return step_up_error(&err),
    };

    let signals = RequestSignals::from_headers(headers);

    if verified {
        let fingerprint = signals.fingerprint();
        if let Err(err) = state
            .devices()
            .mark_trusted(&identity.user_id, &fingerprint)
            .await
        {
            warn!("failed to mark device trusted: {err:#}");
        }
    } else if let Err(err) = state.brute_force().record_failure(&identity.user_id).await {
        warn!("failed to record verification failure: {err:#}");
    }

    let event_type = if verified {
        "step_up_verified"
    } else {
        "step_up_failed"
    };
    if let Err(err) = state
        .analytics()
        .record_security_event(
            event_type,
            session_id,
            &identity.user_id,
            &signals,
            json!({ "method": method.as_str() }),
        )
        .await
    {
        warn!("failed to record step-up event: {err:#}");
    }

    (StatusCode::OK, Json(VerifyResponse { verified })).into_response()
}

fn step_up_error(err: &StepUpError) -> Response {
    match err {
        StepUpError::NotConfigured(_) | StepUpError::Invalid(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": err.to_string() })),
        )
            .into_response(),
        _ => {
            error!("step-up operation failed: {err}");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::geo::NoopGeoLocator;
    use crate::security::identity::DenyAllVerifier;
    use crate::security::mail::LogMailer;
    use crate::security::SecurityConfig;
    use crate::store::MemoryStore;
    use axum::http::{HeaderValue, header::AUTHORIZATION};

    const CHROME_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/120.0.0.0 Safari/537.36";

    fn state() -> Arc<SecurityState> {
        Arc::new(SecurityState::new(
            Arc::new(MemoryStore::new()),
            SecurityConfig::new(),
            Arc::new(NoopGeoLocator),
            Arc::new(LogMailer),
            Arc::new(DenyAllVerifier),
        ))
    }

    fn auth_headers(session_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {session_id}").parse().unwrap(),
        );
        headers.insert("user-agent", HeaderValue::from_static(CHROME_LINUX));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.5"));
        headers
    }

    async fn session_for(state: &SecurityState, user_id: &str) -> String {
        state
            .sessions()
            .create(user_id, "10.0.0.5", CHROME_LINUX)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn endpoints_require_authentication() {
        let response = methods(HeaderMap::new(), Extension(state())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verify_without_setup_is_bad_request() {
        let state = state();
        let session_id = session_for(&state, "alice").await;

        let response = totp_verify(
            auth_headers(&session_id),
            Extension(state),
            Json(CodeRequest {
                code: "123456".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn successful_recovery_verification_trusts_device() {
        let state = state();
        let session_id = session_for(&state, "alice").await;
        let headers = auth_headers(&session_id);

        // Register the device first, as the gateway would on first contact.
        let signals = RequestSignals::from_headers(&headers);
        state.devices().process("alice", &signals).await.unwrap();

        let response = recovery_setup(headers.clone(), Extension(state.clone())).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let code = json["codes"][0].as_str().unwrap().to_string();

        let response = recovery_verify(
            headers.clone(),
            Extension(state.clone()),
            Json(CodeRequest { code }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let device = state
            .devices()
            .get("alice", &signals.fingerprint())
            .await
            .unwrap()
            .unwrap();
        assert!(device.is_trusted);

        let events = state
            .analytics()
            .recent_security_events("alice", 10)
            .await
            .unwrap();
        assert_eq!(events[0].event_type, "step_up_verified");
    }

    #[tokio::test]
    async fn failed_verification_counts_against_brute_force() {
        let state = state();
        let session_id = session_for(&state, "alice").await;
        let headers = auth_headers(&session_id);

        recovery_setup(headers.clone(), Extension(state.clone())).await;

        let response = recovery_verify(
            headers,
            Extension(state.clone()),
            Json(CodeRequest {
                code: "ZZZZ-ZZZZ-ZZZZ".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["verified"], false);

        let status = state
            .brute_force()
            .status(Some("alice"), "10.0.0.5")
            .await
            .unwrap();
        assert_eq!(status.attempts, 1);

        let events = state
            .analytics()
            .recent_security_events("alice", 10)
            .await
            .unwrap();
        assert_eq!(events[0].event_type, "step_up_failed");
    }

    #[tokio::test]
    async fn methods_lists_configured_kinds() {
        let state = state();
        let session_id = session_for(&state, "alice").await;
        let headers = auth_headers(&session_id);

        recovery_setup(headers.clone(), Extension(state.clone())).await;

        let response = methods(headers, Extension(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["methods"], serde_json::json!(["recovery"]));
    }
}
