//! Request-path security middleware.
//!
//! Two layers wrap every route: the session layer (validation, sliding
//! renewal, response echo headers) and the security layer (brute-force
//! lockout, device trust, step-up gating, hardening headers). Excluded
//! paths pass through both unchanged.

pub mod security;
pub mod session;

use axum::http::{HeaderMap, HeaderValue};

pub(crate) fn apply_hardening_headers(headers: &mut HeaderMap) {
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::AUTHORIZATION};
    use axum::routing::get;
    use axum::{Extension, Router, middleware::from_fn_with_state};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::security::geo::NoopGeoLocator;
    use crate::security::identity::DenyAllVerifier;
    use crate::security::mail::LogMailer;
    use crate::security::{SecurityConfig, SecurityState};
    use crate::store::MemoryStore;

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

    fn router(state: Arc<SecurityState>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/v1/data", get(|| async { "data" }))
            .layer(from_fn_with_state(
                state.clone(),
                super::session::session_layer,
            ))
            .layer(from_fn_with_state(
                state.clone(),
                super::security::security_layer,
            ))
            .layer(Extension(state))
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("user-agent", CHROME_LINUX)
            .header("x-forwarded-for", "10.0.0.5")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn anonymous_request_passes_with_hardening_headers() {
        let app = router(state());
        let response = app.oneshot(request("/v1/data")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
        assert!(headers.contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn excluded_path_passes_unchanged() {
        let app = router(state());
        let response = app.oneshot(request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-frame-options"));
    }

    #[tokio::test]
    async fn blocked_address_is_rate_limited() {
        let state = state();
        for _ in 0..5 {
            state.brute_force().record_failure("10.0.0.5").await.unwrap();
        }

        let app = router(state);
        let response = app.oneshot(request("/v1/data")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        // Short-circuit responses still carry the hardening set.
        assert!(response.headers().contains_key("x-frame-options"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["wait_seconds"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn untrusted_device_without_methods_is_forbidden() {
        let state = state();
        let session = state
            .sessions()
            .create("alice", "10.0.0.5", CHROME_LINUX)
            .await
            .unwrap();

        let app = router(state);
        let mut req = request("/v1/data");
        req.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", session.id).parse().unwrap(),
        );
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn untrusted_device_with_methods_gets_step_up_challenge() {
        let state = state();
        let session = state
            .sessions()
            .create("alice", "10.0.0.5", CHROME_LINUX)
            .await
            .unwrap();
        state.step_up().setup_totp("alice").await.unwrap();

        let app = router(state);
        let mut req = request("/v1/data");
        req.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", session.id).parse().unwrap(),
        );
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["methods"][0], "totp");
        assert!(json["device_info"]["fingerprint"].is_string());
        assert!(json["device_info"]["trust_score"].is_number());
    }

    #[tokio::test]
    async fn trusted_device_passes_through() {
        let state = state();
        let session = state
            .sessions()
            .create("alice", "10.0.0.5", CHROME_LINUX)
            .await
            .unwrap();

        // First pass registers the device; then it completes a challenge.
        let app = router(state.clone());
        let mut req = request("/v1/data");
        req.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", session.id).parse().unwrap(),
        );
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let fingerprint = crate::security::signals::RequestSignals::from_headers(
            request("/v1/data").headers(),
        )
        .fingerprint();
        state
            .devices()
            .mark_trusted("alice", &fingerprint)
            .await
            .unwrap();

        let mut req = request("/v1/data");
        req.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", session.id).parse().unwrap(),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn session_header_is_validated_and_echoed() {
        let state = state();
        let session = state
            .sessions()
            .create("alice", "10.0.0.5", CHROME_LINUX)
            .await
            .unwrap();

        let app = router(state);
        let mut req = request("/v1/data");
        req.headers_mut()
            .insert("x-session-id", session.id.parse().unwrap());
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-session-id").unwrap(),
            session.id.as_str()
        );
        assert!(response.headers().contains_key("x-session-expires"));
    }

    #[tokio::test]
    async fn unknown_session_header_is_unauthorized() {
        let app = router(state());
        let mut req = request("/v1/data");
        req.headers_mut()
            .insert("x-session-id", "no-such-session".parse().unwrap());
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        // The rejection still carries the hardening set.
        assert!(response.headers().contains_key("x-frame-options"));
    }
}
