//! Read-only admin surface over the security analytics.
//!
//! Operator gating is owned by the surrounding product; these endpoints are
//! expected to be mounted behind its admin authorization.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::security::SecurityState;
use crate::security::analytics::Timeframe;
use crate::security::signals::RequestSignals;

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 100;

#[derive(Deserialize, Debug)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct SummaryQuery {
    pub timeframe: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/admin/sessions/stats/{user_id}",
    params(("user_id" = String, Path, description = "User to report on")),
    responses(
        (status = 200, description = "Per-user session statistics", body = crate::security::analytics::SessionStats)
    ),
    tag = "admin"
)]
pub async fn user_stats(
    state: Extension<Arc<SecurityState>>,
    Path(user_id): Path<String>,
) -> Response {
    match state.analytics().stats(&user_id).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(err) => {
            error!("failed to compute user stats: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/sessions/security/{user_id}",
    params(
        ("user_id" = String, Path, description = "User to report on"),
        ("limit" = Option<usize>, Query, description = "Maximum events, capped at 100")
    ),
    responses(
        (status = 200, description = "Recent security events", body = [crate::security::analytics::SecurityEvent])
    ),
    tag = "admin"
)]
pub async fn security_events(
    state: Extension<Arc<SecurityState>>,
    Path(user_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);

    match state
        .analytics()
        .recent_security_events(&user_id, limit)
        .await
    {
        Ok(events) => (StatusCode::OK, Json(events)).into_response(),
        Err(err) => {
            error!("failed to read security events: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/sessions/anomalies/{user_id}",
    params(("user_id" = String, Path, description = "User to check")),
    responses(
        (status = 200, description = "Anomalies for the current request signals")
    ),
    tag = "admin"
)]
pub async fn anomalies(
    headers: HeaderMap,
    state: Extension<Arc<SecurityState>>,
    Path(user_id): Path<String>,
) -> Response {
    let signals = RequestSignals::from_headers(&headers);
    match state.analytics().detect_anomalies(&user_id, &signals).await {
        Ok(anomalies) => (
            StatusCode::OK,
            Json(json!({
                "user_id": user_id,
                "anomalies": anomalies,
                "timestamp": Utc::now(),
            })),
        )
            .into_response(),
        Err(err) => {
            error!("failed to detect anomalies: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/sessions/active",
    responses(
        (status = 200, description = "Active session census", body = crate::security::analytics::ActiveSessionCensus)
    ),
    tag = "admin"
)]
pub async fn active_sessions(state: Extension<Arc<SecurityState>>) -> Response {
    match state.analytics().active_session_census().await {
        Ok(census) => (StatusCode::OK, Json(census)).into_response(),
        Err(err) => {
            error!("failed to run session census: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/sessions/summary",
    params(("timeframe" = Option<String>, Query, description = "One of 1h, 24h, 7d, 30d")),
    responses(
        (status = 200, description = "Windowed login summary", body = crate::security::analytics::LoginSummary),
        (status = 400, description = "Unsupported timeframe")
    ),
    tag = "admin"
)]
pub async fn login_summary(
    state: Extension<Arc<SecurityState>>,
    Query(query): Query<SummaryQuery>,
) -> Response {
    let raw = query.timeframe.as_deref().unwrap_or("24h");
    let Some(timeframe) = Timeframe::from_str(raw) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "timeframe must be one of 1h, 24h, 7d, 30d" })),
        )
            .into_response();
    };

    match state.analytics().login_summary(timeframe).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => {
            error!("failed to build login summary: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::geo::NoopGeoLocator;
    use crate::security::identity::DenyAllVerifier;
    use crate::security::mail::LogMailer;
    use crate::security::SecurityConfig;
    use crate::store::MemoryStore;

    fn state() -> Arc<SecurityState> {
        Arc::new(SecurityState::new(
            Arc::new(MemoryStore::new()),
            SecurityConfig::new(),
            Arc::new(NoopGeoLocator),
            Arc::new(LogMailer),
            Arc::new(DenyAllVerifier),
        ))
    }

    #[tokio::test]
    async fn summary_rejects_unknown_timeframe() {
        let response = login_summary(
            Extension(state()),
            Query(SummaryQuery {
                timeframe: Some("90d".to_string()),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn summary_defaults_to_one_day() {
        let response =
            login_summary(Extension(state()), Query(SummaryQuery { timeframe: None })).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["timeframe"], "24h");
    }

    #[tokio::test]
    async fn census_reflects_created_sessions() {
        let state = state();
        state
            .sessions()
            .create("alice", "10.0.0.5", "agent")
            .await
            .unwrap();

        let response = active_sessions(Extension(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["total_active_sessions"], 1);
        assert_eq!(json["session_distribution"]["alice"], 1);
    }
}
