use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;
use crate::security::SecurityState;
use crate::store::KeyValueStore;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Store is reachable", body = [Health]),
        (status = 503, description = "Store is unreachable", body = [Health])
    ),
    tag = "health"
)]
pub async fn health(state: Extension<Arc<SecurityState>>) -> impl IntoResponse {
    let store_ok = match state.store().ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("store ping failed: {err}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if store_ok { "ok" } else { "error" }.to_string(),
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) =
        format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>()
    {
        headers.insert("X-App", value);
    }

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::geo::NoopGeoLocator;
    use crate::security::identity::DenyAllVerifier;
    use crate::security::mail::LogMailer;
    use crate::security::SecurityConfig;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn health_reports_ok_with_memory_store() {
        let state = Arc::new(SecurityState::new(
            Arc::new(MemoryStore::new()),
            SecurityConfig::new(),
            Arc::new(NoopGeoLocator),
            Arc::new(LogMailer),
            Arc::new(DenyAllVerifier),
        ));

        let response = health(Extension(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["store"], "ok");
        assert_eq!(json["name"], env!("CARGO_PKG_NAME"));
    }
}
