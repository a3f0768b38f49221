//! HTTP surface: router assembly and server startup.

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub(crate) mod handlers;
pub mod middleware;
mod openapi;

pub use openapi::openapi;

use crate::security::geo::DevGeoLocator;
use crate::security::identity::DenyAllVerifier;
use crate::security::mail::LogMailer;
use crate::security::{SecurityConfig, SecurityState};
use crate::store::{RedisStore, StoreConfig};

/// Assemble the full router around a composed security state.
#[must_use]
pub fn build_router(state: Arc<SecurityState>) -> Router {
    let (router, _openapi) = openapi::api_router().split_for_parts();

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &Request<Body>| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            // Security wraps session so short-circuit 401s still pick up the
            // hardening headers on the way out.
            .layer(from_fn_with_state(
                state.clone(),
                middleware::security::security_layer,
            ))
            .layer(from_fn_with_state(
                state.clone(),
                middleware::session::session_layer,
            ))
            .layer(Extension(state)),
    )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, store_config: StoreConfig, config: SecurityConfig) -> Result<()> {
    let store = Arc::new(
        RedisStore::connect(&store_config)
            .await
            .context("Failed to connect to the state store")?,
    );

    let state = Arc::new(SecurityState::new(
        store,
        config,
        Arc::new(DevGeoLocator),
        Arc::new(LogMailer),
        Arc::new(DenyAllVerifier),
    ));

    let app = build_router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
