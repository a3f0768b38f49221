use super::handlers::{admin, auth, health, sessions, step_up};
use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec. Handlers sharing a path must
/// share one `routes!` call.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, logout, and lockout handling".to_string());

    let mut step_up_tag = Tag::new("step-up");
    step_up_tag.description =
        Some("Supplementary verification for untrusted devices".to_string());

    let mut sessions_tag = Tag::new("sessions");
    sessions_tag.description = Some("Self-service session management".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Read-only session and security analytics".to_string());

    let mut base = cargo_openapi();
    base.tags = Some(vec![auth_tag, step_up_tag, sessions_tag, admin_tag]);

    OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(auth::login))
        .routes(routes!(auth::logout))
        .routes(routes!(
            sessions::list_sessions,
            sessions::revoke_all_sessions
        ))
        .routes(routes!(sessions::revoke_session))
        .routes(routes!(step_up::methods))
        .routes(routes!(step_up::totp_setup))
        .routes(routes!(step_up::totp_verify))
        .routes(routes!(step_up::recovery_setup))
        .routes(routes!(step_up::recovery_verify))
        .routes(routes!(step_up::questions_setup))
        .routes(routes!(step_up::questions_verify))
        .routes(routes!(step_up::email_send))
        .routes(routes!(step_up::email_verify))
        .routes(routes!(admin::user_stats))
        .routes(routes!(admin::security_events))
        .routes(routes!(admin::anomalies))
        .routes(routes!(admin::active_sessions))
        .routes(routes!(admin::login_summary))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    OpenApiBuilder::new().info(info).build()
}
