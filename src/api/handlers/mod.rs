//! Route handlers and shared request helpers.

pub mod admin;
pub mod auth;
pub mod health;
pub mod sessions;
pub mod step_up;

use axum::http::{HeaderMap, header::AUTHORIZATION};

use crate::security::SecurityState;
use crate::security::identity::{Identity, IdentityResolver};

/// Extract a bearer credential from the `Authorization` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the caller's identity; also returns the bearer credential so
/// handlers can tag security events with it.
pub(crate) async fn authenticate(
    state: &SecurityState,
    headers: &HeaderMap,
) -> Option<(Identity, String)> {
    let bearer = bearer_token(headers)?;
    let identity = state.identity().resolve(&bearer).await?;
    Some((identity, bearer))
}

#[cfg(test)]
mod tests {
    use super::bearer_token;
    use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};

    #[test]
    fn bearer_token_parses_and_trims() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123 "));
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz".to_string()));
    }

    #[test]
    fn bearer_token_rejects_missing_or_empty() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
