//! # Sentra (Adaptive Session & Device-Trust Security Core)
//!
//! `sentra` is the security core of a multi-tenant SaaS backend. It owns the
//! request-path decision engine that the surrounding product delegates to:
//!
//! - **Session lifecycle** with sliding expiration and per-user enumeration
//!   and revocation.
//! - **Device trust**: every request is fingerprinted and scored in `[0, 1]`
//!   from location, history, and behavioral-pattern signals; devices below
//!   the trust threshold must complete a step-up challenge.
//! - **Brute-force protection**: failed-attempt counters per user and per
//!   network address, with lockout derived from counter TTLs.
//! - **Step-up authentication**: one-time codes, recovery codes, security
//!   questions, and email challenges.
//! - **Security analytics**: an append-only login/security event log with
//!   rolling aggregates and anomaly detection against a user's history.
//!
//! All durable state lives in a shared key-value store (Redis in
//! production); nothing is held in process memory, and counters are only
//! ever mutated through the store's atomic increment primitives.
//!
//! Primary credential verification, geolocation, and mail dispatch are
//! external collaborators, injected as trait objects so the core runs and
//! tests without network access.

pub mod api;
pub mod cli;
pub mod security;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
