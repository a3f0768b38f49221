//! Identity resolution and primary credential verification seams.
//!
//! Both are external collaborators: credential validation and token format
//! live outside the core. The default resolver treats the bearer credential
//! as a session id, which keeps the gateway self-contained for deployments
//! that use the core's own sessions.

use async_trait::async_trait;
use serde::Serialize;

use super::session::SessionManager;

/// Resolved caller identity.
#[derive(Clone, Debug, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub tenant_id: Option<String>,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a bearer credential; `None` means anonymous.
    async fn resolve(&self, bearer: &str) -> Option<Identity>;
}

/// Resolver backed by the core's own session records: the bearer credential
/// is a session id. Resolution does not renew the session; renewal belongs
/// to the session middleware.
#[derive(Clone)]
pub struct SessionIdentityResolver {
    sessions: SessionManager,
}

impl SessionIdentityResolver {
    #[must_use]
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl IdentityResolver for SessionIdentityResolver {
    async fn resolve(&self, bearer: &str) -> Option<Identity> {
        let session = self.sessions.get(bearer).await.ok().flatten()?;
        if !session.is_live(chrono::Utc::now()) {
            return None;
        }
        Some(Identity {
            user_id: session.user_id,
            tenant_id: None,
        })
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a primary credential for a user. The secret's format is owned
    /// by the external identity provider.
    async fn verify(&self, user_id: &str, secret: &str) -> bool;
}

/// Verifier that rejects everything; deployments wire the real provider.
#[derive(Clone, Debug)]
pub struct DenyAllVerifier;

#[async_trait]
impl CredentialVerifier for DenyAllVerifier {
    async fn verify(&self, _user_id: &str, _secret: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn session_resolver_maps_bearer_to_user() {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionManager::new(store, 1800);
        let session = sessions.create("alice", "10.0.0.5", "agent").await.unwrap();

        let resolver = SessionIdentityResolver::new(sessions);
        let identity = resolver.resolve(&session.id).await.unwrap();
        assert_eq!(identity.user_id, "alice");
        assert!(identity.tenant_id.is_none());

        assert!(resolver.resolve("unknown-bearer").await.is_none());
    }

    #[tokio::test]
    async fn deny_all_verifier_rejects() {
        assert!(!DenyAllVerifier.verify("alice", "secret").await);
    }
}
