//! Session lifecycle with sliding expiration.
//!
//! One record per login, keyed `session:{id}` with a TTL matching the
//! session timeout; a `user_sessions:{user_id}` set enables enumeration and
//! revocation. `validate` is the only natural-expiry transition point: a
//! dead session is deleted lazily, a live one is renewed (expiry pushed
//! forward). The out-of-band sweep and concurrent validations may race on
//! deletion; "already gone" is treated as success everywhere.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::KeyValueStore;

const SESSION_PREFIX: &str = "session:";

fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

fn user_sessions_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

/// A login session. Logically live iff `active` and not yet expired.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client_address: String,
    pub user_agent: String,
    pub active: bool,
}

impl Session {
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.expires_at
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    timeout_seconds: u64,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, timeout_seconds: u64) -> Self {
        Self {
            store,
            timeout_seconds,
        }
    }

    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Create a session for a completed login and register it in the user's
    /// membership set.
    pub async fn create(
        &self,
        user_id: &str,
        client_address: &str,
        user_agent: &str,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(self.timeout_seconds as i64),
            client_address: client_address.to_string(),
            user_agent: user_agent.to_string(),
            active: true,
        };

        self.write(&session).await?;
        self.store
            .sadd(&user_sessions_key(user_id), &session.id)
            .await
            .context("failed to register session membership")?;

        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let raw = self
            .store
            .get(&session_key(session_id))
            .await
            .context("failed to read session record")?;
        raw.map(|data| serde_json::from_str(&data).context("corrupt session record"))
            .transpose()
    }

    /// Validate a session, renewing its expiry on success (sliding
    /// expiration). An inactive or expired session is removed lazily and the
    /// call returns `false`.
    pub async fn validate(&self, session_id: &str) -> Result<bool> {
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        if !session.is_live(now) {
            self.end(session_id).await?;
            return Ok(false);
        }

        session.expires_at = now + Duration::seconds(self.timeout_seconds as i64);
        self.write(&session).await?;

        Ok(true)
    }

    /// Terminate a session regardless of expiry. Idempotent: ending a
    /// session already removed by a concurrent validation or sweep succeeds.
    pub async fn end(&self, session_id: &str) -> Result<()> {
        if let Some(session) = self.get(session_id).await? {
            self.store
                .srem(&user_sessions_key(&session.user_id), session_id)
                .await
                .context("failed to remove session membership")?;
        }
        self.store
            .delete(&session_key(session_id))
            .await
            .context("failed to delete session record")?;
        Ok(())
    }

    /// All live sessions for a user. Membership entries whose record has
    /// already expired are pruned along the way.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let membership_key = user_sessions_key(user_id);
        let session_ids = self
            .store
            .smembers(&membership_key)
            .await
            .context("failed to list session membership")?;

        let mut sessions = Vec::new();
        for session_id in session_ids {
            match self.get(&session_id).await? {
                Some(session) if session.active => sessions.push(session),
                Some(_) => {}
                None => {
                    // Record expired out from under the set; prune the entry.
                    self.store.srem(&membership_key, &session_id).await?;
                }
            }
        }
        Ok(sessions)
    }

    /// Terminate every session for a user and drop the membership set.
    pub async fn end_all_for_user(&self, user_id: &str) -> Result<()> {
        let membership_key = user_sessions_key(user_id);
        let session_ids = self
            .store
            .smembers(&membership_key)
            .await
            .context("failed to list session membership")?;

        for session_id in session_ids {
            self.end(&session_id).await?;
        }
        self.store
            .delete(&membership_key)
            .await
            .context("failed to delete session membership")?;
        Ok(())
    }

    /// Out-of-band scan that terminates sessions whose expiry has passed.
    /// Returns the number of sessions removed. Safe to run concurrently with
    /// live validations.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let keys = self
            .store
            .scan_match(&format!("{SESSION_PREFIX}*"))
            .await
            .context("failed to scan session keys")?;

        let now = Utc::now();
        let mut swept = 0;
        for key in keys {
            let Some(session_id) = key.strip_prefix(SESSION_PREFIX) else {
                continue;
            };
            // A record removed by a concurrent validate is simply skipped.
            let Some(session) = self.get(session_id).await? else {
                continue;
            };
            if now > session.expires_at {
                self.end(session_id).await?;
                swept += 1;
            }
        }

        if swept > 0 {
            debug!(swept, "expired sessions removed by sweep");
        }
        Ok(swept)
    }

    async fn write(&self, session: &Session) -> Result<()> {
        let data = serde_json::to_string(session).context("failed to encode session record")?;
        self.store
            .set_ex(&session_key(&session.id), &data, self.timeout_seconds)
            .await
            .context("failed to write session record")?;
        Ok(())
    }
}
