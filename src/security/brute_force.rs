//! Brute-force protection via TTL'd failure counters.
//!
//! One counter per identifier (user id or network address). The counter's
//! existence plus its TTL encode the lockout; there is no separate locked
//! flag. Increments go through the store's atomic primitive so concurrent
//! failed logins never lose updates.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::store::KeyValueStore;

const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_ATTEMPT_WINDOW_SECONDS: u64 = 300;

fn counter_key(identifier: &str) -> String {
    format!("brute_force:{identifier}")
}

/// Lockout state for a caller, combining user- and address-scoped counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BruteForceStatus {
    pub blocked: bool,
    pub attempts: i64,
    pub wait_seconds: u64,
}

#[derive(Clone)]
pub struct BruteForceGuard {
    store: Arc<dyn KeyValueStore>,
    max_attempts: i64,
    window_seconds: u64,
}

impl BruteForceGuard {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_seconds: DEFAULT_ATTEMPT_WINDOW_SECONDS,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, max_attempts: i64, window_seconds: u64) -> Self {
        self.max_attempts = max_attempts;
        self.window_seconds = window_seconds;
        self
    }

    /// Record a failed attempt. The attempt window TTL is set by the
    /// increment that creates the counter; later failures ride the same
    /// window. Returns the new attempt count.
    pub async fn record_failure(&self, identifier: &str) -> Result<i64> {
        self.store
            .incr_ex(&counter_key(identifier), self.window_seconds)
            .await
            .context("failed to record brute-force failure")
    }

    /// Clear the counter after a successful attempt, lifting any lockout
    /// immediately.
    pub async fn record_success(&self, identifier: &str) -> Result<()> {
        self.store
            .delete(&counter_key(identifier))
            .await
            .context("failed to clear brute-force counter")
    }

    /// Evaluate lockout for a caller. Attempts report the maximum of the
    /// user- and address-scoped counters; the wait time prefers the
    /// user-scoped TTL and falls back to the address-scoped one.
    pub async fn status(
        &self,
        user_id: Option<&str>,
        client_address: &str,
    ) -> Result<BruteForceStatus> {
        let address_attempts = self.attempts(client_address).await?;
        let user_attempts = match user_id {
            Some(user_id) => self.attempts(user_id).await?,
            None => 0,
        };

        let attempts = address_attempts.max(user_attempts);
        let blocked = attempts >= self.max_attempts;

        let mut wait_seconds = 0;
        if blocked {
            if let Some(user_id) = user_id {
                wait_seconds = self.remaining(user_id).await?;
            }
            if wait_seconds == 0 {
                wait_seconds = self.remaining(client_address).await?;
            }
        }

        Ok(BruteForceStatus {
            blocked,
            attempts,
            wait_seconds,
        })
    }

    async fn attempts(&self, identifier: &str) -> Result<i64> {
        let raw = self
            .store
            .get(&counter_key(identifier))
            .await
            .context("failed to read brute-force counter")?;
        Ok(raw.and_then(|value| value.parse().ok()).unwrap_or(0))
    }

    async fn remaining(&self, identifier: &str) -> Result<u64> {
        Ok(self
            .store
            .ttl_seconds(&counter_key(identifier))
            .await
            .context("failed to read brute-force counter TTL")?
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn blocked_after_max_attempts_and_cleared_by_success() {
        let store = Arc::new(MemoryStore::new());
        let guard = BruteForceGuard::new(store);

        for _ in 0..4 {
            guard.record_failure("10.0.0.5").await.unwrap();
        }
        let status = guard.status(None, "10.0.0.5").await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.attempts, 4);

        guard.record_failure("10.0.0.5").await.unwrap();
        let status = guard.status(None, "10.0.0.5").await.unwrap();
        assert!(status.blocked);
        assert_eq!(status.attempts, 5);
        assert!(status.wait_seconds > 0);

        guard.record_success("10.0.0.5").await.unwrap();
        let status = guard.status(None, "10.0.0.5").await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.attempts, 0);
    }

    #[tokio::test]
    async fn lockout_lifts_when_window_elapses() {
        let store = Arc::new(MemoryStore::new());
        let guard = BruteForceGuard::new(store.clone());

        for _ in 0..5 {
            guard.record_failure("10.0.0.5").await.unwrap();
        }
        assert!(guard.status(None, "10.0.0.5").await.unwrap().blocked);

        store.advance(Duration::from_secs(301));
        let status = guard.status(None, "10.0.0.5").await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.attempts, 0);
    }

    #[tokio::test]
    async fn status_combines_user_and_address_counters() {
        let store = Arc::new(MemoryStore::new());
        let guard = BruteForceGuard::new(store);

        for _ in 0..5 {
            guard.record_failure("alice").await.unwrap();
        }
        guard.record_failure("10.0.0.5").await.unwrap();

        let status = guard.status(Some("alice"), "10.0.0.5").await.unwrap();
        assert!(status.blocked);
        assert_eq!(status.attempts, 5);
        // User-scoped TTL wins when the user counter exists.
        assert!(status.wait_seconds > 0);
    }

    #[tokio::test]
    async fn concurrent_failures_never_lose_updates() {
        let store = Arc::new(MemoryStore::new());
        let guard = BruteForceGuard::new(store);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move {
                guard.record_failure("10.0.0.5").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let status = guard.status(None, "10.0.0.5").await.unwrap();
        assert_eq!(status.attempts, 10);
    }
}
