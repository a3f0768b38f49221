//! Shared state store for the security core.
//!
//! Every component keeps its durable state behind the [`KeyValueStore`]
//! trait: plain values with optional TTLs, atomic counters, sets, hashes,
//! lists, and cursor-based key scanning. Production uses [`RedisStore`]
//! (bb8-pooled Redis); [`MemoryStore`] backs tests and local development.
//!
//! The store handle is constructed once by the process entry point and
//! injected into each component as an `Arc` — there is no global pool.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, StoreConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the store layer.
///
/// Callers decide policy: best-effort checks log and continue on store
/// failure, session validation treats any store failure as unauthenticated.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection unavailable: {0}")]
    Unavailable(String),
    #[error("store command failed: {0}")]
    Command(#[from] ::redis::RedisError),
    #[error("store command timed out after {0}ms")]
    Timeout(u128),
}

/// Key-value operations the security core relies on.
///
/// Counter mutations (`incr_ex`, `hincr`) must be atomic in the
/// implementation; concurrent failed logins are an expected adversarial
/// pattern and lost updates would silently weaken the brute-force guard.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Liveness probe used by `/health`.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set a value that expires after `ttl_seconds`.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Delete a key of any type. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remaining TTL for a key, `None` when the key is missing or has no
    /// expiry.
    async fn ttl_seconds(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Atomically increment an integer counter, setting `window_seconds` as
    /// TTL only on the increment that creates the key. Returns the new
    /// counter value.
    async fn incr_ex(&self, key: &str, window_seconds: u64) -> Result<i64, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Atomically increment a hash field, returning the new value.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Push a value to the front of a list (most-recent-first logs).
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Inclusive range over a list; negative indices count from the end
    /// (`0, -1` is the whole list).
    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;

    /// Cursor-scan all keys matching a glob pattern. The cursor loop is
    /// internal; callers get the full match list.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}
