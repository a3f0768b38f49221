//! In-memory store used by tests and local development.
//!
//! Implements the same lazy-expiry and atomic-counter semantics as the Redis
//! store. A manual clock offset (`advance`) lets tests cross TTL windows
//! without sleeping.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{KeyValueStore, StoreError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    strings: HashMap<String, Entry>,
    sets: HashMap<String, Vec<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    clock_offset: Duration,
}

/// Single-process [`KeyValueStore`] with the Redis semantics the core needs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the store's clock forward, expiring TTL'd entries accordingly.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().expect("memory store poisoned");
        state.clock_offset += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory store poisoned")
    }
}

impl State {
    fn now(&self) -> Instant {
        Instant::now() + self.clock_offset
    }

    /// Drop the string entry if its TTL has passed.
    fn purge(&mut self, key: &str) {
        let now = self.now();
        let expired = self
            .strings
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| now >= deadline);
        if expired {
            self.strings.remove(key);
        }
    }
}

/// Glob match supporting `*` wildcards, enough for the key patterns the core
/// scans with (`session:*`, `user_sessions:*`, ...).
fn key_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if idx == 0 {
            match rest.strip_prefix(part) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if idx == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let resolve = |idx: isize| -> isize {
        if idx < 0 { idx + len as isize } else { idx }
    };
    let start = resolve(start).max(0);
    let stop = resolve(stop).min(len as isize - 1);
    if start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.lock();
        state.purge(key);
        Ok(state.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut state = self.lock();
        let deadline = state.now() + Duration::from_secs(ttl_seconds);
        state.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(deadline),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.strings.remove(key);
        state.sets.remove(key);
        state.hashes.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn ttl_seconds(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut state = self.lock();
        state.purge(key);
        let now = state.now();
        Ok(state
            .strings
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now).as_secs()))
    }

    async fn incr_ex(&self, key: &str, window_seconds: u64) -> Result<i64, StoreError> {
        let mut state = self.lock();
        state.purge(key);
        let now = state.now();
        if let Some(entry) = state.strings.get_mut(key) {
            let value = entry.value.parse::<i64>().unwrap_or(0) + 1;
            entry.value = value.to_string();
            return Ok(value);
        }
        state.strings.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: Some(now + Duration::from_secs(window_seconds)),
            },
        );
        Ok(1)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let set = state.sets.entry(key.to_string()).or_default();
        if !set.iter().any(|existing| existing == member) {
            set.push(member.to_string());
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(set) = state.sets.get_mut(key) {
            set.retain(|existing| existing != member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        Ok(state.sets.get(key).cloned().unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let state = self.lock();
        Ok(state.sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock();
        Ok(state
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let state = self.lock();
        Ok(state
            .hashes
            .get(key)
            .map(|hash| {
                hash.iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut state = self.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        let value = hash
            .get(field)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0)
            + delta;
        hash.insert(field.to_string(), value.to_string());
        Ok(value)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        let Some((start, stop)) = range_bounds(list.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(list.iter().skip(start).take(stop - start + 1).cloned().collect())
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.lock();
        let now = state.now();
        state
            .strings
            .retain(|_, entry| entry.expires_at.is_none_or(|deadline| now < deadline));
        let mut keys: Vec<String> = state
            .strings
            .keys()
            .chain(state.sets.keys())
            .chain(state.hashes.keys())
            .chain(state.lists.keys())
            .filter(|key| key_matches(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_matches_glob() {
        assert!(key_matches("session:*", "session:abc"));
        assert!(key_matches("user_sessions:*", "user_sessions:42"));
        assert!(!key_matches("session:*", "user_sessions:42"));
        assert!(key_matches("exact", "exact"));
        assert!(!key_matches("exact", "exact:more"));
    }

    #[tokio::test]
    async fn incr_ex_sets_window_only_on_create() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_ex("counter", 60).await.unwrap(), 1);
        assert_eq!(store.incr_ex("counter", 60).await.unwrap(), 2);
        let ttl = store.ttl_seconds("counter").await.unwrap();
        assert!(ttl.is_some_and(|remaining| remaining <= 60));
    }

    #[tokio::test]
    async fn ttl_expiry_respects_advanced_clock() {
        let store = MemoryStore::new();
        store.set_ex("key", "value", 30).await.unwrap();
        assert_eq!(store.get("key").await.unwrap().as_deref(), Some("value"));

        store.advance(Duration::from_secs(31));
        assert_eq!(store.get("key").await.unwrap(), None);
        assert_eq!(store.ttl_seconds("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lrange_is_most_recent_first() {
        let store = MemoryStore::new();
        store.lpush("log", "first").await.unwrap();
        store.lpush("log", "second").await.unwrap();
        let all = store.lrange("log", 0, -1).await.unwrap();
        assert_eq!(all, vec!["second".to_string(), "first".to_string()]);
        let first_only = store.lrange("log", 0, 0).await.unwrap();
        assert_eq!(first_only, vec!["second".to_string()]);
    }
}
