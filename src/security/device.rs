//! Device fingerprinting and trust scoring.
//!
//! Each `(user, fingerprint)` pair gets a record scored in `[0, 1]` from
//! three components: location (weight 0.4), history (0.3), and behavioral
//! pattern (0.3). `is_trusted` is derived from the score on every
//! observation and never stored independently of it. New devices start at
//! the neutral 0.5 and are never trusted on first sight.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::geo::{GeoLocator, Location};
use super::signals::{RequestSignals, parse_user_agent};
use crate::store::KeyValueStore;

const LOCATION_WEIGHT: f64 = 0.4;
const HISTORY_WEIGHT: f64 = 0.3;
const PATTERN_WEIGHT: f64 = 0.3;

const NEW_DEVICE_SCORE: f64 = 0.5;
const MATURE_DEVICE_DAYS: i64 = 30;

fn info_key(user_id: &str) -> String {
    format!("device:info:{user_id}")
}

fn locations_key(user_id: &str) -> String {
    format!("device:locations:{user_id}")
}

fn stats_key(user_id: &str) -> String {
    format!("device:stats:{user_id}")
}

/// Stored state for one device fingerprint of one user.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceRecord {
    pub fingerprint: String,
    pub user_agent: String,
    pub client_address: String,
    pub location: Option<Location>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub trust_score: f64,
    pub is_trusted: bool,
}

#[derive(Clone)]
pub struct DeviceTrustEngine {
    store: Arc<dyn KeyValueStore>,
    geo: Arc<dyn GeoLocator>,
    trust_threshold: f64,
}

impl DeviceTrustEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        geo: Arc<dyn GeoLocator>,
        trust_threshold: f64,
    ) -> Self {
        Self {
            store,
            geo,
            trust_threshold,
        }
    }

    /// Observe a request: create or rescore the device record, extend the
    /// user's location history, and bump the login counter (atomic).
    pub async fn process(&self, user_id: &str, signals: &RequestSignals) -> Result<DeviceRecord> {
        let fingerprint = signals.fingerprint();
        let now = Utc::now();
        let location = self.geo.locate(&signals.client_address);

        let total_logins = self
            .store
            .hincr(&stats_key(user_id), "total_logins", 1)
            .await
            .context("failed to bump login counter")?;

        let stored = self.get(user_id, &fingerprint).await?;

        let record = match stored {
            Some(mut record) if record.trust_score >= 1.0 || record.trust_score <= 0.0 => {
                // Score pinned at an extreme means an explicit trust
                // decision (post-challenge grant or revocation); it survives
                // observations until the opposite mark is applied.
                record.last_seen = now;
                record
            }
            Some(mut record) => {
                // Score against the history as it was before this request,
                // then fold the current location into it.
                let known = self.known_locations(user_id).await?;

                let location_score = location_score(location.as_ref(), &known);
                let history_score = history_score(record.first_seen, now, total_logins);
                let pattern_score = pattern_score(&signals.user_agent, &record.user_agent);

                record.last_seen = now;
                record.trust_score = LOCATION_WEIGHT * location_score
                    + HISTORY_WEIGHT * history_score
                    + PATTERN_WEIGHT * pattern_score;
                record.is_trusted = record.trust_score >= self.trust_threshold;
                record
            }
            None => DeviceRecord {
                fingerprint: fingerprint.clone(),
                user_agent: signals.user_agent.clone(),
                client_address: signals.client_address.clone(),
                location: location.clone(),
                first_seen: now,
                last_seen: now,
                trust_score: NEW_DEVICE_SCORE,
                is_trusted: false,
            },
        };

        if let Some(location) = &location {
            self.remember_location(user_id, location).await?;
        }
        self.write(user_id, &record).await?;

        Ok(record)
    }

    pub async fn get(&self, user_id: &str, fingerprint: &str) -> Result<Option<DeviceRecord>> {
        let raw = self
            .store
            .hget(&info_key(user_id), fingerprint)
            .await
            .context("failed to read device record")?;
        raw.map(|data| serde_json::from_str(&data).context("corrupt device record"))
            .transpose()
    }

    pub async fn known_locations(&self, user_id: &str) -> Result<Vec<Location>> {
        let members = self
            .store
            .smembers(&locations_key(user_id))
            .await
            .context("failed to read known locations")?;
        members
            .into_iter()
            .map(|raw| serde_json::from_str(&raw).context("corrupt known location"))
            .collect()
    }

    /// Force a device to trusted; used after a completed step-up challenge.
    pub async fn mark_trusted(&self, user_id: &str, fingerprint: &str) -> Result<()> {
        self.set_trust(user_id, fingerprint, 1.0, true).await
    }

    /// Force a device back to untrusted, requiring a fresh step-up.
    pub async fn mark_untrusted(&self, user_id: &str, fingerprint: &str) -> Result<()> {
        self.set_trust(user_id, fingerprint, 0.0, false).await
    }

    async fn set_trust(
        &self,
        user_id: &str,
        fingerprint: &str,
        score: f64,
        trusted: bool,
    ) -> Result<()> {
        if let Some(mut record) = self.get(user_id, fingerprint).await? {
            record.trust_score = score;
            record.is_trusted = trusted;
            self.write(user_id, &record).await?;
        }
        Ok(())
    }

    async fn remember_location(&self, user_id: &str, location: &Location) -> Result<()> {
        let member =
            serde_json::to_string(location).context("failed to encode known location")?;
        self.store
            .sadd(&locations_key(user_id), &member)
            .await
            .context("failed to append known location")?;
        Ok(())
    }

    async fn write(&self, user_id: &str, record: &DeviceRecord) -> Result<()> {
        let data = serde_json::to_string(record).context("failed to encode device record")?;
        self.store
            .hset(&info_key(user_id), &record.fingerprint, &data)
            .await
            .context("failed to write device record")?;
        Ok(())
    }
}

/// Location component: exact match 1.0, country-only 0.7, known-but-foreign
/// 0.3, no data 0.5.
fn location_score(current: Option<&Location>, known: &[Location]) -> f64 {
    let Some(current) = current else {
        return 0.5;
    };
    if known.is_empty() {
        return 0.5;
    }
    if known
        .iter()
        .any(|loc| loc.country == current.country && loc.city == current.city)
    {
        return 1.0;
    }
    if known.iter().any(|loc| loc.country == current.country) {
        return 0.7;
    }
    0.3
}

/// History component: device age dominates, then login volume.
fn history_score(first_seen: DateTime<Utc>, now: DateTime<Utc>, total_logins: i64) -> f64 {
    if now - first_seen > Duration::days(MATURE_DEVICE_DAYS) {
        return 1.0;
    }
    if total_logins > 10 {
        return 0.9;
    }
    if total_logins > 5 {
        return 0.7;
    }
    0.5
}

/// Pattern component: browser+OS+device family match 1.0, browser+OS 0.8,
/// anything else 0.4.
fn pattern_score(current_user_agent: &str, stored_user_agent: &str) -> f64 {
    let current = parse_user_agent(current_user_agent);
    let stored = parse_user_agent(stored_user_agent);

    if current.browser == stored.browser
        && current.os == stored.os
        && current.device == stored.device
    {
        return 1.0;
    }
    if current.browser == stored.browser && current.os == stored.os {
        return 0.8;
    }
    0.4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::geo::{DevGeoLocator, NoopGeoLocator};
    use crate::store::MemoryStore;
    use axum::http::{HeaderMap, HeaderValue};

    const CHROME_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/120.0.0.0 Safari/537.36";

    fn signals(user_agent: &str, address: &str) -> RequestSignals {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_str(user_agent).unwrap());
        headers.insert("x-forwarded-for", HeaderValue::from_str(address).unwrap());
        headers.insert("accept", HeaderValue::from_static("*/*"));
        RequestSignals::from_headers(&headers)
    }

    fn engine(store: Arc<MemoryStore>, geo: Arc<dyn GeoLocator>) -> DeviceTrustEngine {
        DeviceTrustEngine::new(store, geo, 0.7)
    }

    #[tokio::test]
    async fn new_device_starts_neutral_and_untrusted() {
        let store = Arc::new(MemoryStore::new());
        let devices = engine(store, Arc::new(NoopGeoLocator));

        let record = devices
            .process("alice", &signals(CHROME_LINUX, "10.0.0.5"))
            .await
            .unwrap();
        assert_eq!(record.trust_score, 0.5);
        assert!(!record.is_trusted);
    }

    #[tokio::test]
    async fn repeat_observation_from_known_location_builds_trust() {
        let store = Arc::new(MemoryStore::new());
        let devices = engine(store, Arc::new(DevGeoLocator));
        let request = signals(CHROME_LINUX, "127.0.0.1");

        devices.process("alice", &request).await.unwrap();
        let record = devices.process("alice", &request).await.unwrap();

        // location 1.0, history 0.5 (young, 2 logins), pattern 1.0
        assert!((record.trust_score - 0.85).abs() < 1e-9);
        assert!(record.is_trusted);
    }

    #[tokio::test]
    async fn changed_browser_family_lowers_pattern_component() {
        let store = Arc::new(MemoryStore::new());
        let devices = engine(store.clone(), Arc::new(NoopGeoLocator));

        let first = devices
            .process("alice", &signals(CHROME_LINUX, "10.0.0.5"))
            .await
            .unwrap();

        // Rewrite the stored record under the new request's fingerprint so
        // the second observation hits the same record with a different UA.
        let curl = signals("curl/8.5.0", "10.0.0.5");
        let mut seeded = first.clone();
        seeded.fingerprint = curl.fingerprint();
        store
            .hset(
                &info_key("alice"),
                &seeded.fingerprint,
                &serde_json::to_string(&seeded).unwrap(),
            )
            .await
            .unwrap();

        let record = devices.process("alice", &curl).await.unwrap();
        // location 0.5 (no data), history 0.5, pattern 0.4
        assert!((record.trust_score - 0.47).abs() < 1e-9);
        assert!(!record.is_trusted);
    }

    #[tokio::test]
    async fn explicit_trust_survives_later_observations() {
        let store = Arc::new(MemoryStore::new());
        let devices = engine(store, Arc::new(NoopGeoLocator));
        let request = signals(CHROME_LINUX, "10.0.0.5");

        devices.process("alice", &request).await.unwrap();
        devices
            .mark_trusted("alice", &request.fingerprint())
            .await
            .unwrap();

        let record = devices.process("alice", &request).await.unwrap();
        assert!(record.is_trusted);
        assert_eq!(record.trust_score, 1.0);
    }

    #[tokio::test]
    async fn mark_trusted_and_untrusted_pin_the_score() {
        let store = Arc::new(MemoryStore::new());
        let devices = engine(store, Arc::new(NoopGeoLocator));
        let request = signals(CHROME_LINUX, "10.0.0.5");

        devices.process("alice", &request).await.unwrap();
        let fingerprint = request.fingerprint();

        devices.mark_trusted("alice", &fingerprint).await.unwrap();
        let record = devices.get("alice", &fingerprint).await.unwrap().unwrap();
        assert!(record.is_trusted);
        assert_eq!(record.trust_score, 1.0);

        devices.mark_untrusted("alice", &fingerprint).await.unwrap();
        let record = devices.get("alice", &fingerprint).await.unwrap().unwrap();
        assert!(!record.is_trusted);
        assert_eq!(record.trust_score, 0.0);
    }

    #[test]
    fn location_score_tiers() {
        let home = Location {
            country: "Iceland".to_string(),
            city: "Reykjavik".to_string(),
        };
        let nearby = Location {
            country: "Iceland".to_string(),
            city: "Akureyri".to_string(),
        };
        let foreign = Location {
            country: "Japan".to_string(),
            city: "Osaka".to_string(),
        };
        let known = vec![home.clone()];

        assert_eq!(location_score(Some(&home), &known), 1.0);
        assert_eq!(location_score(Some(&nearby), &known), 0.7);
        assert_eq!(location_score(Some(&foreign), &known), 0.3);
        assert_eq!(location_score(None, &known), 0.5);
        assert_eq!(location_score(Some(&home), &[]), 0.5);
    }

    #[test]
    fn history_score_tiers() {
        let now = Utc::now();
        let young = now - Duration::days(2);
        let mature = now - Duration::days(45);

        assert_eq!(history_score(mature, now, 1), 1.0);
        assert_eq!(history_score(young, now, 11), 0.9);
        assert_eq!(history_score(young, now, 6), 0.7);
        assert_eq!(history_score(young, now, 3), 0.5);
    }

    #[test]
    fn trust_score_stays_in_unit_interval() {
        // Extremes of every component keep the weighted sum inside [0, 1].
        for location in [0.3, 0.5, 0.7, 1.0] {
            for history in [0.5, 0.7, 0.9, 1.0] {
                for pattern in [0.4, 0.8, 1.0] {
                    let score = LOCATION_WEIGHT * location
                        + HISTORY_WEIGHT * history
                        + PATTERN_WEIGHT * pattern;
                    assert!((0.0..=1.0).contains(&score));
                }
            }
        }
    }
}
