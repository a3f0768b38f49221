//! Login and security analytics.
//!
//! Events are append-only (most-recent-first lists); rolling aggregates are
//! kept as atomic hash counters. The counter updates and the log append are
//! independent writes: a crash between them may leave counters undercounting
//! relative to the log, which is accepted rather than papering over with
//! transactions the store does not offer.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use utoipa::ToSchema;

use super::geo::GeoLocator;
use super::signals::RequestSignals;
use crate::store::KeyValueStore;

const ANOMALY_HISTORY_LEN: isize = 100;

fn login_events_key(user_id: &str) -> String {
    format!("login_events:{user_id}")
}

fn security_events_key(user_id: &str) -> String {
    format!("security_events:{user_id}")
}

fn user_stats_key(user_id: &str) -> String {
    format!("user_stats:{user_id}")
}

fn devices_key(user_id: &str) -> String {
    format!("user_devices:{user_id}")
}

fn browsers_key(user_id: &str) -> String {
    format!("user_browsers:{user_id}")
}

fn countries_key(user_id: &str) -> String {
    format!("user_countries:{user_id}")
}

fn security_stats_key(user_id: &str) -> String {
    format!("security_stats:{user_id}")
}

fn user_sessions_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

/// Immutable record of one login attempt.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginEvent {
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub client_address: String,
    pub user_agent: String,
    pub device_type: String,
    pub browser: String,
    pub os: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub success: bool,
}

/// Immutable record of a security-relevant occurrence.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SecurityEvent {
    pub event_type: String,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub client_address: String,
    pub details: serde_json::Value,
}

/// Per-user rollup served by the admin surface.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionStats {
    pub total_logins: u64,
    pub active_sessions: u64,
    pub devices: HashMap<String, u64>,
    pub browsers: HashMap<String, u64>,
    pub countries: HashMap<String, u64>,
    /// Heuristic: mean gap between adjacent successful logins, not a true
    /// session-duration measurement.
    pub average_session_duration_seconds: f64,
    pub login_success_rate: f64,
}

/// Active-session counts across all users.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ActiveSessionCensus {
    pub total_active_sessions: u64,
    pub users_with_sessions: u64,
    pub session_distribution: HashMap<String, u64>,
}

/// Cross-user login aggregation over a time window.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginSummary {
    pub timeframe: String,
    pub total_logins: u64,
    pub successful_logins: u64,
    pub failed_logins: u64,
    pub unique_users: u64,
    pub unique_addresses: u64,
    pub success_rate: f64,
    pub device_distribution: HashMap<String, u64>,
    pub browser_distribution: HashMap<String, u64>,
    pub country_distribution: HashMap<String, u64>,
}

/// Supported summary windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeframe {
    OneHour,
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl Timeframe {
    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "1h" => Some(Self::OneHour),
            "24h" => Some(Self::OneDay),
            "7d" => Some(Self::SevenDays),
            "30d" => Some(Self::ThirtyDays),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    fn window(self) -> Duration {
        match self {
            Self::OneHour => Duration::hours(1),
            Self::OneDay => Duration::days(1),
            Self::SevenDays => Duration::days(7),
            Self::ThirtyDays => Duration::days(30),
        }
    }
}

#[derive(Clone)]
pub struct SecurityAnalytics {
    store: Arc<dyn KeyValueStore>,
    geo: Arc<dyn GeoLocator>,
}

impl SecurityAnalytics {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, geo: Arc<dyn GeoLocator>) -> Self {
        Self { store, geo }
    }

    /// Append a login event and bump the per-user rolling counters.
    pub async fn record_login(
        &self,
        session_id: &str,
        user_id: &str,
        signals: &RequestSignals,
        success: bool,
    ) -> Result<LoginEvent> {
        let profile = signals.ua_profile();
        let location = self.geo.locate(&signals.client_address);

        let event = LoginEvent {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            client_address: signals.client_address.clone(),
            user_agent: signals.user_agent.clone(),
            device_type: profile.device,
            browser: profile.browser,
            os: profile.os,
            country: location.as_ref().map(|loc| loc.country.clone()),
            city: location.as_ref().map(|loc| loc.city.clone()),
            success,
        };

        let data = serde_json::to_string(&event).context("failed to encode login event")?;
        self.store
            .lpush(&login_events_key(user_id), &data)
            .await
            .context("failed to append login event")?;

        let stats = user_stats_key(user_id);
        self.store.hincr(&stats, "total_logins", 1).await?;
        if success {
            self.store.hincr(&stats, "successful_logins", 1).await?;
        } else {
            self.store.hincr(&stats, "failed_logins", 1).await?;
        }
        self.store
            .hincr(&devices_key(user_id), &event.device_type, 1)
            .await?;
        self.store
            .hincr(&browsers_key(user_id), &event.browser, 1)
            .await?;
        if let Some(country) = &event.country {
            self.store
                .hincr(&countries_key(user_id), country, 1)
                .await?;
        }

        Ok(event)
    }

    /// Append a security event and bump its per-type counter.
    pub async fn record_security_event(
        &self,
        event_type: &str,
        session_id: &str,
        user_id: &str,
        signals: &RequestSignals,
        details: serde_json::Value,
    ) -> Result<SecurityEvent> {
        let event = SecurityEvent {
            event_type: event_type.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            client_address: signals.client_address.clone(),
            details,
        };

        let data = serde_json::to_string(&event).context("failed to encode security event")?;
        self.store
            .lpush(&security_events_key(user_id), &data)
            .await
            .context("failed to append security event")?;
        self.store
            .hincr(&security_stats_key(user_id), event_type, 1)
            .await?;

        Ok(event)
    }

    pub async fn stats(&self, user_id: &str) -> Result<SessionStats> {
        let stats = self.counters(&user_stats_key(user_id)).await?;
        let devices = self.counters(&devices_key(user_id)).await?;
        let browsers = self.counters(&browsers_key(user_id)).await?;
        let countries = self.counters(&countries_key(user_id)).await?;
        let active_sessions = self
            .store
            .scard(&user_sessions_key(user_id))
            .await
            .context("failed to count active sessions")?;

        let total = stats.get("total_logins").copied().unwrap_or(0);
        let successful = stats.get("successful_logins").copied().unwrap_or(0);
        let login_success_rate = if total > 0 {
            successful as f64 / total as f64
        } else {
            0.0
        };

        Ok(SessionStats {
            total_logins: total,
            active_sessions,
            devices,
            browsers,
            countries,
            average_session_duration_seconds: self.average_session_duration(user_id).await?,
            login_success_rate,
        })
    }

    pub async fn recent_security_events(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SecurityEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .store
            .lrange(&security_events_key(user_id), 0, limit as isize - 1)
            .await
            .context("failed to read security events")?;
        raw.iter()
            .map(|data| serde_json::from_str(data).context("corrupt security event"))
            .collect()
    }

    /// Compare the current request against the distinct device, browser, and
    /// country sets of the user's recent successful logins. No history means
    /// no anomalies: a cold start is silent, not suspicious.
    pub async fn detect_anomalies(
        &self,
        user_id: &str,
        signals: &RequestSignals,
    ) -> Result<Vec<String>> {
        let events = self
            .logins_range(user_id, 0, ANOMALY_HISTORY_LEN - 1)
            .await?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut countries = HashSet::new();
        let mut devices = HashSet::new();
        let mut browsers = HashSet::new();
        for event in events.iter().filter(|event| event.success) {
            if let Some(country) = &event.country {
                countries.insert(country.clone());
            }
            devices.insert(event.device_type.clone());
            browsers.insert(event.browser.clone());
        }

        let profile = signals.ua_profile();
        let current_country = self
            .geo
            .locate(&signals.client_address)
            .map(|loc| loc.country);

        let mut anomalies = Vec::new();
        if let Some(country) = current_country {
            if !countries.contains(&country) {
                anomalies.push(format!("Unusual login location: {country}"));
            }
        }
        if !devices.contains(&profile.device) {
            anomalies.push(format!("Unusual device: {}", profile.device));
        }
        if !browsers.contains(&profile.browser) {
            anomalies.push(format!("Unusual browser: {}", profile.browser));
        }

        Ok(anomalies)
    }

    /// Active-session counts across all users, via membership-set scan.
    pub async fn active_session_census(&self) -> Result<ActiveSessionCensus> {
        let keys = self
            .store
            .scan_match("user_sessions:*")
            .await
            .context("failed to scan session membership keys")?;

        let mut distribution = HashMap::new();
        let mut total = 0;
        for key in keys {
            let Some(user_id) = key.strip_prefix("user_sessions:") else {
                continue;
            };
            let count = self.store.scard(&key).await?;
            if count > 0 {
                total += count;
                distribution.insert(user_id.to_string(), count);
            }
        }

        Ok(ActiveSessionCensus {
            total_active_sessions: total,
            users_with_sessions: distribution.len() as u64,
            session_distribution: distribution,
        })
    }

    /// Aggregate login events across all users inside the window.
    pub async fn login_summary(&self, timeframe: Timeframe) -> Result<LoginSummary> {
        let cutoff = Utc::now() - timeframe.window();
        let keys = self
            .store
            .scan_match("login_events:*")
            .await
            .context("failed to scan login event keys")?;

        let mut summary = LoginSummary {
            timeframe: timeframe.as_str().to_string(),
            total_logins: 0,
            successful_logins: 0,
            failed_logins: 0,
            unique_users: 0,
            unique_addresses: 0,
            success_rate: 0.0,
            device_distribution: HashMap::new(),
            browser_distribution: HashMap::new(),
            country_distribution: HashMap::new(),
        };
        let mut users = HashSet::new();
        let mut addresses = HashSet::new();

        for key in keys {
            let raw = self.store.lrange(&key, 0, -1).await?;
            for data in raw {
                let event: LoginEvent =
                    serde_json::from_str(&data).context("corrupt login event")?;
                if event.timestamp < cutoff {
                    continue;
                }

                summary.total_logins += 1;
                users.insert(event.user_id.clone());
                addresses.insert(event.client_address.clone());

                if event.success {
                    summary.successful_logins += 1;
                } else {
                    summary.failed_logins += 1;
                }

                *summary
                    .device_distribution
                    .entry(event.device_type.clone())
                    .or_insert(0) += 1;
                *summary
                    .browser_distribution
                    .entry(event.browser.clone())
                    .or_insert(0) += 1;
                if let Some(country) = &event.country {
                    *summary
                        .country_distribution
                        .entry(country.clone())
                        .or_insert(0) += 1;
                }
            }
        }

        summary.unique_users = users.len() as u64;
        summary.unique_addresses = addresses.len() as u64;
        if summary.total_logins > 0 {
            summary.success_rate = summary.successful_logins as f64 / summary.total_logins as f64;
        }

        Ok(summary)
    }

    async fn logins_range(
        &self,
        user_id: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<LoginEvent>> {
        let raw = self
            .store
            .lrange(&login_events_key(user_id), start, stop)
            .await
            .context("failed to read login events")?;
        raw.iter()
            .map(|data| serde_json::from_str(data).context("corrupt login event"))
            .collect()
    }

    /// Mean time between adjacent successful logins in the log
    /// (most-recent-first), used as a rough session-length proxy.
    async fn average_session_duration(&self, user_id: &str) -> Result<f64> {
        let events = self.logins_range(user_id, 0, -1).await?;

        let mut durations = Vec::new();
        for pair in events.windows(2) {
            let (current, previous) = (&pair[0], &pair[1]);
            if current.success && previous.success {
                let gap = (current.timestamp - previous.timestamp).num_seconds();
                durations.push(gap.unsigned_abs() as f64);
            }
        }

        if durations.is_empty() {
            return Ok(0.0);
        }
        Ok(durations.iter().sum::<f64>() / durations.len() as f64)
    }

    async fn counters(&self, key: &str) -> Result<HashMap<String, u64>> {
        let entries = self
            .store
            .hgetall(key)
            .await
            .context("failed to read counters")?;
        Ok(entries
            .into_iter()
            .filter_map(|(field, value)| value.parse().ok().map(|count| (field, count)))
            .collect())
    }
}
