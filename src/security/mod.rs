//! The adaptive session and device-trust security core.
//!
//! Five tightly coupled concerns form one stateful decision engine: session
//! lifecycle, device trust scoring, brute-force lockout, step-up challenge
//! selection/verification, and rolling security analytics. The gateway
//! middleware in `crate::api` is the only consumer that composes them; all
//! durable state goes through the injected [`crate::store::KeyValueStore`].

pub mod analytics;
pub mod brute_force;
pub mod device;
pub mod geo;
pub mod identity;
pub mod mail;
pub mod session;
pub mod signals;
pub mod step_up;

use std::sync::Arc;

use crate::store::KeyValueStore;
use analytics::SecurityAnalytics;
use brute_force::BruteForceGuard;
use device::DeviceTrustEngine;
use geo::GeoLocator;
use identity::{CredentialVerifier, IdentityResolver, SessionIdentityResolver};
use mail::Mailer;
use session::SessionManager;
use step_up::StepUpOrchestrator;

const DEFAULT_SESSION_TIMEOUT_SECONDS: u64 = 30 * 60;
const DEFAULT_TRUST_THRESHOLD: f64 = 0.7;
const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_ATTEMPT_WINDOW_SECONDS: u64 = 300;
const DEFAULT_EMAIL_CODE_TTL_SECONDS: u64 = 300;
const DEFAULT_TOTP_ISSUER: &str = "Sentra";
const DEFAULT_SESSION_HEADER: &str = "x-session-id";

/// Security policy knobs, applied at construction time.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    session_timeout_seconds: u64,
    session_header: String,
    trust_threshold: f64,
    max_attempts: i64,
    attempt_window_seconds: u64,
    email_code_ttl_seconds: u64,
    totp_issuer: String,
    excluded_paths: Vec<String>,
}

impl SecurityConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_timeout_seconds: DEFAULT_SESSION_TIMEOUT_SECONDS,
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            trust_threshold: DEFAULT_TRUST_THRESHOLD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_window_seconds: DEFAULT_ATTEMPT_WINDOW_SECONDS,
            email_code_ttl_seconds: DEFAULT_EMAIL_CODE_TTL_SECONDS,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            excluded_paths: vec![
                "/health".to_string(),
                "/docs".to_string(),
                "/openapi.json".to_string(),
                "/metrics".to_string(),
            ],
        }
    }

    #[must_use]
    pub fn with_session_timeout_seconds(mut self, seconds: u64) -> Self {
        self.session_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_header(mut self, header: String) -> Self {
        self.session_header = header.to_lowercase();
        self
    }

    #[must_use]
    pub fn with_trust_threshold(mut self, threshold: f64) -> Self {
        self.trust_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_attempt_policy(mut self, max_attempts: i64, window_seconds: u64) -> Self {
        self.max_attempts = max_attempts;
        self.attempt_window_seconds = window_seconds;
        self
    }

    #[must_use]
    pub fn with_email_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.email_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_excluded_paths(mut self, paths: Vec<String>) -> Self {
        self.excluded_paths = paths;
        self
    }

    #[must_use]
    pub fn session_timeout_seconds(&self) -> u64 {
        self.session_timeout_seconds
    }

    #[must_use]
    pub fn session_header(&self) -> &str {
        &self.session_header
    }

    #[must_use]
    pub fn trust_threshold(&self) -> f64 {
        self.trust_threshold
    }

    #[must_use]
    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    #[must_use]
    pub fn attempt_window_seconds(&self) -> u64 {
        self.attempt_window_seconds
    }

    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths
            .iter()
            .any(|excluded| path.starts_with(excluded))
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The composed security core, one instance per process.
///
/// Owns the component handles; the store, geolocation, mail, identity, and
/// credential collaborators are injected so the whole engine runs in tests
/// without Redis or network access.
pub struct SecurityState {
    config: SecurityConfig,
    store: Arc<dyn KeyValueStore>,
    sessions: SessionManager,
    devices: DeviceTrustEngine,
    brute_force: BruteForceGuard,
    step_up: StepUpOrchestrator,
    analytics: SecurityAnalytics,
    identity: Arc<dyn IdentityResolver>,
    credentials: Arc<dyn CredentialVerifier>,
}

impl SecurityState {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: SecurityConfig,
        geo: Arc<dyn GeoLocator>,
        mailer: Arc<dyn Mailer>,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let sessions = SessionManager::new(store.clone(), config.session_timeout_seconds);
        let devices = DeviceTrustEngine::new(store.clone(), geo.clone(), config.trust_threshold);
        let brute_force = BruteForceGuard::new(store.clone())
            .with_policy(config.max_attempts, config.attempt_window_seconds);
        let step_up = StepUpOrchestrator::new(
            store.clone(),
            mailer,
            config.totp_issuer.clone(),
            config.email_code_ttl_seconds,
        );
        let analytics = SecurityAnalytics::new(store.clone(), geo);
        let identity = Arc::new(SessionIdentityResolver::new(sessions.clone()));

        Self {
            config,
            store,
            sessions,
            devices,
            brute_force,
            step_up,
            analytics,
            identity,
            credentials,
        }
    }

    /// Swap the identity resolver, e.g. for token formats owned by an
    /// external identity provider.
    #[must_use]
    pub fn with_identity_resolver(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn devices(&self) -> &DeviceTrustEngine {
        &self.devices
    }

    #[must_use]
    pub fn brute_force(&self) -> &BruteForceGuard {
        &self.brute_force
    }

    #[must_use]
    pub fn step_up(&self) -> &StepUpOrchestrator {
        &self.step_up
    }

    #[must_use]
    pub fn analytics(&self) -> &SecurityAnalytics {
        &self.analytics
    }

    #[must_use]
    pub fn identity(&self) -> &dyn IdentityResolver {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn credentials(&self) -> &dyn CredentialVerifier {
        self.credentials.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() {
        let config = SecurityConfig::new();
        assert_eq!(config.session_timeout_seconds(), 1800);
        assert_eq!(config.trust_threshold(), 0.7);
        assert_eq!(config.max_attempts(), 5);
        assert_eq!(config.attempt_window_seconds(), 300);
        assert_eq!(config.session_header(), "x-session-id");

        let config = config
            .with_session_timeout_seconds(60)
            .with_trust_threshold(0.9)
            .with_attempt_policy(3, 120)
            .with_session_header("X-Auth-Session".to_string());
        assert_eq!(config.session_timeout_seconds(), 60);
        assert_eq!(config.trust_threshold(), 0.9);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.attempt_window_seconds(), 120);
        assert_eq!(config.session_header(), "x-auth-session");
    }

    #[test]
    fn excluded_paths_match_by_prefix() {
        let config = SecurityConfig::new();
        assert!(config.is_excluded("/health"));
        assert!(config.is_excluded("/docs/index.html"));
        assert!(!config.is_excluded("/v1/me/sessions"));
    }
}
