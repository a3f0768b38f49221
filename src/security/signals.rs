//! Client-presented request metadata: fingerprinting and user-agent parsing.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

const UNKNOWN: &str = "unknown";

/// Request metadata the security core scores and logs.
///
/// Collected once per request from headers; no body access.
#[derive(Clone, Debug)]
pub struct RequestSignals {
    pub client_address: String,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub accept_encoding: String,
}

impl RequestSignals {
    /// Collect signals from request headers.
    ///
    /// The client address comes from proxy headers (`x-forwarded-for`,
    /// `x-real-ip`); without one the address is recorded as `unknown`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| -> String {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        Self {
            client_address: extract_client_address(headers)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            user_agent: header("user-agent"),
            accept: header("accept"),
            accept_language: header("accept-language"),
            accept_encoding: header("accept-encoding"),
        }
    }

    /// Stable device fingerprint: SHA-256 over the client-presented metadata.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let data = format!(
            "{}|{}|{}|{}|{}",
            self.user_agent,
            self.client_address,
            self.accept,
            self.accept_language,
            self.accept_encoding
        );
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex_encode(&hasher.finalize())
    }

    #[must_use]
    pub fn ua_profile(&self) -> UaProfile {
        parse_user_agent(&self.user_agent)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut acc, byte| {
            use std::fmt::Write;
            let _ = write!(acc, "{byte:02x}");
            acc
        },
    )
}

/// Extract a client address from common proxy headers.
#[must_use]
pub fn extract_client_address(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Browser, OS, and device family parsed from a user-agent string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UaProfile {
    pub browser: String,
    pub os: String,
    pub device: String,
}

/// Family-level user-agent classification.
///
/// Only family names matter for trust scoring and analytics; versions are
/// deliberately ignored so a browser update does not read as a new device.
#[must_use]
pub fn parse_user_agent(user_agent: &str) -> UaProfile {
    let ua = user_agent;

    let browser = if ua.contains("Edg/") || ua.contains("Edge/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        "Chrome"
    } else if ua.contains("Firefox/") || ua.contains("FxiOS/") {
        "Firefox"
    } else if ua.contains("Safari/") {
        "Safari"
    } else if ua.contains("curl/") {
        "curl"
    } else {
        "Other"
    };

    let os = if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        "iOS"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Other"
    };

    let lowered = ua.to_ascii_lowercase();
    let device = if lowered.contains("bot")
        || lowered.contains("spider")
        || lowered.contains("crawler")
    {
        "Spider"
    } else if ua.contains("iPhone") {
        "iPhone"
    } else if ua.contains("iPad") {
        "iPad"
    } else if ua.contains("Android") && ua.contains("Mobile") {
        "Mobile"
    } else if ua.contains("Android") {
        "Tablet"
    } else {
        "Other"
    };

    UaProfile {
        browser: browser.to_string(),
        os: os.to_string(),
        device: device.to_string(),
    }
}
