//! Geolocation seam.
//!
//! Lookup is an external collaborator: the core only needs
//! `client_address -> Option<Location>` and must keep working when no
//! location data is available.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Country/city pair used for trust history and analytics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Location {
    pub country: String,
    pub city: String,
}

pub trait GeoLocator: Send + Sync {
    fn locate(&self, client_address: &str) -> Option<Location>;
}

/// Locator that never resolves; trust scoring falls back to its neutral
/// location component.
#[derive(Clone, Debug)]
pub struct NoopGeoLocator;

impl GeoLocator for NoopGeoLocator {
    fn locate(&self, _client_address: &str) -> Option<Location> {
        None
    }
}

/// Development locator: resolves loopback addresses to a fixed location so
/// the whole pipeline can be exercised without a geo database.
#[derive(Clone, Debug)]
pub struct DevGeoLocator;

impl GeoLocator for DevGeoLocator {
    fn locate(&self, client_address: &str) -> Option<Location> {
        if client_address.starts_with("127.") || client_address == "::1" {
            return Some(Location {
                country: "Local".to_string(),
                city: "Localhost".to_string(),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_locator_never_resolves() {
        assert_eq!(NoopGeoLocator.locate("8.8.8.8"), None);
    }

    #[test]
    fn dev_locator_resolves_loopback_only() {
        let location = DevGeoLocator.locate("127.0.0.1");
        assert_eq!(
            location,
            Some(Location {
                country: "Local".to_string(),
                city: "Localhost".to_string(),
            })
        );
        assert_eq!(DevGeoLocator.locate("::1").map(|l| l.country), Some("Local".to_string()));
        assert_eq!(DevGeoLocator.locate("10.0.0.5"), None);
    }
}
