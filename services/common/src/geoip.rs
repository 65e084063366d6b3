//! GeoIP collaborator
//!
//! Consumed by the firewall as a pure function boundary: IP in, optional
//! country code out. Malformed input and a missing database both resolve to
//! `None`, never an error on the request path.

use crate::config::GeoIpConfig;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Country lookup boundary
pub trait GeoLookup: Send + Sync {
    /// Resolve an IP to an ISO country code; `None` when unknown
    fn lookup_country(&self, ip: IpAddr) -> Option<String>;
}

/// MaxMind-backed implementation
pub struct MaxMindGeo {
    reader: Option<Arc<Reader<Vec<u8>>>>,
}

impl MaxMindGeo {
    /// Open the configured database; a missing or unreadable file yields a
    /// service that always misses
    pub fn from_config(config: &GeoIpConfig) -> Self {
        let reader = match &config.db_path {
            Some(path) => match Reader::open_readfile(path) {
                Ok(reader) => {
                    info!(path = %path, "GeoIP country database loaded");
                    Some(Arc::new(reader))
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to load GeoIP database");
                    None
                }
            },
            None => None,
        };
        Self { reader }
    }

    /// Service without a database (for testing or degraded deployments)
    pub fn dummy() -> Self {
        Self { reader: None }
    }

    /// Check if a database is loaded
    pub fn is_available(&self) -> bool {
        self.reader.is_some()
    }
}

impl GeoLookup for MaxMindGeo {
    fn lookup_country(&self, ip: IpAddr) -> Option<String> {
        let reader = self.reader.as_ref()?;
        let country = reader.lookup::<geoip2::Country>(ip).ok()?;
        country
            .country
            .and_then(|c| c.iso_code)
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_service_misses() {
        let geo = MaxMindGeo::dummy();
        assert!(!geo.is_available());
        assert_eq!(geo.lookup_country("8.8.8.8".parse().unwrap()), None);
    }

    #[test]
    fn test_missing_database_path_is_nonfatal() {
        let geo = MaxMindGeo::from_config(&GeoIpConfig {
            db_path: Some("/nonexistent/geo.mmdb".to_string()),
        });
        assert!(!geo.is_available());
        assert_eq!(geo.lookup_country("1.2.3.4".parse().unwrap()), None);
    }
}
