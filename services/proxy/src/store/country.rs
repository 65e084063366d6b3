//! IP to country resolution
//!
//! Tiered cache in front of the geo collaborator. Unknown results are
//! cached with a short TTL so unresolvable IPs do not hammer the
//! collaborator; resolved results get a long TTL.

use crate::store::tiered::{CacheRecord, RemoteTier, TieredCache};
use chrono::{DateTime, Utc};
use proxywall_common::geoip::GeoLookup;
use proxywall_common::metrics::GEO_LOOKUPS_TOTAL;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Cached resolution; an empty country means "unknown"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryRecord {
    pub ip: String,
    pub country: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl CacheRecord for CountryRecord {
    fn cache_key(&self) -> &str {
        &self.ip
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

pub struct CountryResolver {
    cache: TieredCache<CountryRecord>,
    geo: Arc<dyn GeoLookup>,
    short_ttl: chrono::Duration,
    long_ttl: chrono::Duration,
}

impl CountryResolver {
    pub fn new(
        remote: Arc<dyn RemoteTier>,
        geo: Arc<dyn GeoLookup>,
        short_ttl: Duration,
        long_ttl: Duration,
    ) -> Self {
        Self {
            cache: TieredCache::new("countries", remote, long_ttl),
            geo,
            short_ttl: chrono::Duration::from_std(short_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            long_ttl: chrono::Duration::from_std(long_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    /// Resolve an IP to a country code; empty string when unknown
    pub async fn resolve(&self, ip: &str) -> String {
        if let Some(record) = self.cache.get(ip).await {
            return record.country;
        }

        // placeholder with a short lifetime so unresolvable IPs stay cheap
        let now = Utc::now();
        let mut record = CountryRecord {
            ip: ip.to_string(),
            country: String::new(),
            created: now,
            expires: now + self.short_ttl,
        };

        // malformed IPs resolve to unknown, never an error
        if let Ok(addr) = ip.parse::<IpAddr>() {
            match self.geo.lookup_country(addr) {
                Some(country) => {
                    GEO_LOOKUPS_TOTAL.with_label_values(&["found"]).inc();
                    record.country = country;
                    record.expires = now + self.long_ttl;
                }
                None => {
                    GEO_LOOKUPS_TOTAL.with_label_values(&["unknown"]).inc();
                }
            }
        }

        self.cache.insert(record.clone());
        record.country
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tiered::RedisTier;
    use proxywall_common::redis::RedisHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGeo {
        calls: AtomicUsize,
        answer: Option<String>,
    }

    impl GeoLookup for CountingGeo {
        fn lookup_country(&self, _ip: IpAddr) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn resolver(geo: Arc<CountingGeo>) -> CountryResolver {
        let tier = RedisTier::new(RedisHandle::disabled(), "countries");
        CountryResolver::new(
            tier,
            geo,
            Duration::from_secs(3600),
            Duration::from_secs(86_400),
        )
    }

    #[tokio::test]
    async fn test_resolution_is_cached() {
        let geo = Arc::new(CountingGeo {
            calls: AtomicUsize::new(0),
            answer: Some("DE".to_string()),
        });
        let resolver = resolver(Arc::clone(&geo));

        assert_eq!(resolver.resolve("9.9.9.9").await, "DE");
        assert_eq!(resolver.resolve("9.9.9.9").await, "DE");
        // the collaborator was consulted exactly once
        assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_result_is_cached_too() {
        let geo = Arc::new(CountingGeo {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let resolver = resolver(Arc::clone(&geo));

        assert_eq!(resolver.resolve("10.0.0.1").await, "");
        assert_eq!(resolver.resolve("10.0.0.1").await, "");
        assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_ip_never_reaches_collaborator() {
        let geo = Arc::new(CountingGeo {
            calls: AtomicUsize::new(0),
            answer: Some("US".to_string()),
        });
        let resolver = resolver(Arc::clone(&geo));

        assert_eq!(resolver.resolve("not-an-ip").await, "");
        assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
    }
}
