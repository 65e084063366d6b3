//! IP and country filter
//!
//! Loopback addresses, whitelisted IPs and CIDR ranges, and known crawler
//! networks are allowed outright. Everyone else is resolved to a country:
//! allow-listed countries bypass the rest of the chain, deny-listed
//! countries are refused, and unknown or unlisted countries fall through to
//! the later filters.

use crate::firewall::{AbortAction, Filter, FilterResult, RequestInfo};
use crate::store::bots::BotRegistry;
use crate::store::country::CountryResolver;
use async_trait::async_trait;
use ipnet::IpNet;
use proxywall_common::config::IpFilterConfig;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub struct IpFilter {
    whitelist: HashSet<String>,
    cidr_whitelist: Vec<IpNet>,
    allowed_countries: HashSet<String>,
    blocked_countries: HashSet<String>,
    bots: Arc<BotRegistry>,
    countries: Arc<CountryResolver>,
}

impl IpFilter {
    pub fn new(
        config: &IpFilterConfig,
        bots: Arc<BotRegistry>,
        countries: Arc<CountryResolver>,
    ) -> Self {
        let mut cidr_whitelist = Vec::with_capacity(config.cidr_whitelist.len());
        for cidr in &config.cidr_whitelist {
            match cidr.parse::<IpNet>() {
                Ok(net) => cidr_whitelist.push(net),
                Err(e) => warn!(cidr = %cidr, error = %e, "Skipping malformed whitelist CIDR"),
            }
        }

        Self {
            whitelist: config.whitelist.iter().cloned().collect(),
            cidr_whitelist,
            allowed_countries: config.allowed_countries.iter().cloned().collect(),
            blocked_countries: config.blocked_countries.iter().cloned().collect(),
            bots,
            countries,
        }
    }

    fn in_cidr_whitelist(&self, ip: IpAddr) -> bool {
        self.cidr_whitelist.iter().any(|net| net.contains(&ip))
    }
}

#[async_trait]
impl Filter for IpFilter {
    fn name(&self) -> &'static str {
        "ip_filter"
    }

    async fn handle(&self, req: &RequestInfo) -> FilterResult {
        if self.whitelist.contains(&req.remote_ip) {
            return FilterResult::break_loop();
        }

        // malformed addresses carry no signal either way; let the later
        // filters decide
        let Ok(addr) = req.remote_ip.parse::<IpAddr>() else {
            return FilterResult::pass_to_next();
        };

        if addr.is_loopback() || self.in_cidr_whitelist(addr) || self.bots.is_member(addr) {
            return FilterResult::break_loop();
        }

        let country = self.countries.resolve(&req.remote_ip).await;
        if country.is_empty() {
            return FilterResult::pass_to_next();
        }
        if self.blocked_countries.contains(&country) {
            info!(ip = %req.remote_ip, country, "Refusing request from blocked country");
            return FilterResult::abort(AbortAction::Forbidden);
        }
        if self.allowed_countries.contains(&country) {
            return FilterResult::break_loop();
        }

        FilterResult::pass_to_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::test_request;
    use crate::store::tiered::RedisTier;
    use proxywall_common::config::BotFeedConfig;
    use proxywall_common::geoip::GeoLookup;
    use proxywall_common::redis::RedisHandle;
    use std::time::Duration;

    struct FixedGeo(Option<&'static str>);

    impl GeoLookup for FixedGeo {
        fn lookup_country(&self, _ip: IpAddr) -> Option<String> {
            self.0.map(|c| c.to_string())
        }
    }

    fn filter(config: IpFilterConfig, country: Option<&'static str>) -> IpFilter {
        let bots = BotRegistry::new(RedisHandle::disabled(), BotFeedConfig::default());
        let countries = Arc::new(CountryResolver::new(
            RedisTier::new(RedisHandle::disabled(), "countries"),
            Arc::new(FixedGeo(country)),
            Duration::from_secs(3600),
            Duration::from_secs(86_400),
        ));
        IpFilter::new(&config, bots, countries)
    }

    fn request_from(ip: &str) -> crate::firewall::RequestInfo {
        let mut req = test_request("example.com", "/");
        req.remote_ip = ip.to_string();
        req
    }

    #[tokio::test]
    async fn test_loopback_breaks_loop() {
        let filter = filter(IpFilterConfig::default(), None);
        let result = filter.handle(&request_from("127.0.0.1")).await;
        assert!(result.break_loop);
    }

    #[tokio::test]
    async fn test_exact_whitelist_breaks_loop() {
        let config = IpFilterConfig {
            whitelist: vec!["198.51.100.9".to_string()],
            ..Default::default()
        };
        let filter = filter(config, None);
        let result = filter.handle(&request_from("198.51.100.9")).await;
        assert!(result.break_loop);
    }

    #[tokio::test]
    async fn test_cidr_whitelist_breaks_loop() {
        let config = IpFilterConfig {
            cidr_whitelist: vec!["203.0.113.0/24".to_string(), "bad-cidr".to_string()],
            ..Default::default()
        };
        let filter = filter(config, None);
        let result = filter.handle(&request_from("203.0.113.200")).await;
        assert!(result.break_loop);
    }

    #[tokio::test]
    async fn test_blocked_country_aborts_forbidden() {
        let config = IpFilterConfig {
            blocked_countries: vec!["XX".to_string()],
            ..Default::default()
        };
        let filter = filter(config, Some("XX"));
        let result = filter.handle(&request_from("192.0.2.1")).await;
        assert!(matches!(result.abort, Some(AbortAction::Forbidden)));
    }

    #[tokio::test]
    async fn test_allowed_country_breaks_loop() {
        let config = IpFilterConfig {
            allowed_countries: vec!["DE".to_string()],
            ..Default::default()
        };
        let filter = filter(config, Some("DE"));
        let result = filter.handle(&request_from("192.0.2.1")).await;
        assert!(result.break_loop);
    }

    #[tokio::test]
    async fn test_unknown_country_passes_to_next() {
        let filter = filter(IpFilterConfig::default(), None);
        let result = filter.handle(&request_from("192.0.2.1")).await;
        assert!(result.passed);
        assert!(!result.break_loop);
        assert!(result.abort.is_none());
    }

    #[tokio::test]
    async fn test_malformed_ip_passes_to_next() {
        let filter = filter(IpFilterConfig::default(), Some("DE"));
        let result = filter.handle(&request_from("not-an-ip")).await;
        assert!(result.passed);
        assert!(!result.break_loop);
    }
}
