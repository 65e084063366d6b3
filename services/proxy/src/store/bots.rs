//! Crawler IP registry
//!
//! Holds the CIDR ranges published by search-engine crawler feeds. A
//! background task replaces the whole snapshot on a fixed period; readers
//! only ever see a complete set. The raw range list is mirrored to the
//! external store so a restart can serve a warm set before the first feed
//! fetch completes.

use ipnet::IpNet;
use parking_lot::RwLock;
use proxywall_common::config::BotFeedConfig;
use proxywall_common::error::{Error, Result};
use proxywall_common::metrics::BOT_NETWORKS_LOADED;
use proxywall_common::redis::RedisHandle;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const STORE_KEY: &str = "botnets:ranges";
const FEED_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct IpPrefix {
    #[serde(default, rename = "ipv4Prefix")]
    ipv4_prefix: Option<String>,
    #[serde(default, rename = "ipv6Prefix")]
    ipv6_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpRanges {
    prefixes: Vec<IpPrefix>,
}

pub struct BotRegistry {
    networks: RwLock<Vec<IpNet>>,
    raw: RwLock<Vec<String>>,
    remote: Arc<RedisHandle>,
    http: reqwest::Client,
    config: BotFeedConfig,
}

impl BotRegistry {
    pub fn new(remote: Arc<RedisHandle>, config: BotFeedConfig) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            networks: RwLock::new(Vec::new()),
            raw: RwLock::new(Vec::new()),
            remote,
            http,
            config,
        })
    }

    /// Membership check: linear scan of a few hundred ranges under a read
    /// lock
    pub fn is_member(&self, ip: IpAddr) -> bool {
        self.networks.read().iter().any(|net| net.contains(&ip))
    }

    pub fn len(&self) -> usize {
        self.networks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.read().is_empty()
    }

    /// Parse CIDR strings, skipping malformed entries
    fn parse_records(records: &[String]) -> Vec<IpNet> {
        let mut networks = Vec::with_capacity(records.len());
        for record in records {
            match record.parse::<IpNet>() {
                Ok(net) => networks.push(net),
                Err(e) => warn!(cidr = %record, error = %e, "Skipping malformed CIDR"),
            }
        }
        networks
    }

    /// Swap in a complete snapshot
    fn install(&self, records: Vec<String>, networks: Vec<IpNet>) {
        BOT_NETWORKS_LOADED.set(networks.len() as f64);
        *self.networks.write() = networks;
        *self.raw.write() = records;
    }

    /// Warm-restart path: populate an empty registry from the external
    /// store mirror
    pub async fn restore_from_store(&self) {
        if !self.is_empty() || !self.remote.is_active() {
            return;
        }
        let data = match self.remote.get_string(STORE_KEY).await {
            Ok(Some(data)) if !data.is_empty() => data,
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, "Crawler range restore failed");
                return;
            }
        };

        let records: Vec<String> = data.split(", ").map(|s| s.to_string()).collect();
        let networks = Self::parse_records(&records);
        info!(ranges = networks.len(), "Restored crawler ranges from external store");
        self.install(records, networks);
    }

    /// One refresh cycle: fetch the feed, parse, swap, mirror
    pub async fn refresh_once(&self) -> Result<usize> {
        let ranges: IpRanges = self
            .http
            .get(&self.config.feed_url)
            .send()
            .await
            .map_err(|e| Error::external_service("bot-feed", e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::external_service("bot-feed", e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::external_service("bot-feed", e.to_string()))?;

        let mut records = Vec::with_capacity(ranges.prefixes.len());
        for prefix in ranges.prefixes {
            if let Some(v4) = prefix.ipv4_prefix {
                records.push(v4);
            }
            if let Some(v6) = prefix.ipv6_prefix {
                records.push(v6);
            }
        }
        let networks = Self::parse_records(&records);
        let count = networks.len();
        info!(ranges = count, feed = %self.config.feed_url, "Crawler ranges refreshed");
        self.install(records.clone(), networks);

        // mirror best-effort for warm restarts
        if self.remote.is_active() {
            let data = records.join(", ");
            if let Err(e) = self
                .remote
                .set_string(STORE_KEY, &data, Duration::from_secs(self.config.refresh_secs))
                .await
            {
                warn!(error = %e, "Crawler range mirror failed");
            }
        }

        Ok(count)
    }

    /// Periodic refresher; a failed fetch keeps the previous snapshot and
    /// retries on the short backoff instead of the full period
    pub fn spawn_refresher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.restore_from_store().await;
            loop {
                let sleep_secs = match registry.refresh_once().await {
                    Ok(_) => registry.config.refresh_secs,
                    Err(e) => {
                        warn!(error = %e, "Crawler feed refresh failed, keeping previous snapshot");
                        registry.config.retry_backoff_secs
                    }
                };
                tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
            }
        })
    }
}
