//! Two-tier cache
//!
//! Local tier: a sharded concurrent map, authoritative for same-process
//! reads. Remote tier: the shared external store, optional and best-effort.
//! Reads promote remote hits into the local tier; writes land locally
//! synchronously and mirror to the remote tier as a detached task, so the
//! request path never blocks on network I/O. Expired records are deleted
//! from both tiers on access and are never resurrected from the remote
//! copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use proxywall_common::error::Result;
use proxywall_common::metrics::CACHE_OPERATIONS_TOTAL;
use proxywall_common::redis::RedisHandle;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A record that can live in a tiered cache
pub trait CacheRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Cache key the record is stored under
    fn cache_key(&self) -> &str;

    /// Expiry timestamp
    fn expires(&self) -> DateTime<Utc>;

    fn is_expired(&self) -> bool {
        self.expires() < Utc::now()
    }
}

/// Remote tier boundary. Values cross it as JSON so one implementation
/// serves every record type.
#[async_trait]
pub trait RemoteTier: Send + Sync + 'static {
    /// Whether remote calls should be attempted at all
    fn is_active(&self) -> bool;

    async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn store(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Remote tier backed by the shared Redis handle, one key prefix per store
pub struct RedisTier {
    handle: Arc<RedisHandle>,
    prefix: String,
}

impl RedisTier {
    pub fn new(handle: Arc<RedisHandle>, prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            handle,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.handle.get_json(&self.key(key)).await
    }

    async fn store(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<()> {
        self.handle.set_json(&self.key(key), &value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.handle.delete(&self.key(key)).await
    }
}

/// Generic two-tier cache
pub struct TieredCache<R: CacheRecord> {
    name: &'static str,
    local: DashMap<String, R>,
    remote: Arc<dyn RemoteTier>,
    remote_ttl: Duration,
}

impl<R: CacheRecord> TieredCache<R> {
    pub fn new(name: &'static str, remote: Arc<dyn RemoteTier>, remote_ttl: Duration) -> Self {
        Self {
            name,
            local: DashMap::new(),
            remote,
            remote_ttl,
        }
    }

    /// Read path: local tier, then remote tier with promotion
    pub async fn get(&self, key: &str) -> Option<R> {
        if let Some(record) = self.local.get(key).map(|r| r.clone()) {
            if !record.is_expired() {
                CACHE_OPERATIONS_TOTAL
                    .with_label_values(&[self.name, "local", "get", "hit"])
                    .inc();
                return Some(record);
            }
            // expired: drop from both tiers, treat as miss
            self.local.remove(key);
            self.remote_remove_detached(key);
        }

        if self.remote.is_active() {
            match self.remote.fetch(key).await {
                Ok(Some(value)) => match serde_json::from_value::<R>(value) {
                    Ok(record) if !record.is_expired() => {
                        CACHE_OPERATIONS_TOTAL
                            .with_label_values(&[self.name, "remote", "get", "hit"])
                            .inc();
                        self.local.insert(key.to_string(), record.clone());
                        return Some(record);
                    }
                    Ok(_) => self.remote_remove_detached(key),
                    Err(e) => {
                        debug!(store = self.name, key, error = %e, "Undecodable remote record");
                        self.remote_remove_detached(key);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    // remote failures degrade to local-only, never propagate
                    CACHE_OPERATIONS_TOTAL
                        .with_label_values(&[self.name, "remote", "get", "error"])
                        .inc();
                    debug!(store = self.name, key, error = %e, "Remote tier read failed");
                }
            }
        }

        CACHE_OPERATIONS_TOTAL
            .with_label_values(&[self.name, "local", "get", "miss"])
            .inc();
        None
    }

    /// Write path: local synchronously, remote as a detached mirror
    pub fn insert(&self, record: R) {
        let key = record.cache_key().to_string();
        self.local.insert(key.clone(), record.clone());

        if self.remote.is_active() {
            let remote = Arc::clone(&self.remote);
            let ttl = self.remote_ttl;
            let name = self.name;
            tokio::spawn(async move {
                let value = match serde_json::to_value(&record) {
                    Ok(v) => v,
                    Err(_) => return,
                };
                if let Err(e) = remote.store(&key, value, ttl).await {
                    CACHE_OPERATIONS_TOTAL
                        .with_label_values(&[name, "remote", "set", "error"])
                        .inc();
                    debug!(store = name, key, error = %e, "Remote tier mirror failed");
                }
            });
        }
    }

    /// Delete from both tiers (remote best-effort)
    pub fn remove(&self, key: &str) {
        self.local.remove(key);
        self.remote_remove_detached(key);
    }

    /// Number of records in the local tier
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    fn remote_remove_detached(&self, key: &str) {
        if !self.remote.is_active() {
            return;
        }
        let remote = Arc::clone(&self.remote);
        let key = key.to_string();
        let name = self.name;
        tokio::spawn(async move {
            if let Err(e) = remote.remove(&key).await {
                debug!(store = name, key, error = %e, "Remote tier delete failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestRecord {
        key: String,
        payload: u32,
        expires: DateTime<Utc>,
    }

    impl CacheRecord for TestRecord {
        fn cache_key(&self) -> &str {
            &self.key
        }

        fn expires(&self) -> DateTime<Utc> {
            self.expires
        }
    }

    fn record(key: &str, payload: u32, ttl_secs: i64) -> TestRecord {
        TestRecord {
            key: key.to_string(),
            payload,
            expires: Utc::now() + chrono::Duration::seconds(ttl_secs),
        }
    }

    fn local_only() -> TieredCache<TestRecord> {
        let tier = RedisTier::new(RedisHandle::disabled(), "test");
        TieredCache::new("test", tier, Duration::from_secs(60))
    }

    /// Remote tier that accepts everything and never expires or deletes
    /// anything, to prove expired records are not resurrected.
    struct ElephantTier {
        values: DashMap<String, serde_json::Value>,
    }

    #[async_trait]
    impl RemoteTier for ElephantTier {
        fn is_active(&self) -> bool {
            true
        }

        async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>> {
            Ok(self.values.get(key).map(|v| v.clone()))
        }

        async fn store(&self, key: &str, value: serde_json::Value, _ttl: Duration) -> Result<()> {
            self.values.insert(key.to_string(), value);
            Ok(())
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let cache = local_only();
        cache.insert(record("a", 7, 60));
        let got = cache.get("a").await.unwrap();
        assert_eq!(got.payload, 7);
    }

    #[tokio::test]
    async fn test_expired_record_is_a_miss() {
        let cache = local_only();
        cache.insert(record("a", 7, -1));
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.local_len(), 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = local_only();
        cache.insert(record("a", 7, 60));
        cache.remove("a");
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_remote_hit_is_promoted() {
        let tier = Arc::new(ElephantTier {
            values: DashMap::new(),
        });
        tier.values.insert(
            "a".to_string(),
            serde_json::to_value(record("a", 9, 60)).unwrap(),
        );

        let cache: TieredCache<TestRecord> = TieredCache::new("test", tier, Duration::from_secs(60));
        assert_eq!(cache.get("a").await.unwrap().payload, 9);
        assert_eq!(cache.local_len(), 1);
    }

    #[tokio::test]
    async fn test_expired_remote_record_is_not_resurrected() {
        let tier = Arc::new(ElephantTier {
            values: DashMap::new(),
        });
        tier.values.insert(
            "a".to_string(),
            serde_json::to_value(record("a", 9, -5)).unwrap(),
        );

        let cache: TieredCache<TestRecord> = TieredCache::new("test", tier, Duration::from_secs(60));
        assert!(cache.get("a").await.is_none());
        // the remote copy is still there (the tier forgets nothing), and a
        // second read must still refuse it
        assert!(cache.get("a").await.is_none());
    }
}
