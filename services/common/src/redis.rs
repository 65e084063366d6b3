//! External store client
//!
//! One shared Redis handle is amortized across all caches. It carries two
//! flags: `enabled` (operator toggle) and `connected` (maintained by a
//! background liveness probe). Every call is bounded by a timeout so a dead
//! store degrades the caches to local-only instead of stalling requests.

use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::metrics;
use deadpool_redis::{redis, redis::AsyncCommands, Config as DeadpoolConfig, Pool, Runtime};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Create a Redis connection pool
pub fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let pool_size = config.effective_pool_size();
    info!(pool_size, url = %config.url, "Creating Redis connection pool");

    let cfg = DeadpoolConfig::from_url(&config.url);
    let pool = cfg
        .builder()
        .map_err(|e| Error::RedisPool(format!("Redis pool builder error: {}", e)))?
        .max_size(pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::RedisPool(format!("Redis pool build error: {}", e)))?;

    Ok(pool)
}

/// Shared handle to the external store
pub struct RedisHandle {
    pool: Option<Pool>,
    enabled: bool,
    connected: AtomicBool,
    call_timeout: Duration,
    probe_interval: Duration,
}

impl RedisHandle {
    /// Handle backed by a live pool
    pub fn new(pool: Pool, config: &RedisConfig) -> Arc<Self> {
        Arc::new(Self {
            pool: Some(pool),
            enabled: config.enabled,
            connected: AtomicBool::new(false),
            call_timeout: Duration::from_secs(config.timeout_secs),
            probe_interval: Duration::from_secs(config.probe_interval_secs),
        })
    }

    /// Handle with no external store configured; `is_active` is always false
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            pool: None,
            enabled: false,
            connected: AtomicBool::new(false),
            call_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(10),
        })
    }

    /// True when the operator enabled the store and the last probe succeeded
    pub fn is_active(&self) -> bool {
        self.enabled && self.pool.is_some() && self.connected.load(Ordering::Relaxed)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::RedisPool("no external store configured".to_string()))?;
        tokio::time::timeout(self.call_timeout, pool.get())
            .await
            .map_err(|_| Error::timeout("redis connection acquire"))?
            .map_err(|e| Error::RedisPool(format!("Redis connection error: {}", e)))
    }

    /// PING with the call timeout applied
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let cmd = redis::cmd("PING");
        let fut = cmd.query_async::<String>(&mut conn);
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout("redis ping"))??;
        Ok(())
    }

    /// Get a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection().await?;
        let fut = conn.get::<_, Option<String>>(key);
        let value = tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout("redis get"))??;

        match value {
            Some(v) => {
                let parsed: T = serde_json::from_str(&v)
                    .map_err(|e| Error::internal(format!("Cache deserialization error: {}", e)))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Set a JSON value with a TTL
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| Error::internal(format!("Cache serialization error: {}", e)))?;
        let mut conn = self.connection().await?;
        let fut = conn.set_ex::<_, _, ()>(key, json, ttl.as_secs());
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout("redis set"))??;
        Ok(())
    }

    /// Get a raw string value
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let fut = conn.get::<_, Option<String>>(key);
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout("redis get"))?
            .map_err(Error::from)
    }

    /// Set a raw string value with a TTL
    pub async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let fut = conn.set_ex::<_, _, ()>(key, value, ttl.as_secs());
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout("redis set"))??;
        Ok(())
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let fut = conn.del::<_, ()>(key);
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout("redis del"))??;
        Ok(())
    }

    /// Background liveness probe. Runs for the life of the process; state
    /// transitions are logged once per occurrence.
    pub fn spawn_probe(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(handle.probe_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !handle.enabled || handle.pool.is_none() {
                    continue;
                }
                let alive = handle.ping().await.is_ok();
                let was = handle.connected.swap(alive, Ordering::Relaxed);
                metrics::REDIS_CONNECTED.set(if alive { 1.0 } else { 0.0 });
                if alive && !was {
                    info!("External store reachable");
                } else if !alive && was {
                    warn!("External store unreachable, caches degrade to local-only");
                }
            }
        })
    }
}
