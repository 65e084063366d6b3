//! Session store
//!
//! Issues and validates anonymous per-browser session identifiers. The sid
//! is not client-supplied entropy: it is a deterministic fingerprint,
//! `base64url(sha512(domain + ":" + nonce + ":" + user_agent))`, so
//! validation recomputes the hash from the stored nonce and the current
//! request and compares. The client IP is deliberately not part of the
//! fingerprint; sessions survive IP changes but not user-agent or domain
//! changes.

use crate::store::tiered::{CacheRecord, RemoteTier, TieredCache};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NONCE_LEN: usize = 32;

/// Persisted session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sid: String,
    pub nonce: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub domain: String,
}

impl CacheRecord for SessionRecord {
    fn cache_key(&self) -> &str {
        &self.sid
    }

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }
}

/// Tiered session store with a liveness-based access journal
pub struct SessionStore {
    cache: TieredCache<SessionRecord>,
    journal: DashMap<String, DateTime<Utc>>,
    ttl: chrono::Duration,
}

fn make_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

fn make_sid(domain: &str, nonce: &str, user_agent: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(domain.as_bytes());
    hasher.update(b":");
    hasher.update(nonce.as_bytes());
    hasher.update(b":");
    hasher.update(user_agent.as_bytes());
    URL_SAFE.encode(hasher.finalize())
}

impl SessionStore {
    pub fn new(remote: Arc<dyn RemoteTier>, ttl: Duration) -> Self {
        Self {
            cache: TieredCache::new("sessions", remote, ttl),
            journal: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    /// Issue a fresh record for a client without a valid session
    pub fn create(&self, ip: &str, domain: &str, user_agent: &str) -> SessionRecord {
        let nonce = make_nonce();
        let sid = make_sid(domain, &nonce, user_agent);
        let now = Utc::now();

        SessionRecord {
            sid,
            nonce,
            created: now,
            expires: now + self.ttl,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            domain: domain.to_string(),
        }
    }

    /// Tiered write (local now, remote mirror detached)
    pub fn store(&self, record: SessionRecord) {
        self.journal.insert(record.sid.clone(), Utc::now());
        self.cache.insert(record);
    }

    /// Tiered read; expired records are dropped from both tiers and never
    /// resurrected from the remote copy
    pub async fn lookup(&self, sid: &str) -> Option<SessionRecord> {
        match self.cache.get(sid).await {
            Some(record) => {
                self.journal.insert(sid.to_string(), Utc::now());
                Some(record)
            }
            None => {
                self.journal.remove(sid);
                None
            }
        }
    }

    /// Validate a client-supplied sid by recomputing the fingerprint from
    /// the stored nonce and the current request
    pub async fn validate(&self, provided_sid: &str, domain: &str, user_agent: &str) -> bool {
        let Some(record) = self.lookup(provided_sid).await else {
            return false;
        };
        let generated = make_sid(domain, &record.nonce, user_agent);
        provided_sid == generated
    }

    pub fn delete(&self, sid: &str) {
        self.journal.remove(sid);
        self.cache.remove(sid);
    }

    /// Evict sessions unused for longer than the session TTL, even when not
    /// technically expired yet
    pub fn sweep_unused(&self) {
        let cutoff = Utc::now() - self.ttl;
        let stale: Vec<String> = self
            .journal
            .iter()
            .filter(|entry| *entry.value() < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        if stale.is_empty() {
            return;
        }
        debug!(count = stale.len(), "Evicting unused sessions");
        for sid in stale {
            self.delete(&sid);
        }
    }

    /// Hourly journal sweep
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep_unused();
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn journal_len(&self) -> usize {
        self.journal.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tiered::RedisTier;
    use proxywall_common::redis::RedisHandle;

    fn store() -> SessionStore {
        let tier = RedisTier::new(RedisHandle::disabled(), "sessions");
        SessionStore::new(tier, Duration::from_secs(86_400))
    }

    #[test]
    fn test_nonce_shape() {
        let nonce = make_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(nonce, make_nonce());
    }

    #[test]
    fn test_sid_is_deterministic_fingerprint() {
        let a = make_sid("example.com", "nonce", "agent");
        let b = make_sid("example.com", "nonce", "agent");
        assert_eq!(a, b);
        // sha512 -> 64 bytes -> 88 base64url chars with padding
        assert_eq!(a.len(), 88);
        assert_ne!(a, make_sid("other.com", "nonce", "agent"));
        assert_ne!(a, make_sid("example.com", "nonce", "other agent"));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = store();
        let record = store.create("1.2.3.4", "example.com", "Mozilla/5.0");
        store.store(record.clone());

        let got = store.lookup(&record.sid).await.unwrap();
        assert_eq!(got.sid, record.sid);
        assert_eq!(got.nonce, record.nonce);
        assert_eq!(got.domain, "example.com");
    }

    #[tokio::test]
    async fn test_validate_after_store() {
        let store = store();
        let record = store.create("1.2.3.4", "example.com", "Mozilla/5.0");
        store.store(record.clone());

        assert!(store.validate(&record.sid, "example.com", "Mozilla/5.0").await);
    }

    #[tokio::test]
    async fn test_validate_survives_ip_change() {
        let store = store();
        let record = store.create("1.2.3.4", "example.com", "Mozilla/5.0");
        store.store(record.clone());

        // fingerprint does not cover the IP
        assert!(store.validate(&record.sid, "example.com", "Mozilla/5.0").await);
    }

    #[tokio::test]
    async fn test_validate_rejects_changed_user_agent() {
        let store = store();
        let record = store.create("1.2.3.4", "example.com", "Mozilla/5.0");
        store.store(record.clone());

        assert!(!store.validate(&record.sid, "example.com", "curl/8.0").await);
        assert!(!store.validate(&record.sid, "evil.com", "Mozilla/5.0").await);
    }

    #[tokio::test]
    async fn test_validate_unknown_sid_fails() {
        let store = store();
        assert!(!store.validate("bogus", "example.com", "Mozilla/5.0").await);
    }

    #[tokio::test]
    async fn test_expired_record_is_absent() {
        let store = store();
        let mut record = store.create("1.2.3.4", "example.com", "Mozilla/5.0");
        record.expires = Utc::now() - chrono::Duration::seconds(1);
        store.store(record.clone());

        assert!(store.lookup(&record.sid).await.is_none());
        assert!(!store.validate(&record.sid, "example.com", "Mozilla/5.0").await);
    }

    #[tokio::test]
    async fn test_sweep_evicts_unused_sessions() {
        let store = store();
        let record = store.create("1.2.3.4", "example.com", "Mozilla/5.0");
        let sid = record.sid.clone();
        store.store(record);

        // backdate the journal entry past the TTL
        store.journal.insert(sid.clone(), Utc::now() - chrono::Duration::hours(25));
        store.sweep_unused();

        assert_eq!(store.journal_len(), 0);
        assert!(store.lookup(&sid).await.is_none());
    }
}
