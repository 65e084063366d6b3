//! DoS detection
//!
//! Per-hostname fixed-window request counters with time-boxed penalty
//! suppression. Crossing the threshold never rejects the current request;
//! it flags the hostname so the chain routes subsequent traffic into the
//! session checkpoint. While a penalty is live, scoring is suppressed
//! entirely (the debounce that avoids re-computation on every request of a
//! flood).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use proxywall_common::config::DosConfig;
use proxywall_common::metrics::DOS_PENALTIES_TOTAL;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Counter state for one hostname within the current sampling window
struct HostCounter {
    hits: AtomicU64,
    last_seen: AtomicI64,
}

/// Outcome of scoring one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosCheck {
    /// Under threshold, nothing to do
    Calm,
    /// A penalty is live for this hostname; scoring suppressed
    Suppressed,
    /// This request crossed the threshold and set a new penalty
    ThresholdCrossed { counter: u64, avg_per_second: u64 },
}

pub struct DosDetector {
    counters: DashMap<String, Arc<HostCounter>>,
    penalties: DashMap<String, DateTime<Utc>>,
    threshold: u64,
    window_secs: u64,
    penalty_lifetime: chrono::Duration,
}

impl DosDetector {
    pub fn new(config: &DosConfig) -> Arc<Self> {
        Arc::new(Self {
            counters: DashMap::new(),
            penalties: DashMap::new(),
            threshold: config.threshold.max(1),
            window_secs: config.sampling_window_secs.max(1),
            penalty_lifetime: chrono::Duration::seconds(config.penalty_secs as i64),
        })
    }

    fn counter_for(&self, hostname: &str) -> Arc<HostCounter> {
        if let Some(counter) = self.counters.get(hostname) {
            return Arc::clone(&counter);
        }
        // entry() re-checks existence under the shard write lock, so two
        // racing requests end up sharing one counter
        Arc::clone(
            self.counters
                .entry(hostname.to_string())
                .or_insert_with(|| {
                    Arc::new(HostCounter {
                        hits: AtomicU64::new(0),
                        last_seen: AtomicI64::new(Utc::now().timestamp()),
                    })
                })
                .value(),
        )
    }

    /// True while the hostname has a non-expired penalty
    pub fn penalized(&self, hostname: &str) -> bool {
        self.penalties
            .get(hostname)
            .map(|expires| *expires > Utc::now())
            .unwrap_or(false)
    }

    fn set_penalty(&self, hostname: &str) {
        self.penalties
            .insert(hostname.to_string(), Utc::now() + self.penalty_lifetime);
        DOS_PENALTIES_TOTAL.with_label_values(&[hostname]).inc();
    }

    /// Count this request and score the hostname
    pub fn check(&self, hostname: &str) -> DosCheck {
        let counter = self.counter_for(hostname);
        counter.last_seen.store(Utc::now().timestamp(), Ordering::Relaxed);
        let hits = counter.hits.fetch_add(1, Ordering::Relaxed) + 1;

        if self.penalized(hostname) {
            return DosCheck::Suppressed;
        }

        let avg_per_second = hits / self.window_secs;
        if avg_per_second > self.threshold {
            warn!(
                hostname,
                counter = hits,
                avg_per_second,
                threshold = self.threshold,
                "Request rate above threshold, penalizing hostname"
            );
            self.set_penalty(hostname);
            return DosCheck::ThresholdCrossed {
                counter: hits,
                avg_per_second,
            };
        }

        DosCheck::Calm
    }

    /// Window rollover: reset live counters, evict counters idle for more
    /// than two windows and penalties past their expiry
    pub fn sweep(&self) {
        let now = Utc::now();
        let stale_cutoff = now.timestamp() - (2 * self.window_secs) as i64;

        self.counters.retain(|_, counter| {
            if counter.last_seen.load(Ordering::Relaxed) < stale_cutoff {
                return false;
            }
            counter.hits.store(0, Ordering::Relaxed);
            true
        });

        self.penalties.retain(|_, expires| *expires > now);
    }

    /// Background sweep, one tick per sampling window
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let detector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(detector.window_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                detector.sweep();
            }
        })
    }

    #[cfg(test)]
    fn backdate_counter(&self, hostname: &str, secs: i64) {
        if let Some(counter) = self.counters.get(hostname) {
            counter
                .last_seen
                .store(Utc::now().timestamp() - secs, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    fn expire_penalty(&self, hostname: &str) {
        self.penalties
            .insert(hostname.to_string(), Utc::now() - chrono::Duration::seconds(1));
    }
}
