//! Prometheus metrics utilities

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static::lazy_static! {
    /// Request counter by final decision
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "proxywall_requests_total",
        "Total number of requests by final decision",
        &["decision"]
    ).unwrap();

    /// Per-filter verdict counter
    pub static ref FILTER_VERDICTS_TOTAL: CounterVec = register_counter_vec!(
        "proxywall_filter_verdicts_total",
        "Filter verdicts by filter name and action",
        &["filter", "action"]
    ).unwrap();

    /// Upstream forward duration histogram
    pub static ref FORWARD_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "proxywall_forward_duration_seconds",
        "Origin forward duration in seconds",
        &["status"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Cache tier operations counter
    pub static ref CACHE_OPERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "proxywall_cache_operations_total",
        "Cache operations by store, tier, operation and result",
        &["store", "tier", "operation", "result"]
    ).unwrap();

    /// Geo collaborator lookups counter
    pub static ref GEO_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "proxywall_geo_lookups_total",
        "Geo collaborator lookups by result",
        &["result"]
    ).unwrap();

    /// DoS penalties set counter
    pub static ref DOS_PENALTIES_TOTAL: CounterVec = register_counter_vec!(
        "proxywall_dos_penalties_total",
        "DoS penalties set",
        &["hostname"]
    ).unwrap();

    /// Sessions issued counter
    pub static ref SESSIONS_ISSUED_TOTAL: CounterVec = register_counter_vec!(
        "proxywall_sessions_issued_total",
        "New session records issued",
        &["domain"]
    ).unwrap();

    /// External store connectivity (1 = connected)
    pub static ref REDIS_CONNECTED: Gauge = register_gauge!(
        "proxywall_redis_connected",
        "Whether the external store liveness probe last succeeded"
    ).unwrap();

    /// Crawler network ranges currently loaded
    pub static ref BOT_NETWORKS_LOADED: Gauge = register_gauge!(
        "proxywall_bot_networks_loaded",
        "Number of crawler CIDR ranges currently loaded"
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_registered_metrics() {
        REQUESTS_TOTAL.with_label_values(&["forwarded"]).inc();
        let text = gather();
        assert!(text.contains("proxywall_requests_total"));
    }
}
