//! Configuration management for proxywall services

use serde::Deserialize;
use std::env;

/// Top-level configuration for the firewall
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Origin the firewall proxies to
    #[serde(default)]
    pub origin: OriginConfig,

    /// Redis configuration; absent means local-only caches
    pub redis: Option<RedisConfig>,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Filter chain configuration
    #[serde(default)]
    pub firewall: FirewallConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Data-plane listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Internal admin listen address (health checks, metrics)
    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,

    /// Request timeout towards the origin, seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:80".to_string()
}

fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_request_timeout() -> u64 {
    600
}

/// Origin server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    /// host:port of the origin server
    #[serde(default = "default_origin")]
    pub address: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            address: default_origin(),
        }
    }
}

fn default_origin() -> String {
    "127.0.0.1:8008".to_string()
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,

    /// Operator toggle; when false the external tier is never used
    #[serde(default)]
    pub enabled: bool,

    /// Pool size; 0 means 4x CPU count with a floor of 10
    #[serde(default)]
    pub pool_size: usize,

    /// Per-call timeout in seconds
    #[serde(default = "default_redis_timeout")]
    pub timeout_secs: u64,

    /// Liveness probe period in seconds
    #[serde(default = "default_redis_probe")]
    pub probe_interval_secs: u64,
}

impl RedisConfig {
    /// Effective pool size (4x CPUs, minimum 10)
    pub fn effective_pool_size(&self) -> usize {
        if self.pool_size > 0 {
            return self.pool_size;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus * 4).max(10)
    }
}

fn default_redis_timeout() -> u64 {
    5
}

fn default_redis_probe() -> u64 {
    10
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path on the admin listener
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Filter chain configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FirewallConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub dos: DosConfig,

    #[serde(default)]
    pub ip_filter: IpFilterConfig,

    #[serde(default)]
    pub bots: BotFeedConfig,

    #[serde(default)]
    pub geoip: GeoIpConfig,
}

/// Session checkpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session cookie name
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            ttl_secs: default_session_ttl(),
        }
    }
}

fn default_cookie_name() -> String {
    "pw-sid".to_string()
}

fn default_session_ttl() -> u64 {
    86_400
}

/// DoS detector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DosConfig {
    /// Average requests per second per hostname before a penalty is set
    #[serde(default = "default_dos_threshold")]
    pub threshold: u64,

    /// Sampling window in seconds
    #[serde(default = "default_dos_window")]
    pub sampling_window_secs: u64,

    /// Penalty lifetime in seconds
    #[serde(default = "default_dos_penalty")]
    pub penalty_secs: u64,
}

impl Default for DosConfig {
    fn default() -> Self {
        Self {
            threshold: default_dos_threshold(),
            sampling_window_secs: default_dos_window(),
            penalty_secs: default_dos_penalty(),
        }
    }
}

fn default_dos_threshold() -> u64 {
    100
}

fn default_dos_window() -> u64 {
    10
}

fn default_dos_penalty() -> u64 {
    600
}

/// IP / country filter configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IpFilterConfig {
    /// Exact IP addresses that bypass all further filtering
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// CIDR ranges that bypass all further filtering
    #[serde(default)]
    pub cidr_whitelist: Vec<String>,

    /// ISO country codes allowed through without further filtering
    #[serde(default)]
    pub allowed_countries: Vec<String>,

    /// ISO country codes answered with 403 outright
    #[serde(default)]
    pub blocked_countries: Vec<String>,
}

/// Crawler IP feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BotFeedConfig {
    /// JSON feed of crawler CIDR prefixes
    #[serde(default = "default_bot_feed")]
    pub feed_url: String,

    /// Refresh period in seconds
    #[serde(default = "default_bot_refresh")]
    pub refresh_secs: u64,

    /// Retry backoff after a failed refresh, seconds
    #[serde(default = "default_bot_backoff")]
    pub retry_backoff_secs: u64,
}

impl Default for BotFeedConfig {
    fn default() -> Self {
        Self {
            feed_url: default_bot_feed(),
            refresh_secs: default_bot_refresh(),
            retry_backoff_secs: default_bot_backoff(),
        }
    }
}

fn default_bot_feed() -> String {
    "https://developers.google.com/static/search/apis/ipranges/googlebot.json".to_string()
}

fn default_bot_refresh() -> u64 {
    86_400
}

fn default_bot_backoff() -> u64 {
    300
}

/// GeoIP database configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeoIpConfig {
    /// Path to a MaxMind country database; absent means lookups always miss
    pub db_path: Option<String>,
}

impl Config {
    /// Load configuration from environment and files
    pub fn load(service_name: &str) -> Result<Self, config::ConfigError> {
        let environment = env::var("PROXYWALL_ENV").unwrap_or_else(|_| "development".to_string());

        let config_builder = config::Config::builder()
            // Start with default values
            .set_default("service_name", service_name)?
            .set_default("environment", environment.clone())?
            // Load from config directory
            .add_source(config::File::with_name(&format!("config/{}", service_name)).required(false))
            // Load environment-specific config
            .add_source(
                config::File::with_name(&format!("config/{}_{}", service_name, environment))
                    .required(false),
            )
            // Override with environment variables (prefix: PROXYWALL)
            .add_source(
                config::Environment::with_prefix("PROXYWALL")
                    .separator("__")
                    .try_parsing(true),
            );

        config_builder.build()?.try_deserialize()
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// True when the operator enabled the external store
    pub fn redis_enabled(&self) -> bool {
        self.redis.as_ref().map(|r| r.enabled).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.listen, "0.0.0.0:80");
        assert_eq!(server.admin_listen, "127.0.0.1:9090");

        let dos = DosConfig::default();
        assert_eq!(dos.threshold, 100);
        assert_eq!(dos.sampling_window_secs, 10);
        assert_eq!(dos.penalty_secs, 600);

        let session = SessionConfig::default();
        assert_eq!(session.cookie_name, "pw-sid");
        assert_eq!(session.ttl_secs, 86_400);
    }

    #[test]
    fn test_effective_pool_size_floor() {
        let redis = RedisConfig {
            url: "redis://localhost".into(),
            enabled: true,
            pool_size: 0,
            timeout_secs: 5,
            probe_interval_secs: 10,
        };
        assert!(redis.effective_pool_size() >= 10);

        let fixed = RedisConfig { pool_size: 4, ..redis };
        assert_eq!(fixed.effective_pool_size(), 4);
    }
}
