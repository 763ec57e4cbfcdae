//! Configuration module for sitewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "sitewatch.db")
    pub db_path: String,
    /// Timeout for a single outbound probe, in seconds (default: 10)
    pub probe_timeout_secs: u64,
    /// Latency above which a successful response is classified as degraded,
    /// in milliseconds (default: 5000)
    pub slow_threshold_ms: f64,
    /// Trailing window for rolling uptime, in days (default: 30)
    pub uptime_window_days: i64,
    /// Fraction of failed regions above which a multi-region check is
    /// reconciled to offline rather than degraded (default: 0.5)
    pub offline_region_ratio: f64,
    /// Minimum seconds between TLS certificate inspections per site
    /// (default: 3600, so the mirrored summary is cached for up to an hour)
    pub ssl_recheck_secs: i64,
    /// Minimum seconds between DNS snapshots per site (default: 3600)
    pub dns_recheck_secs: i64,
    /// Days of check/SSL/DNS history to retain (default: 90)
    pub retention_days: i64,
    /// Maximum number of site checks running at once (default: 16)
    pub max_concurrent_checks: usize,
    /// Optional webhook URL to receive monitor events as JSON POSTs
    pub webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "sitewatch.db".to_string(),
            probe_timeout_secs: 10,
            slow_threshold_ms: 5000.0,
            uptime_window_days: 30,
            offline_region_ratio: 0.5,
            ssl_recheck_secs: 3600,
            dns_recheck_secs: 3600,
            retention_days: 90,
            max_concurrent_checks: 16,
            webhook_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `SITEWATCH_*` environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = read_env("SITEWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(db_path) = env::var("SITEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Some(secs) = read_env("SITEWATCH_PROBE_TIMEOUT_SECS") {
            cfg.probe_timeout_secs = secs;
        }
        if let Some(ms) = read_env("SITEWATCH_SLOW_THRESHOLD_MS") {
            cfg.slow_threshold_ms = ms;
        }
        if let Some(days) = read_env("SITEWATCH_UPTIME_WINDOW_DAYS") {
            cfg.uptime_window_days = days;
        }
        if let Some(ratio) = read_env("SITEWATCH_OFFLINE_REGION_RATIO") {
            cfg.offline_region_ratio = ratio;
        }
        if let Some(secs) = read_env("SITEWATCH_SSL_RECHECK_SECS") {
            cfg.ssl_recheck_secs = secs;
        }
        if let Some(secs) = read_env("SITEWATCH_DNS_RECHECK_SECS") {
            cfg.dns_recheck_secs = secs;
        }
        if let Some(days) = read_env("SITEWATCH_RETENTION_DAYS") {
            cfg.retention_days = days;
        }
        if let Some(n) = read_env("SITEWATCH_MAX_CONCURRENT_CHECKS") {
            cfg.max_concurrent_checks = n;
        }
        if let Ok(url) = env::var("SITEWATCH_WEBHOOK_URL") {
            if !url.is_empty() {
                cfg.webhook_url = Some(url);
            }
        }

        cfg
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
