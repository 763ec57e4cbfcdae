//! Database model types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability status of a monitored site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Online,
    Offline,
    Degraded,
    Maintenance,
    Unknown,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Online => "online",
            SiteStatus::Offline => "offline",
            SiteStatus::Degraded => "degraded",
            SiteStatus::Maintenance => "maintenance",
            SiteStatus::Unknown => "unknown",
        }
    }

    /// Parse a stored status string; unrecognized values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => SiteStatus::Online,
            "offline" => SiteStatus::Offline,
            "degraded" => SiteStatus::Degraded,
            "maintenance" => SiteStatus::Maintenance,
            _ => SiteStatus::Unknown,
        }
    }

    /// Whether the site answered at all. Degraded counts as up: the site
    /// responded, just slowly.
    pub fn is_up(&self) -> bool {
        matches!(self, SiteStatus::Online | SiteStatus::Degraded)
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Investigating,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "resolved" => IncidentStatus::Resolved,
            _ => IncidentStatus::Investigating,
        }
    }
}

/// Incident severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub check_interval_secs: i64,
    pub status: SiteStatus,
    /// Rolling uptime percentage over the trailing window, in [0, 100].
    pub uptime: f64,
    /// Exponentially smoothed response time in milliseconds; 0 until the
    /// first successful probe seeds it.
    pub avg_latency_ms: f64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub ssl_monitoring: bool,
    /// Days-remaining threshold below which expiry alerts are considered.
    pub ssl_alert_days: i64,
    pub ssl_last_alert_at: Option<DateTime<Utc>>,
    /// Days remaining at the time the last expiry alert was sent.
    pub ssl_last_alert_days: Option<i64>,
    // Mirrored summary of the latest certificate inspection, refreshed at
    // most once an hour.
    pub ssl_valid: Option<bool>,
    pub ssl_days_remaining: Option<i64>,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    pub ssl_checked_at: Option<DateTime<Utc>>,
    /// Vantage points to probe from; empty means a single local probe.
    pub regions: Vec<String>,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            id: 0,
            org_id: 0,
            name: String::new(),
            url: String::new(),
            enabled: true,
            check_interval_secs: 300,
            status: SiteStatus::Unknown,
            uptime: 100.0,
            avg_latency_ms: 0.0,
            last_checked_at: None,
            ssl_monitoring: true,
            ssl_alert_days: 30,
            ssl_last_alert_at: None,
            ssl_last_alert_days: None,
            ssl_valid: None,
            ssl_days_remaining: None,
            ssl_expires_at: None,
            ssl_checked_at: None,
            regions: Vec::new(),
        }
    }
}

/// One immutable probe fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: i64,
    pub site_id: i64,
    pub status: SiteStatus,
    pub latency_ms: f64,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    /// Vantage point the probe ran from, when part of a multi-region run.
    pub region: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A tracked period of unhealthy status for a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub site_id: i64,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub resolved_by: Option<String>,
}

/// Historical snapshot of one TLS certificate inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslCheck {
    pub id: i64,
    pub site_id: i64,
    pub org_id: i64,
    pub valid: bool,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub serial: Option<String>,
    pub fingerprint: Option<String>,
    pub signature_algorithm: Option<String>,
    pub self_signed: Option<bool>,
    pub server_auth: Option<bool>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Resolved DNS records keyed by record type, values sorted for stable
/// comparison between snapshots.
pub type DnsSnapshot = BTreeMap<String, Vec<String>>;

/// Historical snapshot of one DNS resolution, diffed against its
/// predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsCheck {
    pub id: i64,
    pub site_id: i64,
    pub records: DnsSnapshot,
    pub changed: bool,
    pub diff: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_status_round_trip() {
        for status in [
            SiteStatus::Online,
            SiteStatus::Offline,
            SiteStatus::Degraded,
            SiteStatus::Maintenance,
            SiteStatus::Unknown,
        ] {
            assert_eq!(SiteStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_site_status_unrecognized_maps_to_unknown() {
        assert_eq!(SiteStatus::parse("exploded"), SiteStatus::Unknown);
        assert_eq!(SiteStatus::parse(""), SiteStatus::Unknown);
    }

    #[test]
    fn test_is_up() {
        assert!(SiteStatus::Online.is_up());
        assert!(SiteStatus::Degraded.is_up());
        assert!(!SiteStatus::Offline.is_up());
        assert!(!SiteStatus::Maintenance.is_up());
        assert!(!SiteStatus::Unknown.is_up());
    }

    #[test]
    fn test_severity_round_trip() {
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::parse(severity.as_str()), severity);
        }
    }
}
