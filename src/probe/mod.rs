//! Outbound probes: HTTP liveness, TLS certificate inspection, DNS
//! snapshots.

mod dns;
mod http;
mod tls;

pub use dns::*;
pub use http::*;
pub use tls::*;

use std::time::Duration;
use thiserror::Error;

use crate::db::SiteStatus;

/// Probe error types.
///
/// The HTTP liveness probe never surfaces these; it folds every failure
/// into an offline [`Verdict`]. TLS and DNS probes return them so callers
/// can distinguish "could not inspect" from "inspected and found broken".
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Classified outcome of one liveness probe.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub status: SiteStatus,
    pub latency_ms: f64,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

impl Verdict {
    pub fn offline(latency_ms: f64, error: impl Into<String>) -> Self {
        Self {
            status: SiteStatus::Offline,
            latency_ms,
            http_status: None,
            error: Some(error.into()),
        }
    }
}

/// Classify a completed HTTP response.
///
/// 2xx/3xx at or under the slow threshold is online; 2xx/3xx above it is
/// degraded; anything else is offline.
pub fn classify_response(http_status: u16, latency_ms: f64, slow_threshold_ms: f64) -> Verdict {
    if !(200..400).contains(&http_status) {
        return Verdict {
            status: SiteStatus::Offline,
            latency_ms,
            http_status: Some(http_status),
            error: Some(format!("HTTP status {}", http_status)),
        };
    }

    let status = if latency_ms > slow_threshold_ms {
        SiteStatus::Degraded
    } else {
        SiteStatus::Online
    };

    Verdict {
        status,
        latency_ms,
        http_status: Some(http_status),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_fast_success() {
        let v = classify_response(200, 120.0, 5000.0);
        assert_eq!(v.status, SiteStatus::Online);
        assert_eq!(v.http_status, Some(200));
        assert!(v.error.is_none());
    }

    #[test]
    fn test_classify_redirect_is_online() {
        let v = classify_response(301, 80.0, 5000.0);
        assert_eq!(v.status, SiteStatus::Online);
    }

    #[test]
    fn test_classify_slow_success_is_degraded() {
        let v = classify_response(200, 5000.1, 5000.0);
        assert_eq!(v.status, SiteStatus::Degraded);
        assert!(v.error.is_none());

        let v = classify_response(204, 7200.0, 5000.0);
        assert_eq!(v.status, SiteStatus::Degraded);
    }

    #[test]
    fn test_classify_at_threshold_is_still_online() {
        // The boundary belongs to online; only strictly slower degrades.
        let v = classify_response(200, 5000.0, 5000.0);
        assert_eq!(v.status, SiteStatus::Online);
    }

    #[test]
    fn test_classify_error_status_is_offline() {
        for code in [400, 404, 500, 503] {
            let v = classify_response(code, 50.0, 5000.0);
            assert_eq!(v.status, SiteStatus::Offline);
            assert_eq!(v.http_status, Some(code));
            assert_eq!(v.error.as_deref(), Some(format!("HTTP status {}", code).as_str()));
        }
    }

    #[test]
    fn test_offline_constructor() {
        let v = Verdict::offline(10000.0, "connect timeout");
        assert_eq!(v.status, SiteStatus::Offline);
        assert!(v.http_status.is_none());
        assert_eq!(v.error.as_deref(), Some("connect timeout"));
    }
}
