//! HTTP liveness probe.

use std::time::{Duration, Instant};

use super::{classify_response, Verdict};

const USER_AGENT: &str = concat!("sitewatch/", env!("CARGO_PKG_VERSION"));

/// Probe a site once with a HEAD request and classify the outcome.
///
/// This never fails: every transport error (timeout, DNS failure,
/// connection refused, TLS error) is folded into an offline verdict with
/// a readable message, so callers always get a status to act on.
pub async fn check_site(url: &str, timeout: Duration, slow_threshold_ms: f64) -> Verdict {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
    {
        Ok(c) => c,
        Err(e) => return Verdict::offline(0.0, format!("client setup failed: {}", e)),
    };

    let start = Instant::now();
    let response = client.head(url).send().await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    match response {
        Ok(resp) => classify_response(resp.status().as_u16(), latency_ms, slow_threshold_ms),
        Err(e) if e.is_timeout() => Verdict::offline(
            latency_ms,
            format!("timed out after {:.0}s", timeout.as_secs_f64()),
        ),
        Err(e) => Verdict::offline(latency_ms, root_cause(&e)),
    }
}

/// reqwest nests the interesting cause (connection refused, DNS failure,
/// certificate problem) under a generic "error sending request" wrapper.
fn root_cause(e: &reqwest::Error) -> String {
    let mut cause: &dyn std::error::Error = e;
    while let Some(next) = cause.source() {
        cause = next;
    }
    cause.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SiteStatus;

    #[tokio::test]
    async fn test_unroutable_host_is_offline_not_error() {
        let v = check_site(
            "http://sitewatch-test.invalid",
            Duration::from_millis(500),
            5000.0,
        )
        .await;
        assert_eq!(v.status, SiteStatus::Offline);
        assert!(v.error.is_some());
        assert!(v.http_status.is_none());
    }

    #[tokio::test]
    async fn test_malformed_url_is_offline_not_error() {
        let v = check_site("not a url", Duration::from_millis(500), 5000.0).await;
        assert_eq!(v.status, SiteStatus::Offline);
        assert!(v.error.is_some());
    }
}
