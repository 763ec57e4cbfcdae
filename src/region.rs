//! Multi-region probe orchestration.
//!
//! Fans one site check out across the selected vantage points, collects
//! every per-region outcome regardless of individual failures, and
//! reconciles them into a single verdict.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::db::{Check, SiteStatus};
use crate::probe::{self, Verdict};

/// Known vantage points.
pub const REGIONS: [&str; 6] = [
    "us-east",
    "us-west",
    "eu-west",
    "eu-central",
    "ap-southeast",
    "ap-northeast",
];

/// Vantage points used when a site selects only unknown ones.
pub const DEFAULT_REGIONS: [&str; 3] = ["us-east", "eu-west", "ap-southeast"];

/// Extra time granted to a region task beyond the probe's own timeout
/// before the orchestrator gives up on it.
const REGION_GRACE: Duration = Duration::from_secs(2);

/// One probe outcome for one vantage point within one orchestration run.
#[derive(Debug, Clone)]
pub struct RegionCheckResult {
    pub region: String,
    pub success: bool,
    pub status: SiteStatus,
    pub latency_ms: f64,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

/// Reconciled outcome of one multi-region run.
#[derive(Debug, Clone)]
pub struct RegionSummary {
    pub verdict: Verdict,
    pub results: Vec<RegionCheckResult>,
    pub fastest_region: Option<String>,
    pub slowest_region: Option<String>,
    /// Session timestamp shared by every check row from this run.
    pub checked_at: DateTime<Utc>,
}

/// Drop unknown regions from a selection, preserving order and removing
/// duplicates. Falls back to the default set when nothing valid remains.
pub fn validate_regions(selected: &[String]) -> Vec<String> {
    let mut valid: Vec<String> = Vec::new();
    for region in selected {
        if REGIONS.contains(&region.as_str()) && !valid.contains(region) {
            valid.push(region.clone());
        }
    }

    if valid.is_empty() {
        DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect()
    } else {
        valid
    }
}

/// Probe a URL from every selected region concurrently.
///
/// Each region runs as its own task with an independent timeout; a failed
/// or timed-out region becomes a failed result and never cancels its
/// siblings. Blocks until every region has reported or run out of time.
pub async fn orchestrate(
    url: &str,
    regions: &[String],
    timeout: Duration,
    slow_threshold_ms: f64,
    offline_ratio: f64,
) -> RegionSummary {
    let regions = validate_regions(regions);
    let checked_at = Utc::now();

    let mut tasks = Vec::with_capacity(regions.len());
    for region in regions {
        let url = url.to_string();
        let handle =
            tokio::spawn(async move { probe::check_site(&url, timeout, slow_threshold_ms).await });
        tasks.push((region, handle));
    }

    let results = collect_results(tasks, timeout + REGION_GRACE).await;
    reconcile(results, offline_ratio, checked_at)
}

/// Await every region task, waiting at most `wait` per task. A panicked
/// or abandoned task still yields a failed result tagged with its region.
async fn collect_results(
    tasks: Vec<(String, tokio::task::JoinHandle<Verdict>)>,
    wait: Duration,
) -> Vec<RegionCheckResult> {
    let mut results = Vec::with_capacity(tasks.len());
    for (region, task) in tasks {
        match tokio::time::timeout(wait, task).await {
            Ok(Ok(verdict)) => {
                results.push(RegionCheckResult {
                    region,
                    success: verdict.status.is_up(),
                    status: verdict.status,
                    latency_ms: verdict.latency_ms,
                    http_status: verdict.http_status,
                    error: verdict.error,
                });
            }
            Ok(Err(e)) => {
                tracing::error!("Region probe task for {} panicked: {}", region, e);
                results.push(failed_result(region, "probe task failed".to_string()));
            }
            Err(_) => {
                results.push(failed_result(
                    region,
                    format!("region probe exceeded {:?}", wait),
                ));
            }
        }
    }
    results
}

fn failed_result(region: String, error: String) -> RegionCheckResult {
    RegionCheckResult {
        region,
        success: false,
        status: SiteStatus::Offline,
        latency_ms: 0.0,
        http_status: None,
        error: Some(error),
    }
}

/// Reconcile per-region results into one verdict. Worst observation wins:
/// any region failure downgrades the run to at least degraded, and more
/// than `offline_ratio` of regions failing makes it offline. Latency is
/// averaged over successful regions only.
pub fn reconcile(
    results: Vec<RegionCheckResult>,
    offline_ratio: f64,
    checked_at: DateTime<Utc>,
) -> RegionSummary {
    if results.is_empty() {
        return RegionSummary {
            verdict: Verdict::offline(0.0, "no region produced a result"),
            results,
            fastest_region: None,
            slowest_region: None,
            checked_at,
        };
    }

    let total = results.len();
    let failed: Vec<&RegionCheckResult> = results.iter().filter(|r| !r.success).collect();
    let successes: Vec<&RegionCheckResult> = results.iter().filter(|r| r.success).collect();

    let avg_latency = if successes.is_empty() {
        0.0
    } else {
        successes.iter().map(|r| r.latency_ms).sum::<f64>() / successes.len() as f64
    };

    let fastest_region = successes
        .iter()
        .min_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms))
        .map(|r| r.region.clone());
    let slowest_region = successes
        .iter()
        .max_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms))
        .map(|r| r.region.clone());

    let verdict = if failed.is_empty() {
        // All regions answered; any slow region still drags the run down.
        let status = if results.iter().any(|r| r.status == SiteStatus::Degraded) {
            SiteStatus::Degraded
        } else {
            SiteStatus::Online
        };
        Verdict {
            status,
            latency_ms: avg_latency,
            http_status: None,
            error: None,
        }
    } else {
        let status = if failed.len() as f64 / total as f64 > offline_ratio {
            SiteStatus::Offline
        } else {
            SiteStatus::Degraded
        };
        let sample = failed[0]
            .error
            .clone()
            .unwrap_or_else(|| "unreachable".to_string());
        Verdict {
            status,
            latency_ms: avg_latency,
            http_status: None,
            error: Some(format!(
                "{} of {} regions failed ({}: {})",
                failed.len(),
                total,
                failed[0].region,
                sample
            )),
        }
    };

    RegionSummary {
        verdict,
        results,
        fastest_region,
        slowest_region,
        checked_at,
    }
}

/// Check rows grouped by proximity in time.
///
/// Multi-region runs persist one row per region sharing a timestamp; this
/// read-time grouping reassembles those rows (and closely spaced single
/// checks) into sessions. Never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CheckSession {
    pub started_at: DateTime<Utc>,
    pub checks: Vec<Check>,
}

/// Group checks (ordered oldest first) into sessions. A check belongs to
/// the current session while it falls within `window` of the session's
/// first check.
pub fn group_sessions(checks: Vec<Check>, window: ChronoDuration) -> Vec<CheckSession> {
    let mut sessions: Vec<CheckSession> = Vec::new();

    for check in checks {
        match sessions.last_mut() {
            Some(session) if check.checked_at - session.started_at <= window => {
                session.checks.push(check);
            }
            _ => sessions.push(CheckSession {
                started_at: check.checked_at,
                checks: vec![check],
            }),
        }
    }

    sessions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result(region: &str, latency_ms: f64) -> RegionCheckResult {
        RegionCheckResult {
            region: region.to_string(),
            success: true,
            status: SiteStatus::Online,
            latency_ms,
            http_status: Some(200),
            error: None,
        }
    }

    fn timeout_result(region: &str) -> RegionCheckResult {
        failed_result(region.to_string(), "timed out after 10s".to_string())
    }

    #[test]
    fn test_validate_regions_drops_unknown() {
        let selected = vec![
            "us-east".to_string(),
            "mars-north".to_string(),
            "eu-west".to_string(),
            "us-east".to_string(),
        ];
        assert_eq!(validate_regions(&selected), vec!["us-east", "eu-west"]);
    }

    #[test]
    fn test_validate_regions_falls_back_to_defaults() {
        assert_eq!(
            validate_regions(&["mars-north".to_string()]),
            DEFAULT_REGIONS.to_vec()
        );
        assert_eq!(validate_regions(&[]), DEFAULT_REGIONS.to_vec());
    }

    #[test]
    fn test_reconcile_minority_failure_is_degraded() {
        let now = Utc::now();
        let results = vec![
            ok_result("us-east", 100.0),
            timeout_result("eu-west"),
            ok_result("ap-southeast", 200.0),
        ];

        let summary = reconcile(results, 0.5, now);
        assert_eq!(summary.verdict.status, SiteStatus::Degraded);
        assert_eq!(summary.verdict.latency_ms, 150.0);
        assert_eq!(summary.fastest_region.as_deref(), Some("us-east"));
        assert_eq!(summary.slowest_region.as_deref(), Some("ap-southeast"));
        assert_eq!(summary.checked_at, now);
        assert!(summary.verdict.error.as_deref().unwrap().contains("1 of 3"));
    }

    #[test]
    fn test_reconcile_majority_failure_is_offline() {
        let results = vec![
            ok_result("us-east", 100.0),
            timeout_result("eu-west"),
            timeout_result("ap-southeast"),
        ];

        let summary = reconcile(results, 0.5, Utc::now());
        assert_eq!(summary.verdict.status, SiteStatus::Offline);
        // Latency still reflects the region that answered.
        assert_eq!(summary.verdict.latency_ms, 100.0);
    }

    #[test]
    fn test_reconcile_exactly_half_failed_stays_degraded() {
        let results = vec![ok_result("us-east", 80.0), timeout_result("eu-west")];
        let summary = reconcile(results, 0.5, Utc::now());
        assert_eq!(summary.verdict.status, SiteStatus::Degraded);
    }

    #[test]
    fn test_reconcile_all_failed() {
        let results = vec![timeout_result("us-east"), timeout_result("eu-west")];
        let summary = reconcile(results, 0.5, Utc::now());
        assert_eq!(summary.verdict.status, SiteStatus::Offline);
        assert_eq!(summary.verdict.latency_ms, 0.0);
        assert!(summary.fastest_region.is_none());
        assert!(summary.slowest_region.is_none());
    }

    #[test]
    fn test_reconcile_worst_status_wins_without_failures() {
        let mut slow = ok_result("eu-west", 6000.0);
        slow.status = SiteStatus::Degraded;
        let results = vec![ok_result("us-east", 100.0), slow];

        let summary = reconcile(results, 0.5, Utc::now());
        assert_eq!(summary.verdict.status, SiteStatus::Degraded);
        assert!(summary.verdict.error.is_none());
    }

    #[test]
    fn test_reconcile_all_online() {
        let results = vec![ok_result("us-east", 100.0), ok_result("eu-west", 140.0)];
        let summary = reconcile(results, 0.5, Utc::now());
        assert_eq!(summary.verdict.status, SiteStatus::Online);
        assert_eq!(summary.verdict.latency_ms, 120.0);
    }

    #[test]
    fn test_group_sessions_by_proximity() {
        let base = Utc::now();
        let mk = |secs: i64| Check {
            id: 0,
            site_id: 1,
            status: SiteStatus::Online,
            latency_ms: 100.0,
            http_status: Some(200),
            error: None,
            region: None,
            checked_at: base + ChronoDuration::seconds(secs),
        };

        // Three rows from one run, then a fresh run two minutes later.
        let checks = vec![mk(0), mk(0), mk(0), mk(120), mk(121)];
        let sessions = group_sessions(checks, ChronoDuration::seconds(60));

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].checks.len(), 3);
        assert_eq!(sessions[1].checks.len(), 2);
        assert_eq!(sessions[0].started_at, base);
    }

    #[test]
    fn test_group_sessions_window_anchored_to_first_check() {
        let base = Utc::now();
        let mk = |secs: i64| Check {
            id: 0,
            site_id: 1,
            status: SiteStatus::Online,
            latency_ms: 100.0,
            http_status: Some(200),
            error: None,
            region: None,
            checked_at: base + ChronoDuration::seconds(secs),
        };

        // 0s and 50s share a session; 90s is 40s after its predecessor but
        // past the window of the first check, so it starts a new session.
        let sessions = group_sessions(vec![mk(0), mk(50), mk(90)], ChronoDuration::seconds(60));
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].checks.len(), 1);
    }

    #[test]
    fn test_group_sessions_empty() {
        assert!(group_sessions(Vec::new(), ChronoDuration::seconds(60)).is_empty());
    }

    #[tokio::test]
    async fn test_collect_results_keeps_region_names_on_lost_tasks() {
        let panicked: tokio::task::JoinHandle<Verdict> =
            tokio::spawn(async { panic!("boom") });
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Verdict::offline(0.0, "never reached")
        });

        let results = collect_results(
            vec![
                ("us-east".to_string(), panicked),
                ("eu-west".to_string(), stuck),
            ],
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].region, "us-east");
        assert_eq!(results[1].region, "eu-west");
        assert!(results
            .iter()
            .all(|r| !r.success && r.status == SiteStatus::Offline));
    }

    #[tokio::test]
    async fn test_orchestrate_unreachable_host_fails_every_region() {
        let regions = vec!["us-east".to_string(), "eu-west".to_string()];
        let summary = orchestrate(
            "http://sitewatch-test.invalid",
            &regions,
            Duration::from_millis(500),
            5000.0,
            0.5,
        )
        .await;

        assert_eq!(summary.verdict.status, SiteStatus::Offline);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].region, "us-east");
        assert_eq!(summary.results[1].region, "eu-west");
        assert!(summary.results.iter().all(|r| !r.success));
    }
}
