//! Incident planning.
//!
//! A pure function of (previous status, fresh verdict) decides what to do
//! with the site's open incident, if any. All persistence happens in the
//! engine, which makes the transition table directly testable.

use crate::db::{Severity, SiteStatus};
use crate::probe::Verdict;

/// What the engine should do to the site's incident state.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentAction {
    None,
    Open { severity: Severity, summary: String },
    Update { severity: Severity, summary: String },
    Resolve,
}

/// Decide the incident action for one status transition.
///
/// Unknown counts as healthy so the very first check of a failing site
/// opens an incident. Maintenance suppresses incident handling entirely.
pub fn plan(previous: SiteStatus, verdict: &Verdict) -> IncidentAction {
    if previous == SiteStatus::Maintenance {
        return IncidentAction::None;
    }

    let was_unhealthy = matches!(previous, SiteStatus::Offline | SiteStatus::Degraded);

    match (was_unhealthy, verdict.status.is_up()) {
        (false, true) => IncidentAction::None,
        (false, false) => IncidentAction::Open {
            severity: severity_for(verdict.status),
            summary: summarize(verdict),
        },
        (true, false) => IncidentAction::Update {
            severity: severity_for(verdict.status),
            summary: summarize(verdict),
        },
        (true, true) => IncidentAction::Resolve,
    }
}

/// Outage severity: a site that is down outranks a site that is slow.
pub fn severity_for(status: SiteStatus) -> Severity {
    match status {
        SiteStatus::Offline => Severity::High,
        _ => Severity::Medium,
    }
}

/// Human-readable one-liner for the incident record.
pub fn summarize(verdict: &Verdict) -> String {
    match verdict.status {
        SiteStatus::Offline => format!(
            "Site is offline: {}",
            verdict.error.as_deref().unwrap_or("no response")
        ),
        SiteStatus::Degraded => format!(
            "Site is degraded: response time {:.0} ms",
            verdict.latency_ms
        ),
        other => format!("Site is {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(status: SiteStatus) -> Verdict {
        Verdict {
            status,
            latency_ms: 6200.0,
            http_status: None,
            error: Some("connection refused".to_string()),
        }
    }

    #[test]
    fn test_healthy_to_healthy_does_nothing() {
        assert_eq!(
            plan(SiteStatus::Online, &verdict(SiteStatus::Online)),
            IncidentAction::None
        );
        assert_eq!(
            plan(SiteStatus::Unknown, &verdict(SiteStatus::Online)),
            IncidentAction::None
        );
    }

    #[test]
    fn test_healthy_to_offline_opens_high() {
        let action = plan(SiteStatus::Online, &verdict(SiteStatus::Offline));
        match action {
            IncidentAction::Open { severity, summary } => {
                assert_eq!(severity, Severity::High);
                assert!(summary.contains("connection refused"));
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_healthy_to_degraded_opens_medium() {
        let action = plan(SiteStatus::Online, &verdict(SiteStatus::Degraded));
        match action {
            IncidentAction::Open { severity, summary } => {
                assert_eq!(severity, Severity::Medium);
                assert!(summary.contains("6200 ms"));
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_first_check_of_failing_site_opens() {
        assert!(matches!(
            plan(SiteStatus::Unknown, &verdict(SiteStatus::Offline)),
            IncidentAction::Open { .. }
        ));
    }

    #[test]
    fn test_unhealthy_to_unhealthy_updates() {
        // Degraded worsening to offline escalates severity in place.
        let action = plan(SiteStatus::Degraded, &verdict(SiteStatus::Offline));
        assert!(matches!(
            action,
            IncidentAction::Update {
                severity: Severity::High,
                ..
            }
        ));

        // Offline easing to degraded de-escalates, still one incident.
        let action = plan(SiteStatus::Offline, &verdict(SiteStatus::Degraded));
        assert!(matches!(
            action,
            IncidentAction::Update {
                severity: Severity::Medium,
                ..
            }
        ));
    }

    #[test]
    fn test_unhealthy_to_healthy_resolves() {
        assert_eq!(
            plan(SiteStatus::Offline, &verdict(SiteStatus::Online)),
            IncidentAction::Resolve
        );
        assert_eq!(
            plan(SiteStatus::Degraded, &verdict(SiteStatus::Online)),
            IncidentAction::Resolve
        );
    }

    #[test]
    fn test_maintenance_suppresses_incidents() {
        assert_eq!(
            plan(SiteStatus::Maintenance, &verdict(SiteStatus::Offline)),
            IncidentAction::None
        );
        assert_eq!(
            plan(SiteStatus::Maintenance, &verdict(SiteStatus::Online)),
            IncidentAction::None
        );
    }

    #[test]
    fn test_offline_summary_without_error_detail() {
        let v = Verdict {
            status: SiteStatus::Offline,
            latency_ms: 0.0,
            http_status: None,
            error: None,
        };
        assert_eq!(summarize(&v), "Site is offline: no response");
    }
}
