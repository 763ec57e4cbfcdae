//! Certificate lifecycle rules.
//!
//! Alert threshold and milestone cooldown, renewal detection between
//! consecutive snapshots, and organization-wide urgency tiers.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{Site, SslCheck};

/// Days-remaining milestones at which a repeat alert is justified. Each
/// crossing marks a meaningfully more urgent state of the same
/// certificate, ending at -1 (expired).
pub const EXPIRY_MILESTONES: [i64; 7] = [30, 14, 7, 3, 1, 0, -1];

/// The last expiry alert sent for a site's certificate.
#[derive(Debug, Clone, Copy)]
pub struct AlertState {
    pub sent_at: DateTime<Utc>,
    /// Days remaining at the moment that alert went out.
    pub days_remaining: i64,
}

/// Whether an expiry alert should fire now.
///
/// Fires when days-remaining is within the site's threshold and either no
/// alert has ever been sent, or the certificate has crossed a milestone
/// since the last one and at least a day has passed. Repeated checks on
/// the same day stay silent even at a milestone.
pub fn should_alert(
    days_remaining: i64,
    threshold_days: i64,
    last: Option<AlertState>,
    now: DateTime<Utc>,
) -> bool {
    if days_remaining > threshold_days {
        return false;
    }

    let Some(state) = last else {
        return true;
    };

    let crossed = EXPIRY_MILESTONES
        .iter()
        .any(|&m| state.days_remaining > m && days_remaining <= m);
    let cooled = now - state.sent_at >= Duration::days(1);

    crossed && cooled
}

/// Certificate change between two consecutive snapshots of one site.
#[derive(Debug, Clone, PartialEq)]
pub enum CertTransition {
    /// Serial number changed while both snapshots were valid.
    Renewed {
        old_expires_at: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
        days_extended: i64,
    },
    BecameValid,
    BecameInvalid,
}

/// Compare a fresh snapshot against its immediate predecessor.
///
/// A validity flip takes precedence over any serial change; renewal is
/// only recognized between two valid snapshots. The first snapshot ever
/// taken has nothing to compare against.
pub fn detect_transition(previous: Option<&SslCheck>, current: &SslCheck) -> Option<CertTransition> {
    let prev = previous?;

    match (prev.valid, current.valid) {
        (true, false) => Some(CertTransition::BecameInvalid),
        (false, true) => Some(CertTransition::BecameValid),
        (false, false) => None,
        (true, true) => {
            if prev.serial.as_deref()? == current.serial.as_deref()? {
                return None;
            }
            Some(CertTransition::Renewed {
                old_expires_at: prev.valid_to?,
                new_expires_at: current.valid_to?,
                days_extended: current.days_remaining? - prev.days_remaining?,
            })
        }
    }
}

/// Urgency bucket for a certificate by days remaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryTier {
    Expired,
    Critical,
    Warning,
    Healthy,
    Unknown,
}

/// Bucket boundaries: expired < 0, critical 0-6, warning 7-29,
/// healthy >= 30.
pub fn tier_for(days_remaining: Option<i64>) -> ExpiryTier {
    match days_remaining {
        None => ExpiryTier::Unknown,
        Some(d) if d < 0 => ExpiryTier::Expired,
        Some(d) if d <= 6 => ExpiryTier::Critical,
        Some(d) if d <= 29 => ExpiryTier::Warning,
        Some(_) => ExpiryTier::Healthy,
    }
}

/// Organization-wide certificate urgency counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetSummary {
    pub total: usize,
    pub expired: usize,
    pub critical: usize,
    pub warning: usize,
    pub healthy: usize,
    pub unknown: usize,
}

/// Bucket every TLS-monitored site by the expiry mirrored on its row.
/// Sites with TLS monitoring disabled are not counted at all.
pub fn summarize_fleet(sites: &[Site]) -> FleetSummary {
    let mut summary = FleetSummary::default();

    for site in sites.iter().filter(|s| s.ssl_monitoring) {
        summary.total += 1;
        match tier_for(site.ssl_days_remaining) {
            ExpiryTier::Expired => summary.expired += 1,
            ExpiryTier::Critical => summary.critical += 1,
            ExpiryTier::Warning => summary.warning += 1,
            ExpiryTier::Healthy => summary.healthy += 1,
            ExpiryTier::Unknown => summary.unknown += 1,
        }
    }

    summary
}
