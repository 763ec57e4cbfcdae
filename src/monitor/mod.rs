//! Check engine.
//!
//! Runs the full check cycle for a site: probe (single or multi-region),
//! persist the facts, recompute metrics, drive the incident lifecycle,
//! and opportunistically refresh certificate and DNS snapshots. Cycles
//! for the same site are serialized through a per-site lock; different
//! sites never contend.

pub mod dns;
pub mod incident;
pub mod metrics;
pub mod ssl;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::db::{
    Check, DbError, DnsCheck, Incident, IncidentStatus, Site, SiteStatus, SslCheck, Store,
};
use crate::notify::{Dispatcher, Event};
use crate::probe::{self, TlsInspection, Verdict};
use crate::region;
use incident::IncidentAction;

/// Engine error types.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("site {0} not found")]
    SiteNotFound(i64),
}

/// What initiated a check cycle.
#[derive(Debug, Clone)]
pub enum Trigger {
    Scheduled,
    Manual { requested_by: String },
}

impl Trigger {
    /// Resolver identity recorded on incidents closed by this trigger.
    fn resolver(&self) -> Option<&str> {
        match self {
            Trigger::Scheduled => None,
            Trigger::Manual { requested_by } => Some(requested_by),
        }
    }
}

/// Result of one completed check cycle.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckOutcome {
    pub site_id: i64,
    pub previous_status: SiteStatus,
    pub status: SiteStatus,
    pub latency_ms: f64,
    pub uptime: f64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// The check engine. Shared by the scheduler and the web handlers.
pub struct Engine {
    config: ServerConfig,
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    site_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(config: ServerConfig, store: Arc<Store>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            store,
            dispatcher,
            site_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one full check cycle for a site: probe, commit, then refresh
    /// the certificate and DNS snapshots if they are stale.
    pub async fn run_check(
        &self,
        site_id: i64,
        trigger: Trigger,
    ) -> Result<CheckOutcome, EngineError> {
        let lock = self.site_lock(site_id).await;

        let (outcome, site_name) = {
            let _guard = lock.lock().await;

            // Re-read inside the lock so racing cycles observe each other's
            // writes instead of a stale previous status.
            let site = self
                .store
                .get_site(site_id)?
                .ok_or(EngineError::SiteNotFound(site_id))?;

            let timeout = Duration::from_secs(self.config.probe_timeout_secs);

            let (verdict, check_rows, checked_at) = if site.regions.is_empty() {
                let checked_at = Utc::now();
                let verdict =
                    probe::check_site(&site.url, timeout, self.config.slow_threshold_ms).await;
                let row = Check {
                    id: 0,
                    site_id: site.id,
                    status: verdict.status,
                    latency_ms: verdict.latency_ms,
                    http_status: verdict.http_status,
                    error: verdict.error.clone(),
                    region: None,
                    checked_at,
                };
                (verdict, vec![row], checked_at)
            } else {
                let summary = region::orchestrate(
                    &site.url,
                    &site.regions,
                    timeout,
                    self.config.slow_threshold_ms,
                    self.config.offline_region_ratio,
                )
                .await;
                let rows = summary
                    .results
                    .iter()
                    .map(|r| Check {
                        id: 0,
                        site_id: site.id,
                        status: r.status,
                        latency_ms: r.latency_ms,
                        http_status: r.http_status,
                        error: r.error.clone(),
                        region: Some(r.region.clone()),
                        checked_at: summary.checked_at,
                    })
                    .collect();
                (summary.verdict, rows, summary.checked_at)
            };

            let outcome = self
                .commit(&site, verdict, check_rows, checked_at, &trigger)
                .await?;
            (outcome, site.name)
        };

        // Certificate and DNS snapshots ride along on the check cycle.
        // They take the site lock themselves (it is not reentrant), so the
        // check guard must already be gone; their failures must never
        // disturb the verdict path.
        if let Err(e) = self.refresh_ssl(site_id, false).await {
            tracing::warn!("SSL refresh failed for {}: {}", site_name, e);
        }
        if let Err(e) = self.refresh_dns(site_id, false).await {
            tracing::warn!("DNS refresh failed for {}: {}", site_name, e);
        }

        Ok(outcome)
    }

    /// Feed an externally produced verdict through the engine, as if a
    /// probe had just returned it. Used by tests and by callers that run
    /// their own probes.
    pub async fn apply_verdict(
        &self,
        site_id: i64,
        verdict: Verdict,
        trigger: Trigger,
    ) -> Result<CheckOutcome, EngineError> {
        let lock = self.site_lock(site_id).await;
        let _guard = lock.lock().await;

        let site = self
            .store
            .get_site(site_id)?
            .ok_or(EngineError::SiteNotFound(site_id))?;

        let checked_at = Utc::now();
        let row = Check {
            id: 0,
            site_id: site.id,
            status: verdict.status,
            latency_ms: verdict.latency_ms,
            http_status: verdict.http_status,
            error: verdict.error.clone(),
            region: None,
            checked_at,
        };

        self.commit(&site, verdict, vec![row], checked_at, &trigger)
            .await
    }

    async fn site_lock(&self, site_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.site_locks.lock().await;
        locks
            .entry(site_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for a deleted site so the registry does not
    /// grow for the daemon's lifetime. A cycle still holding the old Arc
    /// finishes undisturbed.
    pub async fn forget_site(&self, site_id: i64) {
        self.site_locks.lock().await.remove(&site_id);
    }

    /// Persist one cycle's results. Caller holds the site lock.
    ///
    /// Write order is deliberate: check rows, then the user-facing site
    /// status and metrics, then incident bookkeeping. An incident write
    /// failure surfaces to the caller but the earlier writes stand.
    async fn commit(
        &self,
        site: &Site,
        verdict: Verdict,
        check_rows: Vec<Check>,
        checked_at: DateTime<Utc>,
        trigger: &Trigger,
    ) -> Result<CheckOutcome, EngineError> {
        self.store.add_checks(&check_rows)?;

        let since = checked_at - ChronoDuration::days(self.config.uptime_window_days);
        let (total, successful) = self.store.count_checks_in_window(site.id, since)?;
        let uptime = metrics::rolling_uptime(total, successful, verdict.status.is_up());

        // The latency average only ingests real responses; a dead site
        // keeps its last known latency rather than decaying toward zero.
        let avg_latency_ms = if verdict.status.is_up() {
            let previous = (site.avg_latency_ms > 0.0).then_some(site.avg_latency_ms);
            metrics::smooth_latency(previous, verdict.latency_ms)
        } else {
            site.avg_latency_ms
        };

        let previous = site.status;
        let status = if previous == SiteStatus::Maintenance {
            SiteStatus::Maintenance
        } else {
            verdict.status
        };

        self.store
            .update_site_status(site.id, status, uptime, avg_latency_ms, checked_at)?;

        if status != previous {
            self.dispatcher
                .publish(Event::StatusChanged {
                    site_id: site.id,
                    org_id: site.org_id,
                    site_name: site.name.clone(),
                    previous_status: previous,
                    status,
                    latency_ms: verdict.latency_ms,
                    error: verdict.error.clone(),
                    checked_at,
                })
                .await;
        }

        let action = incident::plan(previous, &verdict);
        let incident_result = self
            .apply_incident_action(site, action, checked_at, trigger)
            .await;

        let outcome = CheckOutcome {
            site_id: site.id,
            previous_status: previous,
            status,
            latency_ms: verdict.latency_ms,
            uptime,
            error: verdict.error,
            checked_at,
        };

        // Status and metrics are already durable at this point.
        incident_result?;

        Ok(outcome)
    }

    async fn apply_incident_action(
        &self,
        site: &Site,
        action: IncidentAction,
        now: DateTime<Utc>,
        trigger: &Trigger,
    ) -> Result<(), EngineError> {
        if action == IncidentAction::None {
            return Ok(());
        }

        let open = self.store.open_incident(site.id)?;

        match (action, open) {
            (
                IncidentAction::Open { severity, summary }
                | IncidentAction::Update { severity, summary },
                Some(mut existing),
            ) => {
                // Whatever the planner thought, an incident is already
                // open: refresh it in place, never open a second one.
                self.store
                    .update_open_incident(existing.id, severity, &summary)?;
                existing.severity = severity;
                existing.summary = summary;
                self.dispatcher
                    .publish(Event::IncidentUpdated {
                        org_id: site.org_id,
                        site_name: site.name.clone(),
                        incident: existing,
                    })
                    .await;
            }
            (
                IncidentAction::Open { severity, summary }
                | IncidentAction::Update { severity, summary },
                None,
            ) => {
                let mut incident = Incident {
                    id: 0,
                    site_id: site.id,
                    status: IncidentStatus::Investigating,
                    severity,
                    summary,
                    started_at: now,
                    ended_at: None,
                    duration_secs: None,
                    resolved_by: None,
                };
                self.store.create_incident(&mut incident)?;
                self.dispatcher
                    .publish(Event::IncidentOpened {
                        org_id: site.org_id,
                        site_name: site.name.clone(),
                        incident,
                    })
                    .await;
            }
            (IncidentAction::Resolve, Some(mut existing)) => {
                let duration_secs = (now - existing.started_at).num_seconds();
                self.store.resolve_incident(
                    existing.id,
                    now,
                    duration_secs,
                    trigger.resolver(),
                )?;
                existing.status = IncidentStatus::Resolved;
                existing.ended_at = Some(now);
                existing.duration_secs = Some(duration_secs);
                existing.resolved_by = trigger.resolver().map(|r| r.to_string());
                self.dispatcher
                    .publish(Event::IncidentResolved {
                        org_id: site.org_id,
                        site_name: site.name.clone(),
                        incident: existing,
                    })
                    .await;
            }
            // Nothing open to resolve; the previous status was stale.
            (IncidentAction::Resolve, None) => {}
            (IncidentAction::None, _) => {}
        }

        Ok(())
    }

    /// Inspect the site's certificate and record a snapshot, unless the
    /// last inspection is still fresh and `force` is off. Detects
    /// renewals and validity flips and fires expiry alerts under the
    /// milestone cooldown.
    ///
    /// Takes the site lock and re-reads the row inside it: the freshness
    /// gate and the alert cooldown live on that row, so overlapping
    /// callers serialize and the loser sees the winner's write.
    pub async fn refresh_ssl(&self, site_id: i64, force: bool) -> Result<(), EngineError> {
        let lock = self.site_lock(site_id).await;
        let _guard = lock.lock().await;

        let site = self
            .store
            .get_site(site_id)?
            .ok_or(EngineError::SiteNotFound(site_id))?;

        if !site.ssl_monitoring {
            return Ok(());
        }

        if !force {
            if let Some(checked_at) = site.ssl_checked_at {
                let age = Utc::now() - checked_at;
                if age < ChronoDuration::seconds(self.config.ssl_recheck_secs) {
                    return Ok(());
                }
            }
        }

        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let now = Utc::now();

        let row = match probe::inspect_certificate(&site.url, timeout).await {
            Ok(TlsInspection::NotApplicable { reason }) => {
                tracing::debug!("Skipping TLS inspection for {}: {}", site.name, reason);
                return Ok(());
            }
            Ok(TlsInspection::Report(info)) => SslCheck {
                id: 0,
                site_id: site.id,
                org_id: site.org_id,
                valid: info.valid,
                issuer: Some(info.issuer),
                subject: Some(info.subject),
                valid_from: Some(info.valid_from),
                valid_to: Some(info.valid_to),
                days_remaining: Some(info.days_remaining),
                serial: Some(info.serial),
                fingerprint: Some(info.fingerprint),
                signature_algorithm: Some(info.signature_algorithm),
                self_signed: Some(info.self_signed),
                server_auth: Some(info.server_auth),
                error: None,
                checked_at: now,
            },
            // Could not inspect at all: record the failure so history
            // shows the gap, with no certificate fields to compare.
            Err(e) => SslCheck {
                id: 0,
                site_id: site.id,
                org_id: site.org_id,
                valid: false,
                issuer: None,
                subject: None,
                valid_from: None,
                valid_to: None,
                days_remaining: None,
                serial: None,
                fingerprint: None,
                signature_algorithm: None,
                self_signed: None,
                server_auth: None,
                error: Some(e.to_string()),
                checked_at: now,
            },
        };

        let previous = self.store.latest_ssl_check(site.id)?;
        self.store.add_ssl_check(&row)?;
        self.store
            .update_ssl_summary(site.id, row.valid, row.days_remaining, row.valid_to, now)?;

        match ssl::detect_transition(previous.as_ref(), &row) {
            Some(ssl::CertTransition::Renewed {
                old_expires_at,
                new_expires_at,
                days_extended,
            }) => {
                self.dispatcher
                    .publish(Event::SslRenewed {
                        site_id: site.id,
                        org_id: site.org_id,
                        site_name: site.name.clone(),
                        old_expires_at,
                        new_expires_at,
                        days_extended,
                    })
                    .await;
            }
            Some(ssl::CertTransition::BecameValid) => {
                self.dispatcher
                    .publish(Event::SslValidityChanged {
                        site_id: site.id,
                        org_id: site.org_id,
                        site_name: site.name.clone(),
                        valid: true,
                    })
                    .await;
            }
            Some(ssl::CertTransition::BecameInvalid) => {
                self.dispatcher
                    .publish(Event::SslValidityChanged {
                        site_id: site.id,
                        org_id: site.org_id,
                        site_name: site.name.clone(),
                        valid: false,
                    })
                    .await;
            }
            None => {}
        }

        if let Some(days_remaining) = row.days_remaining {
            let last = match (site.ssl_last_alert_at, site.ssl_last_alert_days) {
                (Some(sent_at), Some(days)) => Some(ssl::AlertState {
                    sent_at,
                    days_remaining: days,
                }),
                _ => None,
            };

            if ssl::should_alert(days_remaining, site.ssl_alert_days, last, now) {
                self.dispatcher
                    .publish(Event::SslExpiring {
                        site_id: site.id,
                        org_id: site.org_id,
                        site_name: site.name.clone(),
                        days_remaining,
                        issuer: row.issuer.clone(),
                        expires_at: row.valid_to,
                    })
                    .await;
                self.store.update_ssl_alert_state(site.id, now, days_remaining)?;
            }
        }

        Ok(())
    }

    /// Snapshot the site's DNS records and diff against the previous
    /// snapshot, unless the last one is still fresh and `force` is off.
    /// Serialized under the site lock like every other per-site write.
    pub async fn refresh_dns(&self, site_id: i64, force: bool) -> Result<(), EngineError> {
        let lock = self.site_lock(site_id).await;
        let _guard = lock.lock().await;

        let site = self
            .store
            .get_site(site_id)?
            .ok_or(EngineError::SiteNotFound(site_id))?;

        let Some(host) = probe::snapshot_host(&site.url) else {
            return Ok(());
        };

        let previous = self.store.latest_dns_check(site.id)?;

        if !force {
            if let Some(prev) = &previous {
                let age = Utc::now() - prev.checked_at;
                if age < ChronoDuration::seconds(self.config.dns_recheck_secs) {
                    return Ok(());
                }
            }
        }

        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let records = match probe::snapshot(&host, timeout).await {
            Ok(r) => r,
            Err(e) => {
                // A resolver outage is not a zone change. Skip the
                // snapshot instead of recording one that would diff
                // noisily once resolution recovers.
                tracing::warn!("DNS snapshot failed for {}: {}", site.name, e);
                return Ok(());
            }
        };

        let diff = dns::diff_snapshots(previous.as_ref().map(|p| &p.records), &records);
        let row = DnsCheck {
            id: 0,
            site_id: site.id,
            records,
            changed: diff.changed,
            diff: (!diff.lines.is_empty()).then(|| diff.lines.join("\n")),
            checked_at: Utc::now(),
        };
        self.store.add_dns_check(&row)?;

        if diff.changed {
            self.dispatcher
                .publish(Event::DnsChanged {
                    site_id: site.id,
                    org_id: site.org_id,
                    site_name: site.name.clone(),
                    diff: diff.lines,
                    checked_at: row.checked_at,
                })
                .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Severity;
    use crate::notify::{Notifier, NotifyError};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::NamedTempFile;

    /// Notifier that records every event it sees.
    struct Recorder(Arc<StdMutex<Vec<Event>>>);

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Harness {
        _tmp: NamedTempFile,
        store: Arc<Store>,
        engine: Arc<Engine>,
        events: Arc<StdMutex<Vec<Event>>>,
    }

    fn harness() -> Harness {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let events = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::new(vec![Box::new(Recorder(events.clone()))]));
        let engine = Arc::new(Engine::new(
            ServerConfig::default(),
            store.clone(),
            dispatcher,
        ));
        Harness {
            _tmp: tmp,
            store,
            engine,
            events,
        }
    }

    fn add_site(store: &Store) -> Site {
        let mut site = Site {
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            org_id: 1,
            ssl_monitoring: false,
            ..Default::default()
        };
        store.add_site(&mut site).unwrap();
        site
    }

    fn online(latency_ms: f64) -> Verdict {
        Verdict {
            status: SiteStatus::Online,
            latency_ms,
            http_status: Some(200),
            error: None,
        }
    }

    fn offline(error: &str) -> Verdict {
        Verdict::offline(0.0, error)
    }

    fn degraded(latency_ms: f64) -> Verdict {
        Verdict {
            status: SiteStatus::Degraded,
            latency_ms,
            http_status: Some(200),
            error: None,
        }
    }

    fn event_names(events: &Arc<StdMutex<Vec<Event>>>) -> Vec<&'static str> {
        events
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                Event::StatusChanged { .. } => "status_changed",
                Event::IncidentOpened { .. } => "incident_opened",
                Event::IncidentUpdated { .. } => "incident_updated",
                Event::IncidentResolved { .. } => "incident_resolved",
                Event::SslExpiring { .. } => "ssl_expiring",
                Event::SslRenewed { .. } => "ssl_renewed",
                Event::SslValidityChanged { .. } => "ssl_validity_changed",
                Event::DnsChanged { .. } => "dns_changed",
            })
            .collect()
    }

    /// Loopback TLS endpoint serving a throwaway certificate that expires
    /// `days` from now. Returns the bound address.
    async fn spawn_tls_endpoint(days: i64) -> std::net::SocketAddr {
        use chrono::Datelike;
        use rcgen::{date_time_ymd, CertificateParams, KeyPair};
        use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

        let expires = Utc::now() + ChronoDuration::days(days);
        let mut params = CertificateParams::default();
        params.not_before = date_time_ymd(2020, 1, 1);
        params.not_after =
            date_time_ymd(expires.year(), expires.month() as u8, expires.day() as u8);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        )
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let _ = acceptor.accept(stream).await;
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_outage_lifecycle_produces_one_incident() {
        let h = harness();
        let site = add_site(&h.store);

        h.engine
            .apply_verdict(site.id, online(100.0), Trigger::Scheduled)
            .await
            .unwrap();
        h.engine
            .apply_verdict(site.id, offline("connection refused"), Trigger::Scheduled)
            .await
            .unwrap();
        h.engine
            .apply_verdict(site.id, online(110.0), Trigger::Scheduled)
            .await
            .unwrap();

        let incidents = h.store.get_incidents(site.id, 10).unwrap();
        assert_eq!(incidents.len(), 1);

        let incident = &incidents[0];
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert_eq!(incident.severity, Severity::High);
        assert!(incident.summary.contains("connection refused"));
        assert!(incident.resolved_by.is_none());

        let duration = incident.ended_at.unwrap() - incident.started_at;
        assert_eq!(incident.duration_secs, Some(duration.num_seconds()));

        assert_eq!(
            event_names(&h.events),
            vec![
                "status_changed", // unknown -> online
                "status_changed", // online -> offline
                "incident_opened",
                "status_changed", // offline -> online
                "incident_resolved",
            ]
        );
    }

    #[tokio::test]
    async fn test_degrading_outage_updates_single_incident() {
        let h = harness();
        let site = add_site(&h.store);

        h.engine
            .apply_verdict(site.id, online(100.0), Trigger::Scheduled)
            .await
            .unwrap();
        h.engine
            .apply_verdict(site.id, degraded(6000.0), Trigger::Scheduled)
            .await
            .unwrap();

        let open = h.store.open_incident(site.id).unwrap().unwrap();
        assert_eq!(open.severity, Severity::Medium);
        let opened_at = open.started_at;

        h.engine
            .apply_verdict(site.id, offline("timeout"), Trigger::Scheduled)
            .await
            .unwrap();

        let open = h.store.open_incident(site.id).unwrap().unwrap();
        assert_eq!(open.severity, Severity::High);
        assert_eq!(open.started_at, opened_at);
        assert!(open.summary.contains("timeout"));

        h.engine
            .apply_verdict(site.id, online(100.0), Trigger::Scheduled)
            .await
            .unwrap();

        assert!(h.store.open_incident(site.id).unwrap().is_none());
        assert_eq!(h.store.get_incidents(site.id, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_resolution_records_resolver() {
        let h = harness();
        let site = add_site(&h.store);

        h.engine
            .apply_verdict(site.id, offline("down"), Trigger::Scheduled)
            .await
            .unwrap();
        h.engine
            .apply_verdict(
                site.id,
                online(90.0),
                Trigger::Manual {
                    requested_by: "alice".to_string(),
                },
            )
            .await
            .unwrap();

        let incidents = h.store.get_incidents(site.id, 10).unwrap();
        assert_eq!(incidents[0].resolved_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_first_check_of_failing_site_opens_incident() {
        let h = harness();
        let site = add_site(&h.store);
        assert_eq!(site.status, SiteStatus::Unknown);

        let outcome = h
            .engine
            .apply_verdict(site.id, offline("refused"), Trigger::Scheduled)
            .await
            .unwrap();

        assert_eq!(outcome.previous_status, SiteStatus::Unknown);
        assert_eq!(outcome.status, SiteStatus::Offline);
        assert_eq!(outcome.uptime, 0.0);
        assert!(h.store.open_incident(site.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_maintenance_pins_status_and_suppresses_incidents() {
        let h = harness();
        let site = add_site(&h.store);
        h.store
            .update_site_status(site.id, SiteStatus::Maintenance, 100.0, 0.0, Utc::now())
            .unwrap();

        let outcome = h
            .engine
            .apply_verdict(site.id, offline("expected downtime"), Trigger::Scheduled)
            .await
            .unwrap();

        assert_eq!(outcome.status, SiteStatus::Maintenance);
        assert!(h.store.open_incident(site.id).unwrap().is_none());

        let fetched = h.store.get_site(site.id).unwrap().unwrap();
        assert_eq!(fetched.status, SiteStatus::Maintenance);
        // The probe fact is still recorded for history.
        assert!(h.store.latest_check(site.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latency_smoothing_through_engine() {
        let h = harness();
        let site = add_site(&h.store);

        h.engine
            .apply_verdict(site.id, online(100.0), Trigger::Scheduled)
            .await
            .unwrap();
        let fetched = h.store.get_site(site.id).unwrap().unwrap();
        assert_eq!(fetched.avg_latency_ms, 100.0);

        h.engine
            .apply_verdict(site.id, online(300.0), Trigger::Scheduled)
            .await
            .unwrap();
        let fetched = h.store.get_site(site.id).unwrap().unwrap();
        assert_eq!(fetched.avg_latency_ms, 140.0);

        // A dead probe leaves the average untouched.
        h.engine
            .apply_verdict(site.id, offline("down"), Trigger::Scheduled)
            .await
            .unwrap();
        let fetched = h.store.get_site(site.id).unwrap().unwrap();
        assert_eq!(fetched.avg_latency_ms, 140.0);
    }

    #[tokio::test]
    async fn test_uptime_reflects_window_counts() {
        let h = harness();
        let site = add_site(&h.store);

        h.engine
            .apply_verdict(site.id, online(100.0), Trigger::Scheduled)
            .await
            .unwrap();
        h.engine
            .apply_verdict(site.id, online(100.0), Trigger::Scheduled)
            .await
            .unwrap();
        h.engine
            .apply_verdict(site.id, offline("down"), Trigger::Scheduled)
            .await
            .unwrap();

        let fetched = h.store.get_site(site.id).unwrap().unwrap();
        // 2 of 3 checks answered: 66.67 after rounding.
        assert_eq!(fetched.uptime, 66.67);
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_exactly_one_incident() {
        let h = harness();
        let site = add_site(&h.store);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = h.engine.clone();
            let site_id = site.id;
            tasks.push(tokio::spawn(async move {
                engine
                    .apply_verdict(
                        site_id,
                        Verdict::offline(0.0, format!("failure {}", i)),
                        Trigger::Scheduled,
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(h.store.count_open_incidents().unwrap(), 1);
        assert_eq!(h.store.get_incidents(site.id, 50).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_multi_region_rows_share_session_timestamp() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let events = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::new(vec![Box::new(Recorder(events))]));
        let config = ServerConfig {
            probe_timeout_secs: 1,
            ..Default::default()
        };
        let engine = Engine::new(config, store.clone(), dispatcher);

        // TEST-NET address: never answers, and an IP literal means there
        // is no hostname for the DNS snapshot to chase.
        let mut site = Site {
            name: "Example".to_string(),
            url: "http://192.0.2.1/".to_string(),
            org_id: 1,
            ssl_monitoring: false,
            regions: vec!["us-east".to_string(), "eu-west".to_string()],
            ..Default::default()
        };
        store.add_site(&mut site).unwrap();

        let outcome = engine
            .run_check(site.id, Trigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(outcome.status, SiteStatus::Offline);

        let checks = store
            .get_checks_since(site.id, Utc::now() - ChronoDuration::hours(1), 10)
            .unwrap();
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.region.is_some()));
        assert_eq!(checks[0].checked_at, checks[1].checked_at);

        // Read-time grouping reassembles the run into one session.
        let sessions = region::group_sessions(checks, ChronoDuration::seconds(60));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].checks.len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_ssl_refreshes_inspect_once() {
        let addr = spawn_tls_endpoint(7).await;

        let h = harness();
        let mut site = Site {
            name: "Example".to_string(),
            url: format!("https://{}", addr),
            org_id: 1,
            ssl_monitoring: true,
            ssl_alert_days: 30,
            ..Default::default()
        };
        h.store.add_site(&mut site).unwrap();

        // Two unforced refreshes racing, as when overlapping API reads
        // both find the mirror stale.
        let first = tokio::spawn({
            let engine = h.engine.clone();
            let id = site.id;
            async move { engine.refresh_ssl(id, false).await }
        });
        let second = tokio::spawn({
            let engine = h.engine.clone();
            let id = site.id;
            async move { engine.refresh_ssl(id, false).await }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // The loser re-reads the row under the lock, finds a fresh
        // inspection, and honors the hour cache: one snapshot, one alert.
        assert_eq!(h.store.get_ssl_checks(site.id, 10).unwrap().len(), 1);
        let alerts = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::SslExpiring { .. }))
            .count();
        assert_eq!(alerts, 1);

        let fetched = h.store.get_site(site.id).unwrap().unwrap();
        assert!(fetched.ssl_checked_at.is_some());
        assert!(fetched.ssl_last_alert_at.is_some());
    }

    #[tokio::test]
    async fn test_deleting_a_site_evicts_its_lock_entry() {
        let h = harness();
        let site = add_site(&h.store);

        h.engine
            .apply_verdict(site.id, online(100.0), Trigger::Scheduled)
            .await
            .unwrap();
        assert!(h.engine.site_locks.lock().await.contains_key(&site.id));

        h.store.delete_site(site.id).unwrap();
        h.engine.forget_site(site.id).await;
        assert!(!h.engine.site_locks.lock().await.contains_key(&site.id));
    }

    #[tokio::test]
    async fn test_missing_site_is_reported() {
        let h = harness();
        let result = h
            .engine
            .apply_verdict(9999, online(10.0), Trigger::Scheduled)
            .await;
        assert!(matches!(result, Err(EngineError::SiteNotFound(9999))));
    }
}
