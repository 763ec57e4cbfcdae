//! Retention sweeper for pruning old history.

use crate::db::Store;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Deletes check, SSL, and DNS history past the retention period.
pub struct RetentionSweeper {
    store: Arc<Store>,
    retention_days: i64,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<Store>, retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background sweep task. Sweeps immediately, then hourly.
    pub fn start(&self) {
        let store = self.store.clone();
        let retention_days = self.retention_days;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(Duration::from_secs(3600));

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        sweep(&store, retention_days);
                    }
                }
            }
        });
    }

    /// Stop the sweeper.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn sweep(store: &Store, retention_days: i64) {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);

    match store.delete_checks_before(cutoff) {
        Ok(n) if n > 0 => tracing::info!("Retention: pruned {} check rows", n),
        Ok(_) => {}
        Err(e) => tracing::error!("Retention: failed to prune checks: {}", e),
    }

    match store.delete_ssl_checks_before(cutoff) {
        Ok(n) if n > 0 => tracing::info!("Retention: pruned {} SSL check rows", n),
        Ok(_) => {}
        Err(e) => tracing::error!("Retention: failed to prune SSL checks: {}", e),
    }

    match store.delete_dns_checks_before(cutoff) {
        Ok(n) if n > 0 => tracing::info!("Retention: pruned {} DNS check rows", n),
        Ok(_) => {}
        Err(e) => tracing::error!("Retention: failed to prune DNS checks: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Check, DnsCheck, DnsSnapshot, Site, SiteStatus, SslCheck};
    use tempfile::NamedTempFile;

    #[test]
    fn test_sweep_prunes_only_expired_history() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut site = Site {
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        store.add_site(&mut site).unwrap();

        let now = Utc::now();
        for days_ago in [1_i64, 120] {
            let at = now - ChronoDuration::days(days_ago);
            store
                .add_check(&Check {
                    id: 0,
                    site_id: site.id,
                    status: SiteStatus::Online,
                    latency_ms: 10.0,
                    http_status: Some(200),
                    error: None,
                    region: None,
                    checked_at: at,
                })
                .unwrap();
            store
                .add_ssl_check(&SslCheck {
                    id: 0,
                    site_id: site.id,
                    org_id: site.org_id,
                    valid: true,
                    issuer: None,
                    subject: None,
                    valid_from: None,
                    valid_to: None,
                    days_remaining: Some(30),
                    serial: None,
                    fingerprint: None,
                    signature_algorithm: None,
                    self_signed: None,
                    server_auth: None,
                    error: None,
                    checked_at: at,
                })
                .unwrap();
            store
                .add_dns_check(&DnsCheck {
                    id: 0,
                    site_id: site.id,
                    records: DnsSnapshot::new(),
                    changed: false,
                    diff: None,
                    checked_at: at,
                })
                .unwrap();
        }

        sweep(&store, 90);

        let since = now - ChronoDuration::days(365);
        assert_eq!(store.get_checks_since(site.id, since, 100).unwrap().len(), 1);
        assert_eq!(store.get_ssl_checks(site.id, 100).unwrap().len(), 1);
        assert_eq!(store.get_dns_checks(site.id, 100).unwrap().len(), 1);
    }
}
