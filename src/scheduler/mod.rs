//! Scheduler: drives periodic checks for enabled sites.

mod retention;

pub use retention::*;

use crate::config::ServerConfig;
use crate::db::{Site, Store};
use crate::monitor::{Engine, EngineError, Trigger};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock, Semaphore};

/// Runs one check loop per enabled site, bounded by a global concurrency
/// limit, plus the retention sweeper.
pub struct Scheduler {
    store: Arc<Store>,
    engine: Arc<Engine>,
    stop_chans: Arc<RwLock<HashMap<i64, broadcast::Sender<()>>>>,
    limiter: Arc<Semaphore>,
    retention: RetentionSweeper,
}

impl Scheduler {
    pub fn new(config: &ServerConfig, store: Arc<Store>, engine: Arc<Engine>) -> Self {
        Self {
            store: store.clone(),
            engine,
            stop_chans: Arc::new(RwLock::new(HashMap::new())),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_checks)),
            retention: RetentionSweeper::new(store, config.retention_days),
        }
    }

    /// Start watching every enabled site and kick off the retention
    /// sweeper.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sites = self.store.get_enabled_sites()?;

        tracing::info!("Starting scheduler with {} sites", sites.len());

        for site in sites {
            self.watch(site).await;
        }

        self.retention.start();

        Ok(())
    }

    /// Begin periodic checks for a site. No-op if already watched.
    pub async fn watch(&self, site: Site) {
        if !site.enabled {
            return;
        }

        let mut stop_chans = self.stop_chans.write().await;
        if stop_chans.contains_key(&site.id) {
            return;
        }

        let (stop_tx, _) = broadcast::channel(1);
        stop_chans.insert(site.id, stop_tx.clone());
        drop(stop_chans);

        tracing::info!(
            "Scheduler: watching {} every {}s",
            site.name,
            site.check_interval_secs
        );

        let engine = self.engine.clone();
        let limiter = self.limiter.clone();

        tokio::spawn(async move {
            run_check_loop(site, engine, limiter, stop_tx.subscribe()).await;
        });
    }

    /// Stop periodic checks for a site.
    pub async fn unwatch(&self, id: i64) {
        let mut stop_chans = self.stop_chans.write().await;

        if let Some(stop_tx) = stop_chans.remove(&id) {
            let _ = stop_tx.send(());
            tracing::info!("Scheduler: stopped watching site {}", id);
        }
    }

    /// Restart a site's loop after its configuration changed. A disabled
    /// site just stops.
    pub async fn rewatch(&self, site: Site) {
        self.unwatch(site.id).await;
        self.watch(site).await;
    }
}

/// The per-site check loop. Ticks at the site's interval until stopped;
/// ticks that would pile past the global concurrency limit are skipped.
async fn run_check_loop(
    site: Site,
    engine: Arc<Engine>,
    limiter: Arc<Semaphore>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let interval_secs = if site.check_interval_secs <= 0 {
        300
    } else {
        site.check_interval_secs as u64
    };

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                let permit = match limiter.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!("Skipping check for {}: concurrency limit reached", site.name);
                        continue;
                    }
                };

                let engine = engine.clone();
                let site_id = site.id;
                let site_name = site.name.clone();

                tokio::spawn(async move {
                    let _permit = permit;

                    // Jitter to avoid probing every site in lockstep.
                    let jitter = rand::random::<u64>() % 250;
                    tokio::time::sleep(Duration::from_millis(jitter)).await;

                    match engine.run_check(site_id, Trigger::Scheduled).await {
                        Ok(outcome) => {
                            tracing::debug!(
                                "Checked {}: {} ({:.0} ms)",
                                site_name,
                                outcome.status,
                                outcome.latency_ms
                            );
                        }
                        // Deleted while the check was in flight.
                        Err(EngineError::SiteNotFound(_)) => {}
                        Err(e) => {
                            tracing::error!("Check failed for {}: {}", site_name, e);
                        }
                    }
                });
            }
        }
    }
}
