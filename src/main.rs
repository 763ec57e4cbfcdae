//! SiteWatch - Website Health Monitoring Daemon
//!
//! Probes registered sites on their schedules, tracks uptime and latency,
//! drives the incident lifecycle, and watches TLS certificates and DNS
//! records for drift.

mod config;
mod db;
mod monitor;
mod notify;
mod probe;
mod region;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use monitor::Engine;
use notify::Dispatcher;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sitewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting SiteWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Wire up notifications, the check engine, and the scheduler
    let dispatcher = Arc::new(Dispatcher::from_config(&cfg));
    let engine = Arc::new(Engine::new(cfg.clone(), store.clone(), dispatcher));
    let scheduler = Arc::new(Scheduler::new(&cfg, store.clone(), engine.clone()));

    // Start watching every enabled site
    scheduler.start().await?;

    // Start web server
    let server = Server::new(cfg, store, engine, scheduler);
    server.start().await?;

    Ok(())
}
