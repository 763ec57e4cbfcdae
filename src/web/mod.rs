//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::monitor::Engine;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,
    pub scheduler: Arc<Scheduler>,
}

/// HTTP API server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        engine: Arc<Engine>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                engine,
                scheduler,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/status", get(handlers::handle_status))
            .route("/api/regions", get(handlers::handle_get_regions))
            // Sites
            .route("/api/sites", get(handlers::handle_get_sites))
            .route("/api/sites", post(handlers::handle_create_site))
            .route("/api/sites/{id}", get(handlers::handle_get_site))
            .route("/api/sites/{id}", put(handlers::handle_update_site))
            .route("/api/sites/{id}", delete(handlers::handle_delete_site))
            .route("/api/sites/{id}/check", post(handlers::handle_check_now))
            // History
            .route("/api/sites/{id}/checks", get(handlers::handle_get_checks))
            .route(
                "/api/sites/{id}/incidents",
                get(handlers::handle_get_incidents),
            )
            .route("/api/sites/{id}/ssl", get(handlers::handle_get_ssl))
            .route("/api/sites/{id}/dns", get(handlers::handle_get_dns))
            // Organization rollups
            .route(
                "/api/orgs/{org_id}/ssl-summary",
                get(handlers::handle_org_ssl_summary),
            )
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
