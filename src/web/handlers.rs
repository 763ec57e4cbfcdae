//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, DnsCheck, Site, SslCheck};
use crate::monitor::ssl::summarize_fleet;
use crate::monitor::{EngineError, Trigger};
use crate::region;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

// ============================================================================
// API: Status & regions
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sites: i64,
    pub by_status: BTreeMap<String, i64>,
    pub open_incidents: i64,
    pub db_size_bytes: i64,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let counts = state.store.count_sites_by_status().unwrap_or_default();
    let open_incidents = state.store.count_open_incidents().unwrap_or(0);
    let db_size_bytes = state.store.get_db_size_bytes().unwrap_or(0);

    let mut sites = 0;
    let mut by_status = BTreeMap::new();
    for (status, count) in counts {
        sites += count;
        by_status.insert(status.as_str().to_string(), count);
    }

    Json(StatusResponse {
        sites,
        by_status,
        open_incidents,
        db_size_bytes,
    })
}

pub async fn handle_get_regions() -> impl IntoResponse {
    Json(region::REGIONS)
}

// ============================================================================
// API: Sites
// ============================================================================

pub async fn handle_get_sites(
    State(state): State<AppState>,
    Query(query): Query<SitesQuery>,
) -> impl IntoResponse {
    let result = match query.org_id {
        Some(org_id) => state.store.get_sites_by_org(org_id),
        None => state.store.get_sites(),
    };

    match result {
        Ok(sites) => Json(sites).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SitesQuery {
    #[serde(default)]
    pub org_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub org_id: i64,
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub check_interval_secs: i64,
    #[serde(default = "default_true")]
    pub ssl_monitoring: bool,
    #[serde(default)]
    pub ssl_alert_days: i64,
    #[serde(default)]
    pub regions: Vec<String>,
}

pub async fn handle_create_site(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> impl IntoResponse {
    if let Err(msg) = validate_site_request(&req) {
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }

    let mut site = Site {
        org_id: req.org_id,
        name: req.name,
        url: req.url,
        enabled: req.enabled,
        check_interval_secs: req.check_interval_secs,
        ssl_monitoring: req.ssl_monitoring,
        ssl_alert_days: req.ssl_alert_days,
        regions: req.regions,
        ..Site::default()
    };

    match state.store.add_site(&mut site) {
        Ok(_) => {
            state.scheduler.watch(site.clone()).await;
            Json(site).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_site(id) {
        Ok(Some(site)) => Json(site).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Site not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_update_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CreateSiteRequest>,
) -> impl IntoResponse {
    if let Err(msg) = validate_site_request(&req) {
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }

    // Get existing site; monitoring state carries over untouched.
    let existing = match state.store.get_site(id) {
        Ok(Some(s)) => s,
        Ok(None) => return (StatusCode::NOT_FOUND, "Site not found").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let updated = Site {
        org_id: req.org_id,
        name: req.name,
        url: req.url,
        enabled: req.enabled,
        check_interval_secs: if req.check_interval_secs <= 0 {
            300
        } else {
            req.check_interval_secs
        },
        ssl_monitoring: req.ssl_monitoring,
        ssl_alert_days: if req.ssl_alert_days <= 0 {
            30
        } else {
            req.ssl_alert_days
        },
        regions: req.regions,
        ..existing
    };

    match state.store.update_site(&updated) {
        Ok(_) => {
            state.scheduler.rewatch(updated.clone()).await;
            Json(updated).into_response()
        }
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Site not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_delete_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    state.scheduler.unwatch(id).await;

    match state.store.delete_site(id) {
        Ok(_) => {
            state.engine.forget_site(id).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckNowRequest {
    #[serde(default)]
    pub requested_by: Option<String>,
}

pub async fn handle_check_now(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<CheckNowRequest>>,
) -> impl IntoResponse {
    let requested_by = body
        .and_then(|Json(req)| req.requested_by)
        .unwrap_or_else(|| "manual".to_string());

    match state
        .engine
        .run_check(id, Trigger::Manual { requested_by })
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(EngineError::SiteNotFound(_)) => {
            (StatusCode::NOT_FOUND, "Site not found").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn validate_site_request(req: &CreateSiteRequest) -> Result<(), String> {
    if req.name.trim().is_empty() {
        return Err("Name is required".to_string());
    }

    let url = Url::parse(&req.url).map_err(|e| format!("Invalid URL: {}", e))?;
    if !["http", "https"].contains(&url.scheme()) {
        return Err(format!("Unsupported URL scheme: {}", url.scheme()));
    }

    for r in &req.regions {
        if !region::REGIONS.contains(&r.as_str()) {
            return Err(format!("Unknown region: {}", r));
        }
    }

    Ok(())
}

fn default_true() -> bool {
    true
}

// ============================================================================
// API: Check history
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    #[serde(default)]
    pub hours: Option<i64>,
    #[serde(default)]
    pub sessions: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn handle_get_checks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ChecksQuery>,
) -> impl IntoResponse {
    let hours = query.hours.unwrap_or(24);
    let limit = query.limit.unwrap_or(1000);
    let since = Utc::now() - ChronoDuration::hours(hours);

    let checks = match state.store.get_checks_since(id, since, limit) {
        Ok(c) => c,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    if query.sessions.unwrap_or(false) {
        let sessions = region::group_sessions(checks, ChronoDuration::seconds(60));
        Json(sessions).into_response()
    } else {
        Json(checks).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn handle_get_incidents(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);

    match state.store.get_incidents(id, limit) {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct SslHistoryResponse {
    pub current: Option<SslCheck>,
    pub history: Vec<SslCheck>,
}

pub async fn handle_get_ssl(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let site = match state.store.get_site(id) {
        Ok(Some(s)) => s,
        Ok(None) => return (StatusCode::NOT_FOUND, "Site not found").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    // Refreshes only when the mirrored summary has gone stale; the engine
    // applies the recheck interval itself, under the site lock.
    if let Err(e) = state.engine.refresh_ssl(site.id, false).await {
        tracing::warn!("On-demand TLS inspection for {} failed: {}", site.name, e);
    }

    let limit = query.limit.unwrap_or(30);
    let current = match state.store.latest_ssl_check(id) {
        Ok(c) => c,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    match state.store.get_ssl_checks(id, limit) {
        Ok(history) => Json(SslHistoryResponse { current, history }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct DnsHistoryResponse {
    pub current: Option<DnsCheck>,
    pub history: Vec<DnsCheck>,
}

pub async fn handle_get_dns(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(30);

    let current = match state.store.latest_dns_check(id) {
        Ok(c) => c,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    match state.store.get_dns_checks(id, limit) {
        Ok(history) => Json(DnsHistoryResponse { current, history }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Organization rollups
// ============================================================================

pub async fn handle_org_ssl_summary(
    State(state): State<AppState>,
    Path(org_id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_sites_by_org(org_id) {
        Ok(sites) => Json(summarize_fleet(&sites)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
