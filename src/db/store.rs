//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Sites ---

    /// Add a new site and return its ID.
    pub fn add_site(&self, site: &mut Site) -> Result<i64, DbError> {
        if site.check_interval_secs <= 0 {
            site.check_interval_secs = 300;
        }
        if site.ssl_alert_days <= 0 {
            site.ssl_alert_days = 30;
        }
        let regions = serde_json::to_string(&site.regions)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sites (org_id, name, url, enabled, check_interval_secs, status, uptime,
                                avg_latency_ms, ssl_monitoring, ssl_alert_days, regions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                site.org_id,
                site.name,
                site.url,
                site.enabled,
                site.check_interval_secs,
                site.status.as_str(),
                site.uptime,
                site.avg_latency_ms,
                site.ssl_monitoring,
                site.ssl_alert_days,
                regions,
            ],
        )?;
        let id = conn.last_insert_rowid();
        site.id = id;
        Ok(id)
    }

    /// Update a site's configuration fields. Monitoring state (status,
    /// metrics, SSL mirror) is written through the dedicated methods.
    pub fn update_site(&self, site: &Site) -> Result<(), DbError> {
        let interval = if site.check_interval_secs <= 0 {
            300
        } else {
            site.check_interval_secs
        };
        let regions = serde_json::to_string(&site.regions)?;

        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE sites SET org_id=?1, name=?2, url=?3, enabled=?4, check_interval_secs=?5,
                              ssl_monitoring=?6, ssl_alert_days=?7, regions=?8
             WHERE id=?9",
            params![
                site.org_id,
                site.name,
                site.url,
                site.enabled,
                interval,
                site.ssl_monitoring,
                site.ssl_alert_days,
                regions,
                site.id,
            ],
        )?;
        if rows == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get a site by ID.
    pub fn get_site(&self, id: i64) -> Result<Option<Site>, DbError> {
        let conn = self.conn.lock().unwrap();
        let site = conn
            .query_row(
                &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
                params![id],
                map_site,
            )
            .optional()?;
        Ok(site)
    }

    /// Get all sites.
    pub fn get_sites(&self) -> Result<Vec<Site>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM sites ORDER BY id", SITE_COLUMNS))?;
        let sites = stmt
            .query_map([], map_site)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    /// Get all enabled sites.
    pub fn get_enabled_sites(&self) -> Result<Vec<Site>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sites WHERE enabled = 1 ORDER BY id",
            SITE_COLUMNS
        ))?;
        let sites = stmt
            .query_map([], map_site)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    /// Get all sites belonging to one organization.
    pub fn get_sites_by_org(&self, org_id: i64) -> Result<Vec<Site>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sites WHERE org_id = ?1 ORDER BY id",
            SITE_COLUMNS
        ))?;
        let sites = stmt
            .query_map(params![org_id], map_site)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    /// Delete a site and all history owned by it.
    pub fn delete_site(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM checks WHERE site_id = ?1", params![id])?;
        tx.execute("DELETE FROM ssl_checks WHERE site_id = ?1", params![id])?;
        tx.execute("DELETE FROM dns_checks WHERE site_id = ?1", params![id])?;
        tx.execute("DELETE FROM incidents WHERE site_id = ?1", params![id])?;
        tx.execute("DELETE FROM sites WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Write the user-facing monitoring state for a site. This is the
    /// priority write: it must land even when incident writes later fail.
    pub fn update_site_status(
        &self,
        id: i64,
        status: SiteStatus,
        uptime: f64,
        avg_latency_ms: f64,
        last_checked_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE sites SET status=?1, uptime=?2, avg_latency_ms=?3, last_checked_at=?4 WHERE id=?5",
            params![
                status.as_str(),
                uptime,
                avg_latency_ms,
                fmt_ts(&last_checked_at),
                id
            ],
        )?;
        if rows == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Mirror the latest certificate summary onto the site row.
    pub fn update_ssl_summary(
        &self,
        id: i64,
        valid: bool,
        days_remaining: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sites SET ssl_valid=?1, ssl_days_remaining=?2, ssl_expires_at=?3, ssl_checked_at=?4
             WHERE id=?5",
            params![
                valid,
                days_remaining,
                expires_at.map(|t| fmt_ts(&t)),
                fmt_ts(&checked_at),
                id
            ],
        )?;
        Ok(())
    }

    /// Record that an expiry alert was sent, for milestone cooldown checks.
    pub fn update_ssl_alert_state(
        &self,
        id: i64,
        sent_at: DateTime<Utc>,
        days_remaining: i64,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sites SET ssl_last_alert_at=?1, ssl_last_alert_days=?2 WHERE id=?3",
            params![fmt_ts(&sent_at), days_remaining, id],
        )?;
        Ok(())
    }

    /// Count sites grouped by current status.
    pub fn count_sites_by_status(&self) -> Result<Vec<(SiteStatus, i64)>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sites GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                Ok((SiteStatus::parse(&status), row.get::<_, i64>(1)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(counts)
    }

    // --- Checks ---

    /// Append a single probe fact.
    pub fn add_check(&self, check: &Check) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO checks (site_id, status, latency_ms, http_status, error, region, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                check.site_id,
                check.status.as_str(),
                check.latency_ms,
                check.http_status,
                check.error,
                check.region,
                fmt_ts(&check.checked_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append probe facts in batch (one multi-region run).
    pub fn add_checks(&self, checks: &[Check]) -> Result<(), DbError> {
        if checks.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO checks (site_id, status, latency_ms, http_status, error, region, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for c in checks {
                stmt.execute(params![
                    c.site_id,
                    c.status.as_str(),
                    c.latency_ms,
                    c.http_status,
                    c.error,
                    c.region,
                    fmt_ts(&c.checked_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Get checks for a site since a timestamp, oldest first.
    pub fn get_checks_since(
        &self,
        site_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Check>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, site_id, status, latency_ms, http_status, error, region, checked_at
             FROM checks WHERE site_id = ?1 AND checked_at >= ?2
             ORDER BY checked_at ASC, id ASC LIMIT ?3",
        )?;
        let checks = stmt
            .query_map(params![site_id, fmt_ts(&since), limit], map_check)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    /// Count total and successful checks in the trailing uptime window.
    /// A check is successful when the site answered (status != offline).
    pub fn count_checks_in_window(
        &self,
        site_id: i64,
        since: DateTime<Utc>,
    ) -> Result<(i64, i64), DbError> {
        let conn = self.conn.lock().unwrap();
        let (total, successful): (i64, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), SUM(CASE WHEN status != 'offline' THEN 1 ELSE 0 END)
             FROM checks WHERE site_id = ?1 AND checked_at >= ?2",
            params![site_id, fmt_ts(&since)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total, successful.unwrap_or(0)))
    }

    /// Most recent check for a site, if any.
    pub fn latest_check(&self, site_id: i64) -> Result<Option<Check>, DbError> {
        let conn = self.conn.lock().unwrap();
        let check = conn
            .query_row(
                "SELECT id, site_id, status, latency_ms, http_status, error, region, checked_at
                 FROM checks WHERE site_id = ?1 ORDER BY checked_at DESC, id DESC LIMIT 1",
                params![site_id],
                map_check,
            )
            .optional()?;
        Ok(check)
    }

    /// Delete checks older than the cutoff. Returns the number removed.
    pub fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM checks WHERE checked_at < ?1",
            params![fmt_ts(&cutoff)],
        )?;
        Ok(rows)
    }

    // --- Incidents ---

    /// The open incident for a site, if one exists. The storage layer
    /// guarantees at most one via a partial unique index.
    pub fn open_incident(&self, site_id: i64) -> Result<Option<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let incident = conn
            .query_row(
                &format!(
                    "SELECT {} FROM incidents WHERE site_id = ?1 AND status = 'investigating'",
                    INCIDENT_COLUMNS
                ),
                params![site_id],
                map_incident,
            )
            .optional()?;
        Ok(incident)
    }

    /// Create a new open incident. Fails if one is already open for the
    /// site (unique index backstop behind the engine's per-site lock).
    pub fn create_incident(&self, incident: &mut Incident) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO incidents (site_id, status, severity, summary, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                incident.site_id,
                incident.status.as_str(),
                incident.severity.as_str(),
                incident.summary,
                fmt_ts(&incident.started_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        incident.id = id;
        Ok(id)
    }

    /// Refresh severity and summary on an open incident; start time is
    /// never touched.
    pub fn update_open_incident(
        &self,
        id: i64,
        severity: Severity,
        summary: &str,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE incidents SET severity=?1, summary=?2 WHERE id=?3 AND status='investigating'",
            params![severity.as_str(), summary, id],
        )?;
        if rows == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Close an incident. End time and duration are written together and
    /// only once: a second resolve of the same incident is a no-op error.
    pub fn resolve_incident(
        &self,
        id: i64,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
        resolved_by: Option<&str>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE incidents SET status='resolved', ended_at=?1, duration_secs=?2, resolved_by=?3
             WHERE id=?4 AND status='investigating'",
            params![fmt_ts(&ended_at), duration_secs, resolved_by, id],
        )?;
        if rows == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Incident history for a site, most recent first.
    pub fn get_incidents(&self, site_id: i64, limit: i64) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM incidents WHERE site_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
            INCIDENT_COLUMNS
        ))?;
        let incidents = stmt
            .query_map(params![site_id, limit], map_incident)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    /// Count open incidents across all sites.
    pub fn count_open_incidents(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM incidents WHERE status = 'investigating'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- SSL checks ---

    /// Append a certificate inspection snapshot.
    pub fn add_ssl_check(&self, check: &SslCheck) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ssl_checks (site_id, org_id, valid, issuer, subject, valid_from, valid_to,
                                     days_remaining, serial, fingerprint, signature_algorithm,
                                     self_signed, server_auth, error, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                check.site_id,
                check.org_id,
                check.valid,
                check.issuer,
                check.subject,
                check.valid_from.map(|t| fmt_ts(&t)),
                check.valid_to.map(|t| fmt_ts(&t)),
                check.days_remaining,
                check.serial,
                check.fingerprint,
                check.signature_algorithm,
                check.self_signed,
                check.server_auth,
                check.error,
                fmt_ts(&check.checked_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent certificate snapshot for a site.
    pub fn latest_ssl_check(&self, site_id: i64) -> Result<Option<SslCheck>, DbError> {
        let conn = self.conn.lock().unwrap();
        let check = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ssl_checks WHERE site_id = ?1
                     ORDER BY checked_at DESC, id DESC LIMIT 1",
                    SSL_COLUMNS
                ),
                params![site_id],
                map_ssl_check,
            )
            .optional()?;
        Ok(check)
    }

    /// Certificate snapshot history for a site, most recent first.
    pub fn get_ssl_checks(&self, site_id: i64, limit: i64) -> Result<Vec<SslCheck>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ssl_checks WHERE site_id = ?1
             ORDER BY checked_at DESC, id DESC LIMIT ?2",
            SSL_COLUMNS
        ))?;
        let checks = stmt
            .query_map(params![site_id, limit], map_ssl_check)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    /// Delete certificate snapshots older than the cutoff.
    pub fn delete_ssl_checks_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM ssl_checks WHERE checked_at < ?1",
            params![fmt_ts(&cutoff)],
        )?;
        Ok(rows)
    }

    // --- DNS checks ---

    /// Append a DNS snapshot.
    pub fn add_dns_check(&self, check: &DnsCheck) -> Result<i64, DbError> {
        let records = serde_json::to_string(&check.records)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO dns_checks (site_id, records, changed, diff, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                check.site_id,
                records,
                check.changed,
                check.diff,
                fmt_ts(&check.checked_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent DNS snapshot for a site.
    pub fn latest_dns_check(&self, site_id: i64) -> Result<Option<DnsCheck>, DbError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, site_id, records, changed, diff, checked_at
                 FROM dns_checks WHERE site_id = ?1 ORDER BY checked_at DESC, id DESC LIMIT 1",
                params![site_id],
                map_dns_check,
            )
            .optional()?;
        Ok(row)
    }

    /// DNS snapshot history for a site, most recent first.
    pub fn get_dns_checks(&self, site_id: i64, limit: i64) -> Result<Vec<DnsCheck>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, site_id, records, changed, diff, checked_at
             FROM dns_checks WHERE site_id = ?1 ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;
        let checks = stmt
            .query_map(params![site_id, limit], map_dns_check)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    /// Delete DNS snapshots older than the cutoff.
    pub fn delete_dns_checks_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM dns_checks WHERE checked_at < ?1",
            params![fmt_ts(&cutoff)],
        )?;
        Ok(rows)
    }

    // --- Status page stats ---

    /// Get database size in bytes.
    pub fn get_db_size_bytes(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok(page_count * page_size)
    }
}

const SITE_COLUMNS: &str = "id, org_id, name, url, enabled, check_interval_secs, status, uptime, \
     avg_latency_ms, last_checked_at, ssl_monitoring, ssl_alert_days, ssl_last_alert_at, \
     ssl_last_alert_days, ssl_valid, ssl_days_remaining, ssl_expires_at, ssl_checked_at, regions";

const INCIDENT_COLUMNS: &str =
    "id, site_id, status, severity, summary, started_at, ended_at, duration_secs, resolved_by";

const SSL_COLUMNS: &str = "id, site_id, org_id, valid, issuer, subject, valid_from, valid_to, \
     days_remaining, serial, fingerprint, signature_algorithm, self_signed, server_auth, error, \
     checked_at";

fn map_site(row: &Row<'_>) -> SqlResult<Site> {
    let status: String = row.get(6)?;
    let regions: String = row.get(18)?;
    Ok(Site {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        enabled: row.get(4)?,
        check_interval_secs: row.get(5)?,
        status: SiteStatus::parse(&status),
        uptime: row.get(7)?,
        avg_latency_ms: row.get(8)?,
        last_checked_at: opt_ts(row.get(9)?),
        ssl_monitoring: row.get(10)?,
        ssl_alert_days: row.get(11)?,
        ssl_last_alert_at: opt_ts(row.get(12)?),
        ssl_last_alert_days: row.get(13)?,
        ssl_valid: row.get(14)?,
        ssl_days_remaining: row.get(15)?,
        ssl_expires_at: opt_ts(row.get(16)?),
        ssl_checked_at: opt_ts(row.get(17)?),
        regions: serde_json::from_str(&regions).unwrap_or_default(),
    })
}

fn map_check(row: &Row<'_>) -> SqlResult<Check> {
    let status: String = row.get(2)?;
    let checked_at: String = row.get(7)?;
    Ok(Check {
        id: row.get(0)?,
        site_id: row.get(1)?,
        status: SiteStatus::parse(&status),
        latency_ms: row.get(3)?,
        http_status: row.get(4)?,
        error: row.get(5)?,
        region: row.get(6)?,
        checked_at: parse_db_time(&checked_at).unwrap_or_else(Utc::now),
    })
}

fn map_incident(row: &Row<'_>) -> SqlResult<Incident> {
    let status: String = row.get(2)?;
    let severity: String = row.get(3)?;
    let started_at: String = row.get(5)?;
    Ok(Incident {
        id: row.get(0)?,
        site_id: row.get(1)?,
        status: IncidentStatus::parse(&status),
        severity: Severity::parse(&severity),
        summary: row.get(4)?,
        started_at: parse_db_time(&started_at).unwrap_or_else(Utc::now),
        ended_at: opt_ts(row.get(6)?),
        duration_secs: row.get(7)?,
        resolved_by: row.get(8)?,
    })
}

fn map_ssl_check(row: &Row<'_>) -> SqlResult<SslCheck> {
    let checked_at: String = row.get(15)?;
    Ok(SslCheck {
        id: row.get(0)?,
        site_id: row.get(1)?,
        org_id: row.get(2)?,
        valid: row.get(3)?,
        issuer: row.get(4)?,
        subject: row.get(5)?,
        valid_from: opt_ts(row.get(6)?),
        valid_to: opt_ts(row.get(7)?),
        days_remaining: row.get(8)?,
        serial: row.get(9)?,
        fingerprint: row.get(10)?,
        signature_algorithm: row.get(11)?,
        self_signed: row.get(12)?,
        server_auth: row.get(13)?,
        error: row.get(14)?,
        checked_at: parse_db_time(&checked_at).unwrap_or_else(Utc::now),
    })
}

fn map_dns_check(row: &Row<'_>) -> SqlResult<DnsCheck> {
    let records: String = row.get(2)?;
    let checked_at: String = row.get(5)?;
    Ok(DnsCheck {
        id: row.get(0)?,
        site_id: row.get(1)?,
        records: serde_json::from_str(&records).unwrap_or_default(),
        changed: row.get(3)?,
        diff: row.get(4)?,
        checked_at: parse_db_time(&checked_at).unwrap_or_else(Utc::now),
    })
}

/// Format a timestamp for storage. Fixed-width so lexicographic comparison
/// in SQL matches chronological order.
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

fn opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| parse_db_time(&s))
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
