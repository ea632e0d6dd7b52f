//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::models::*;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const CHECK_COLUMNS: &str = "target_name, checked_at, url, success, http_status, response_time_ms, \
                             error_message, ssl_days_remaining, warning";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Thread-safe database store.
///
/// Writes go through one connection and reads through another, so a query
/// never waits on an insert. Each lock is only held for the duration of one
/// statement; ordering of writes per target is the caller's concern.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref();
        let writer = Connection::open(path)?;
        writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        init(&writer)?;

        // WAL lets this connection read committed data while the writer is busy.
        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    /// Open a private in-memory store. Reads and writes share the one connection.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        init(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: conn.clone(),
            reader: conn,
        })
    }
    // --- Checks ---

    /// Append a check result. Fails on a duplicate `(target_name, timestamp)`.
    pub fn add_check(&self, result: &CheckResult) -> Result<(), DbError> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT INTO checks (target_name, checked_at, url, success, http_status, response_time_ms, error_message, ssl_days_remaining, warning)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                result.target_name,
                format_db_time(result.timestamp),
                result.url,
                result.success,
                result.http_status.map(i64::from),
                result.response_time_ms as i64,
                result.error_message,
                result.ssl_days_remaining,
                result.warning,
            ],
        )?;
        Ok(())
    }

    /// Get check results for a target at or after `since`, oldest first.
    pub fn get_checks(&self, target_name: &str, since: DateTime<Utc>) -> Result<Vec<CheckResult>, DbError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM checks
             WHERE target_name = ?1 AND checked_at >= ?2 ORDER BY checked_at ASC"
        ))?;

        let results = stmt
            .query_map(params![target_name, format_db_time(since)], row_to_check)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    /// Get the most recent check result for a target.
    pub fn latest_check(&self, target_name: &str) -> Result<Option<CheckResult>, DbError> {
        let conn = self.reader.lock();
        let result = conn
            .query_row(
                &format!(
                    "SELECT {CHECK_COLUMNS} FROM checks
                     WHERE target_name = ?1 ORDER BY checked_at DESC LIMIT 1"
                ),
                params![target_name],
                row_to_check,
            )
            .optional()?;
        Ok(result)
    }

    /// The `limit` most recent results for a target, oldest first.
    pub fn recent_checks(&self, target_name: &str, limit: usize) -> Result<Vec<CheckResult>, DbError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM checks
             WHERE target_name = ?1 ORDER BY checked_at DESC LIMIT ?2"
        ))?;

        let mut results = stmt
            .query_map(params![target_name, limit as i64], row_to_check)?
            .collect::<SqlResult<Vec<_>>>()?;
        results.reverse();

        Ok(results)
    }

    /// Delete check results older than the cutoff. Returns the number of rows removed.
    pub fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.writer.lock();
        let deleted = conn.execute(
            "DELETE FROM checks WHERE checked_at < ?1",
            params![format_db_time(cutoff)],
        )?;
        Ok(deleted)
    }

    // --- Alerts ---

    /// Record an alert delivered through `channel`.
    pub fn add_alert(&self, event: &AlertEvent, channel: &str) -> Result<(), DbError> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT OR IGNORE INTO alerts (target_name, created_at, kind, detail, channel) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.target_name,
                format_db_time(event.timestamp),
                event.kind.as_str(),
                event.detail,
                channel,
            ],
        )?;
        Ok(())
    }

    /// Get delivered alerts for a target at or after `since`, oldest first.
    pub fn get_alerts(&self, target_name: &str, since: DateTime<Utc>) -> Result<Vec<AlertRecord>, DbError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare(
            "SELECT target_name, created_at, kind, detail, channel FROM alerts
             WHERE target_name = ?1 AND created_at >= ?2 ORDER BY created_at ASC",
        )?;

        let alerts = stmt
            .query_map(params![target_name, format_db_time(since)], row_to_alert)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(alerts)
    }

    /// Most recent delivered alert of `kind` for a target, on any channel.
    pub fn latest_alert(&self, target_name: &str, kind: AlertKind) -> Result<Option<AlertRecord>, DbError> {
        let conn = self.reader.lock();
        let alert = conn
            .query_row(
                "SELECT target_name, created_at, kind, detail, channel FROM alerts
                 WHERE target_name = ?1 AND kind = ?2 ORDER BY created_at DESC LIMIT 1",
                params![target_name, kind.as_str()],
                row_to_alert,
            )
            .optional()?;
        Ok(alert)
    }

    // --- Stats ---

    /// Get row counts.
    pub fn get_stats(&self) -> Result<StoreStats, DbError> {
        let conn = self.reader.lock();
        let checks: i64 = conn.query_row("SELECT COUNT(*) FROM checks", [], |r| r.get(0))?;
        let alerts: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |r| r.get(0))?;
        Ok(StoreStats { checks, alerts })
    }
}

/// Initialize the schema.
fn init(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(include_str!("../../migrations/0001_init.sql"))
        .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
    Ok(())
}

fn row_to_check(row: &Row<'_>) -> SqlResult<CheckResult> {
    Ok(CheckResult {
        target_name: row.get(0)?,
        timestamp: get_time(row, 1)?,
        url: row.get(2)?,
        success: row.get(3)?,
        http_status: row.get::<_, Option<i64>>(4)?.map(|v| v as u16),
        response_time_ms: row.get::<_, i64>(5)?.max(0) as u64,
        error_message: row.get(6)?,
        ssl_days_remaining: row.get(7)?,
        warning: row.get(8)?,
    })
}

fn row_to_alert(row: &Row<'_>) -> SqlResult<AlertRecord> {
    let kind_str: String = row.get(2)?;
    let kind = AlertKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, format!("unknown alert kind: {}", kind_str).into())
    })?;
    Ok(AlertRecord {
        target_name: row.get(0)?,
        timestamp: get_time(row, 1)?,
        kind,
        detail: row.get(3)?,
        channel: row.get(4)?,
    })
}

fn get_time(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let time_str: String = row.get(idx)?;
    parse_db_time(&time_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", time_str).into(),
        )
    })
}

fn format_db_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
