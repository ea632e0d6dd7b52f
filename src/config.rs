//! Configuration module for Vigil.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::probe::RetryPolicy;
use crate::target::TargetDefaults;

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the status API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "vigil.db")
    pub db_path: String,
    /// Path to the JSON target list (default: "sites.json")
    pub targets_path: String,
    /// Scheduler wake period in milliseconds (default: 1000)
    pub tick_ms: u64,
    /// Default check interval in seconds for targets that set none (default: 300)
    pub check_interval_secs: u64,
    /// Default request timeout in seconds for targets that set none (default: 30)
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// Days before certificate expiry at which to warn (default: 30)
    pub ssl_warning_days: i64,
    /// Delete results older than this many days; unset keeps everything.
    pub retention_days: Option<u32>,
    /// Optional webhook receiving alert events.
    pub webhook_url: Option<String>,
    /// UTC hour of the daily report (default: 8)
    pub report_hour: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "vigil.db".to_string(),
            targets_path: "sites.json".to_string(),
            tick_ms: 1000,
            check_interval_secs: 300,
            timeout_secs: 30,
            retry_count: 3,
            retry_backoff_ms: 500,
            retry_max_backoff_ms: 5000,
            ssl_warning_days: 30,
            retention_days: None,
            webhook_url: None,
            report_hour: 8,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VIGIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `VIGIL_DB_PATH`: Database file path (default: "vigil.db")
    /// - `VIGIL_TARGETS_PATH`: Target list path (default: "sites.json")
    /// - `VIGIL_TICK_MS`: Scheduler tick (default: 1000)
    /// - `VIGIL_CHECK_INTERVAL`: Default check interval, seconds (default: 300)
    /// - `VIGIL_TIMEOUT`: Default request timeout, seconds (default: 30)
    /// - `VIGIL_RETRY_COUNT`: Attempts per check cycle (default: 3)
    /// - `VIGIL_RETRY_BACKOFF_MS` / `VIGIL_RETRY_MAX_BACKOFF_MS`: Backoff bounds (default: 500 / 5000)
    /// - `VIGIL_SSL_WARNING_DAYS`: Certificate warning threshold (default: 30)
    /// - `VIGIL_RETENTION_DAYS`: Result retention (default: unset)
    /// - `VIGIL_WEBHOOK_URL`: Alert webhook (default: unset)
    /// - `VIGIL_REPORT_HOUR`: UTC hour of the daily report, 0-23 (default: 8)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        set_parsed(&lookup, "VIGIL_HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = lookup("VIGIL_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Some(targets_path) = lookup("VIGIL_TARGETS_PATH") {
            cfg.targets_path = targets_path;
        }
        set_parsed(&lookup, "VIGIL_TICK_MS", &mut cfg.tick_ms);
        set_parsed(&lookup, "VIGIL_CHECK_INTERVAL", &mut cfg.check_interval_secs);
        set_parsed(&lookup, "VIGIL_TIMEOUT", &mut cfg.timeout_secs);
        set_parsed(&lookup, "VIGIL_RETRY_COUNT", &mut cfg.retry_count);
        set_parsed(&lookup, "VIGIL_RETRY_BACKOFF_MS", &mut cfg.retry_backoff_ms);
        set_parsed(&lookup, "VIGIL_RETRY_MAX_BACKOFF_MS", &mut cfg.retry_max_backoff_ms);
        set_parsed(&lookup, "VIGIL_SSL_WARNING_DAYS", &mut cfg.ssl_warning_days);

        cfg.retention_days = lookup("VIGIL_RETENTION_DAYS").and_then(|v| v.parse().ok());
        cfg.webhook_url = lookup("VIGIL_WEBHOOK_URL").filter(|v| !v.is_empty());

        set_parsed(&lookup, "VIGIL_REPORT_HOUR", &mut cfg.report_hour);
        if cfg.report_hour > 23 {
            tracing::warn!("Ignoring out-of-range VIGIL_REPORT_HOUR: {}", cfg.report_hour);
            cfg.report_hour = Self::default().report_hour;
        }

        cfg
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_count.max(1),
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
        }
    }

    pub fn target_defaults(&self) -> TargetDefaults {
        TargetDefaults {
            timeout_ms: self.timeout_secs.saturating_mul(1000),
            interval_secs: self.check_interval_secs,
        }
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw),
        }
    }
}
