//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One immutable verification of one target.
///
/// Produced once per check cycle by the checker and appended once to the
/// history store. Nothing updates a result after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub target_name: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub http_status: Option<u16>,
    /// Elapsed request time, 0 if the request never completed.
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    /// Only populated for targets with `check_ssl` set.
    pub ssl_days_remaining: Option<i64>,
    /// Non-fatal condition observed during the check (e.g. unreadable certificate).
    pub warning: Option<String>,
}

impl CheckResult {
    /// Create a failed result with no response data yet.
    pub fn new(target_name: impl Into<String>, url: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            target_name: target_name.into(),
            url: url.into(),
            timestamp,
            success: false,
            http_status: None,
            response_time_ms: 0,
            error_message: None,
            ssl_days_remaining: None,
            warning: None,
        }
    }

    /// Mark the check as successful.
    pub fn success(mut self, http_status: u16, response_time_ms: u64) -> Self {
        self.success = true;
        self.http_status = Some(http_status);
        self.response_time_ms = response_time_ms;
        self.error_message = None;
        self
    }

    /// Mark the check as failed with an error.
    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }

    /// Record response data for a request that completed.
    pub fn with_response(mut self, http_status: u16, response_time_ms: u64) -> Self {
        self.http_status = Some(http_status);
        self.response_time_ms = response_time_ms;
        self
    }

    pub fn with_ssl_days(mut self, days: i64) -> Self {
        self.ssl_days_remaining = Some(days);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Kind of alert the decision engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Down,
    Recovered,
    SslExpiring,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Down => "down",
            AlertKind::Recovered => "recovered",
            AlertKind::SslExpiring => "ssl_expiring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "down" => Some(AlertKind::Down),
            "recovered" => Some(AlertKind::Recovered),
            "ssl_expiring" => Some(AlertKind::SslExpiring),
            _ => None,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert decision, handed to the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub target_name: String,
    pub kind: AlertKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// A delivered alert as stored in the `alerts` log.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub target_name: String,
    pub kind: AlertKind,
    pub detail: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

/// Row counts for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub checks: i64,
    pub alerts: i64,
}
