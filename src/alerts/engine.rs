//! Alert decisions: which transitions and certificate readings become alerts.

use crate::db::{AlertEvent, AlertKind, CheckResult};
use crate::history::{HistoryError, HistoryStore};
use crate::status::{MonitorState, Transition};
use crate::target::{CheckTarget, TargetRegistry};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

pub const DEFAULT_SSL_WARNING_DAYS: i64 = 30;

/// Decides whether a check outcome warrants an alert.
///
/// DOWN/RECOVERED decisions are a pure function of the transition. SSL
/// warnings keep the time of the last warning per target so that at most
/// one is emitted per dedup window.
pub struct AlertEngine {
    ssl_warning_days: i64,
    ssl_dedup_window: Duration,
    last_ssl_warning: HashMap<String, Mutex<Option<DateTime<Utc>>>>,
}

impl AlertEngine {
    pub fn new(registry: &TargetRegistry, ssl_warning_days: i64, ssl_dedup_window: Duration) -> Self {
        Self {
            ssl_warning_days,
            ssl_dedup_window,
            last_ssl_warning: registry
                .names()
                .map(|name| (name.to_string(), Mutex::new(None)))
                .collect(),
        }
    }

    /// Engine whose SSL dedup window continues from the last warning
    /// recorded in `history`.
    pub fn resume(
        registry: &TargetRegistry,
        history: &HistoryStore,
        ssl_warning_days: i64,
        ssl_dedup_window: Duration,
    ) -> Result<Self, HistoryError> {
        let engine = Self::new(registry, ssl_warning_days, ssl_dedup_window);
        for (name, last) in &engine.last_ssl_warning {
            *last.lock() = history.last_alert(name, AlertKind::SslExpiring)?.map(|a| a.timestamp);
        }
        Ok(engine)
    }

    /// Engine with a 30-day warning threshold and a 24-hour dedup window.
    pub fn with_defaults(registry: &TargetRegistry) -> Self {
        Self::new(registry, DEFAULT_SSL_WARNING_DAYS, Duration::hours(24))
    }

    /// Map a state transition to a DOWN or RECOVERED alert.
    pub fn decide(&self, target: &CheckTarget, transition: &Transition, result: &CheckResult) -> Option<AlertEvent> {
        let (kind, detail) = match (transition.from, transition.to) {
            (MonitorState::Up | MonitorState::Unknown, MonitorState::Down) => (
                AlertKind::Down,
                result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "check failed".to_string()),
            ),
            (MonitorState::Down, MonitorState::Up) => (AlertKind::Recovered, recovery_detail(result)),
            _ => return None,
        };

        Some(AlertEvent {
            target_name: target.name.clone(),
            kind,
            detail,
            timestamp: transition.at,
        })
    }

    /// Emit an SSL_EXPIRING alert when the certificate is inside the warning
    /// window, at most once per dedup window per target.
    pub fn decide_ssl(&self, target: &CheckTarget, result: &CheckResult) -> Option<AlertEvent> {
        if !target.check_ssl {
            return None;
        }
        let days = result.ssl_days_remaining?;
        if days > self.ssl_warning_days {
            return None;
        }

        let mut last = self.last_ssl_warning.get(&target.name)?.lock();
        if let Some(prev) = *last {
            if result.timestamp - prev < self.ssl_dedup_window {
                return None;
            }
        }
        *last = Some(result.timestamp);

        let detail = if days < 0 {
            format!("certificate expired {} days ago", -days)
        } else {
            format!("certificate expires in {} days", days)
        };

        Some(AlertEvent {
            target_name: target.name.clone(),
            kind: AlertKind::SslExpiring,
            detail,
            timestamp: result.timestamp,
        })
    }
}

fn recovery_detail(result: &CheckResult) -> String {
    match result.http_status {
        Some(status) => format!("HTTP {} in {}ms", status, result.response_time_ms),
        None => "check succeeded".to_string(),
    }
}
