//! Append-only check history and the metrics derived from it.

use crate::db::{AlertEvent, AlertKind, AlertRecord, CheckResult, DbError, Store};
use crate::target::TargetRegistry;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Mean response time must move by more than this fraction to count as a trend.
const TREND_TOLERANCE: f64 = 0.10;
const TREND_MIN_SAMPLES: usize = 4;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("result for {target} at {timestamp} is not newer than the last recorded result at {last}")]
    OutOfOrder {
        target: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Per-target write state. Guarded by its own lock.
#[derive(Debug, Default)]
struct TargetLog {
    latest: Option<CheckResult>,
}

/// History of check results, one append-only log per target.
///
/// Writes for a target are serialized by that target's lock; the map of
/// targets is fixed at construction and never locked as a whole.
pub struct HistoryStore {
    store: Store,
    logs: HashMap<String, Mutex<TargetLog>>,
}

impl HistoryStore {
    /// Build the store for every target in the registry, resuming from the
    /// latest persisted result of each.
    pub fn new(store: Store, registry: &TargetRegistry) -> Result<Self, HistoryError> {
        let mut logs = HashMap::with_capacity(registry.len());
        for name in registry.names() {
            let latest = store.latest_check(name)?;
            logs.insert(name.to_string(), Mutex::new(TargetLog { latest }));
        }
        Ok(Self { store, logs })
    }

    fn log(&self, target_name: &str) -> Result<&Mutex<TargetLog>, HistoryError> {
        self.logs
            .get(target_name)
            .ok_or_else(|| HistoryError::UnknownTarget(target_name.to_string()))
    }

    /// Append a result. It is durable once this returns `Ok`.
    pub fn append(&self, result: &CheckResult) -> Result<(), HistoryError> {
        let mut log = self.log(&result.target_name)?.lock();

        if let Some(last) = log.latest.as_ref().map(|r| r.timestamp) {
            if result.timestamp <= last {
                return Err(HistoryError::OutOfOrder {
                    target: result.target_name.clone(),
                    timestamp: result.timestamp,
                    last,
                });
            }
        }

        self.store.add_check(result)?;
        log.latest = Some(result.clone());
        Ok(())
    }

    /// Most recent result for a target, if any.
    pub fn latest(&self, target_name: &str) -> Result<Option<CheckResult>, HistoryError> {
        Ok(self.log(target_name)?.lock().latest.clone())
    }

    /// The `limit` most recent results, oldest first.
    pub fn recent(&self, target_name: &str, limit: usize) -> Result<Vec<CheckResult>, HistoryError> {
        self.log(target_name)?;
        Ok(self.store.recent_checks(target_name, limit)?)
    }

    /// Results at or after `since`, oldest first.
    pub fn window(&self, target_name: &str, since: DateTime<Utc>) -> Result<Vec<CheckResult>, HistoryError> {
        self.log(target_name)?;
        Ok(self.store.get_checks(target_name, since)?)
    }

    /// Uptime percentage over the window, `None` when there are no samples.
    pub fn uptime(&self, target_name: &str, since: DateTime<Utc>) -> Result<Option<f64>, HistoryError> {
        Ok(uptime_of(&self.window(target_name, since)?))
    }

    /// Availability and response-time statistics over the window.
    pub fn summary(&self, target_name: &str, since: DateTime<Utc>) -> Result<WindowSummary, HistoryError> {
        Ok(WindowSummary::from_results(&self.window(target_name, since)?))
    }

    /// Record an alert delivered through `channel`.
    pub fn record_alert(&self, event: &AlertEvent, channel: &str) -> Result<(), HistoryError> {
        self.log(&event.target_name)?;
        Ok(self.store.add_alert(event, channel)?)
    }

    /// Delivered alerts for a target at or after `since`.
    pub fn alerts(&self, target_name: &str, since: DateTime<Utc>) -> Result<Vec<AlertRecord>, HistoryError> {
        self.log(target_name)?;
        Ok(self.store.get_alerts(target_name, since)?)
    }

    /// Most recent delivered alert of `kind` for a target.
    pub fn last_alert(&self, target_name: &str, kind: AlertKind) -> Result<Option<AlertRecord>, HistoryError> {
        self.log(target_name)?;
        Ok(self.store.latest_alert(target_name, kind)?)
    }

    /// Delete results older than `cutoff`. Maintenance only; never part of a check.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, HistoryError> {
        Ok(self.store.delete_checks_before(cutoff)?)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// Percentage of successful samples; `None` for an empty slice.
pub fn uptime_of(results: &[CheckResult]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let successful = results.iter().filter(|r| r.success).count();
    Some(successful as f64 / results.len() as f64 * 100.0)
}

/// Direction of response times across a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTrend {
    Improving,
    Stable,
    Degrading,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// `None` means no data, not 0%.
    pub uptime: Option<f64>,
    pub avg_response_ms: Option<f64>,
    pub p95_response_ms: Option<u64>,
    pub trend: ResponseTrend,
}

impl WindowSummary {
    /// Summarize results given oldest first. Response-time figures only use
    /// requests that completed.
    pub fn from_results(results: &[CheckResult]) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let timed: Vec<u64> = results
            .iter()
            .map(|r| r.response_time_ms)
            .filter(|&ms| ms > 0)
            .collect();

        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            uptime: uptime_of(results),
            avg_response_ms: mean(&timed),
            p95_response_ms: percentile(&timed, 0.95),
            trend: trend(&timed),
        }
    }
}

fn mean(values: &[u64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<u64>() as f64 / values.len() as f64)
}

/// Nearest-rank percentile.
fn percentile(values: &[u64], q: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let rank = (q * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

fn trend(values: &[u64]) -> ResponseTrend {
    if values.len() < TREND_MIN_SAMPLES {
        return ResponseTrend::InsufficientData;
    }
    let (older, newer) = values.split_at(values.len() / 2);
    let (Some(older), Some(newer)) = (mean(older), mean(newer)) else {
        return ResponseTrend::InsufficientData;
    };

    if newer > older * (1.0 + TREND_TOLERANCE) {
        ResponseTrend::Degrading
    } else if newer < older * (1.0 - TREND_TOLERANCE) {
        ResponseTrend::Improving
    } else {
        ResponseTrend::Stable
    }
}
