//! Derived up/down state per target, with hysteresis.

use crate::db::CheckResult;
use crate::history::{HistoryError, HistoryStore};
use crate::target::{CheckTarget, TargetRegistry};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorState {
    Up,
    Down,
    Unknown,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Up => write!(f, "UP"),
            MonitorState::Down => write!(f, "DOWN"),
            MonitorState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A change of derived state, stamped with the triggering result's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: MonitorState,
    pub to: MonitorState,
    pub at: DateTime<Utc>,
}

/// Consecutive same-outcome samples required before the state flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub failure: u32,
    pub recovery: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { failure: 1, recovery: 1 }
    }
}

impl Thresholds {
    pub fn for_target(target: &CheckTarget) -> Self {
        Self {
            failure: target.failure_threshold.max(1),
            recovery: target.recovery_threshold.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStatus {
    pub target_name: String,
    pub current_state: MonitorState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_result: Option<CheckResult>,
    pub last_transition_at: Option<DateTime<Utc>>,
}

impl TargetStatus {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            current_state: MonitorState::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_result: None,
            last_transition_at: None,
        }
    }

    /// Fold one result into the status. Pure: returns the next status and
    /// the transition, if the derived state changed.
    pub fn apply(&self, result: &CheckResult, thresholds: Thresholds) -> (TargetStatus, Option<Transition>) {
        let mut next = self.clone();

        if result.success {
            next.consecutive_successes = next.consecutive_successes.saturating_add(1);
            next.consecutive_failures = 0;
        } else {
            next.consecutive_failures = next.consecutive_failures.saturating_add(1);
            next.consecutive_successes = 0;
        }

        let state = if next.consecutive_failures >= thresholds.failure {
            MonitorState::Down
        } else if next.consecutive_successes >= thresholds.recovery {
            MonitorState::Up
        } else {
            self.current_state
        };

        next.last_result = Some(result.clone());

        if state == self.current_state {
            return (next, None);
        }

        next.current_state = state;
        next.last_transition_at = Some(result.timestamp);
        let transition = Transition {
            from: self.current_state,
            to: state,
            at: result.timestamp,
        };
        (next, Some(transition))
    }
}

/// Persisted results replayed per target on startup.
const RESUME_SAMPLES: usize = 100;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

struct Entry {
    thresholds: Thresholds,
    status: Mutex<TargetStatus>,
}

/// Holds the current status of every target. Each target has its own lock.
pub struct StatusTracker {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl StatusTracker {
    pub fn new(registry: &TargetRegistry) -> Self {
        let entries = registry
            .iter()
            .map(|t| {
                let entry = Entry {
                    thresholds: Thresholds::for_target(t),
                    status: Mutex::new(TargetStatus::new(&t.name)),
                };
                (t.name.clone(), entry)
            })
            .collect();

        Self {
            entries,
            order: registry.names().map(str::to_string).collect(),
        }
    }

    /// Rebuild each target's status by replaying its most recent persisted
    /// results. Replayed transitions are dropped: they were alerted on, or
    /// not, by the run that recorded them.
    pub fn resume(registry: &TargetRegistry, history: &HistoryStore) -> Result<Self, HistoryError> {
        let tracker = Self::new(registry);
        for (name, entry) in &tracker.entries {
            let thresholds = entry.thresholds;
            let limit = RESUME_SAMPLES.max(thresholds.failure.saturating_add(thresholds.recovery) as usize);

            let mut status = TargetStatus::new(name.as_str());
            for result in history.recent(name, limit)? {
                status = status.apply(&result, thresholds).0;
            }
            tracing::debug!(target_name = %name, state = %status.current_state, "Resumed status");
            *entry.status.lock() = status;
        }
        Ok(tracker)
    }

    /// Apply a result to its target's status.
    pub fn apply(&self, result: &CheckResult) -> Result<Option<Transition>, StatusError> {
        let entry = self
            .entries
            .get(&result.target_name)
            .ok_or_else(|| StatusError::UnknownTarget(result.target_name.clone()))?;

        let mut status = entry.status.lock();
        let (next, transition) = status.apply(result, entry.thresholds);
        *status = next;
        Ok(transition)
    }

    pub fn get(&self, target_name: &str) -> Option<TargetStatus> {
        self.entries.get(target_name).map(|e| e.status.lock().clone())
    }

    /// Status of every target, in registry order.
    pub fn snapshot(&self) -> Vec<TargetStatus> {
        self.order.iter().filter_map(|name| self.get(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn result(name: &str, secs: i64, success: bool) -> CheckResult {
        let r = CheckResult::new(name, "http://x", at(secs));
        if success {
            r.success(200, 20)
        } else {
            r.with_response(503, 20).failure("unexpected status 503 (expected 200)")
        }
    }

    fn tracker(targets: Vec<CheckTarget>) -> StatusTracker {
        StatusTracker::new(&TargetRegistry::from_targets(targets).unwrap())
    }

    #[test]
    fn test_down_then_recovered() {
        let t = tracker(vec![CheckTarget::new("api", "http://x.example")]);

        let transition = t.apply(&result("api", 0, false)).unwrap().unwrap();
        assert_eq!(transition.from, MonitorState::Unknown);
        assert_eq!(transition.to, MonitorState::Down);

        let transition = t.apply(&result("api", 60, true)).unwrap().unwrap();
        assert_eq!(transition.from, MonitorState::Down);
        assert_eq!(transition.to, MonitorState::Up);
        assert_eq!(transition.at, at(60));

        let status = t.get("api").unwrap();
        assert_eq!(status.last_transition_at, Some(at(60)));
        assert_eq!(status.last_result.unwrap().timestamp, at(60));
    }

    #[test]
    fn test_failure_threshold_of_three() {
        let t = tracker(vec![CheckTarget::new("api", "http://x.example").with_thresholds(3, 1)]);

        assert!(t.apply(&result("api", 0, false)).unwrap().is_none());
        assert!(t.apply(&result("api", 1, false)).unwrap().is_none());
        assert_eq!(t.get("api").unwrap().current_state, MonitorState::Unknown);

        let transition = t.apply(&result("api", 2, false)).unwrap().unwrap();
        assert_eq!(transition.to, MonitorState::Down);
        assert_eq!(t.get("api").unwrap().consecutive_failures, 3);
    }

    #[test]
    fn test_single_failure_does_not_flap_with_hysteresis() {
        let t = tracker(vec![CheckTarget::new("api", "http://x.example").with_thresholds(2, 2)]);

        t.apply(&result("api", 0, true)).unwrap();
        let up = t.apply(&result("api", 1, true)).unwrap().unwrap();
        assert_eq!(up.to, MonitorState::Up);

        assert!(t.apply(&result("api", 2, false)).unwrap().is_none());
        assert!(t.apply(&result("api", 3, true)).unwrap().is_none());
        assert_eq!(t.get("api").unwrap().current_state, MonitorState::Up);
    }

    #[test]
    fn test_counters_are_mutually_exclusive() {
        let mut status = TargetStatus::new("api");
        let pattern = [true, false, false, true, true, true, false, true, false, false];
        for (i, &ok) in pattern.iter().enumerate() {
            let (next, _) = status.apply(&result("api", i as i64, ok), Thresholds { failure: 2, recovery: 2 });
            status = next;
            assert!(status.consecutive_failures == 0 || status.consecutive_successes == 0);
            assert!(status.consecutive_failures + status.consecutive_successes > 0);
        }
    }

    #[test]
    fn test_apply_is_pure() {
        let status = TargetStatus::new("api");
        let r = result("api", 0, false);
        let (a, ta) = status.apply(&r, Thresholds::default());
        let (b, tb) = status.apply(&r, Thresholds::default());
        assert_eq!(a, b);
        assert_eq!(ta, tb);
        assert_eq!(status.current_state, MonitorState::Unknown);
    }

    #[test]
    fn test_resume_replays_persisted_results() {
        let registry = TargetRegistry::from_targets(vec![
            CheckTarget::new("api", "http://x.example").with_thresholds(2, 2),
            CheckTarget::new("idle", "http://y.example"),
        ])
        .unwrap();
        let history = HistoryStore::new(crate::db::Store::open_in_memory().unwrap(), &registry).unwrap();
        for (secs, ok) in [(0, true), (1, false), (2, false), (3, true)] {
            history.append(&result("api", secs, ok)).unwrap();
        }

        let t = StatusTracker::resume(&registry, &history).unwrap();
        let status = t.get("api").unwrap();
        assert_eq!(status.current_state, MonitorState::Down);
        assert_eq!(status.consecutive_successes, 1);
        assert_eq!(status.last_transition_at, Some(at(2)));
        assert_eq!(t.get("idle").unwrap().current_state, MonitorState::Unknown);

        // Still inside the outage: another failure is not a new transition.
        history.append(&result("api", 4, false)).unwrap();
        assert!(t.apply(&result("api", 4, false)).unwrap().is_none());
    }

    #[test]
    fn test_unknown_target_and_snapshot_order() {
        let t = tracker(vec![
            CheckTarget::new("b", "http://b.example"),
            CheckTarget::new("a", "http://a.example"),
        ]);
        assert!(matches!(t.apply(&result("zzz", 0, true)), Err(StatusError::UnknownTarget(_))));

        let names: Vec<_> = t.snapshot().into_iter().map(|s| s.target_name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_independent_targets_update_concurrently() {
        let targets: Vec<_> = (0..8)
            .map(|i| CheckTarget::new(format!("t{}", i), "http://x.example"))
            .collect();
        let t = Arc::new(tracker(targets));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for s in 0..100 {
                        t.apply(&result(&format!("t{}", i), s, s % 2 == 0)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for status in t.snapshot() {
            assert_eq!(status.consecutive_failures, 1);
            assert_eq!(status.current_state, MonitorState::Down);
        }
    }
}
