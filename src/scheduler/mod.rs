//! Scheduler module: drives check cycles and feeds their results through
//! history, status tracking and alerting.

mod report;
mod retention;

pub use report::*;
pub use retention::*;

use crate::alerts::{AlertEngine, MultiNotifier};
use crate::db::{AlertEvent, AlertRecord, CheckResult, StoreStats};
use crate::history::{HistoryError, HistoryStore, WindowSummary};
use crate::probe::Check;
use crate::status::{StatusError, StatusTracker, TargetStatus};
use crate::target::{CheckTarget, TargetRegistry};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Upper bound, in milliseconds, on the delay before a target's first check.
const MAX_JITTER_MS: u64 = 100;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Where a target is in its check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Idle,
    Due,
    Checking,
}

#[derive(Debug, Default)]
struct SlotState {
    checking: bool,
    last_started: Option<Instant>,
}

/// Scheduling state for one target, behind its own lock.
struct Slot {
    target: Arc<CheckTarget>,
    state: Mutex<SlotState>,
}

impl Slot {
    fn is_due(&self, state: &SlotState, now: Instant) -> bool {
        match state.last_started {
            None => true,
            Some(started) => now.saturating_duration_since(started) >= self.target.interval(),
        }
    }

    fn phase(&self, now: Instant) -> Phase {
        let state = self.state.lock();
        if state.checking {
            Phase::Checking
        } else if self.is_due(&state, now) {
            Phase::Due
        } else {
            Phase::Idle
        }
    }

    /// Move the slot to `Checking` if it is due (or `force` is set) and not
    /// already checking. Returns whether this is the target's first check.
    fn claim(&self, now: Instant, force: bool) -> Option<bool> {
        let mut state = self.state.lock();
        if state.checking || !(force || self.is_due(&state, now)) {
            return None;
        }
        let first = state.last_started.is_none();
        state.checking = true;
        state.last_started = Some(now);
        Some(first)
    }
}

/// Returns the slot to idle when the check task ends, however it ends.
struct SlotGuard(Arc<Slot>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.state.lock().checking = false;
    }
}

/// The main scheduler that orchestrates check execution.
pub struct Scheduler {
    registry: Arc<TargetRegistry>,
    checker: Arc<dyn Check>,
    history: Arc<HistoryStore>,
    tracker: Arc<StatusTracker>,
    engine: Arc<AlertEngine>,
    notifier: Arc<MultiNotifier>,
    tick: Duration,
    jitter: bool,
    slots: Vec<Arc<Slot>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TargetRegistry>,
        checker: Arc<dyn Check>,
        history: Arc<HistoryStore>,
        tracker: Arc<StatusTracker>,
        engine: Arc<AlertEngine>,
        notifier: Arc<MultiNotifier>,
        tick: Duration,
    ) -> Self {
        let slots = registry
            .iter()
            .map(|target| {
                Arc::new(Slot {
                    target: target.clone(),
                    state: Mutex::new(SlotState::default()),
                })
            })
            .collect();

        Self {
            registry,
            checker,
            history,
            tracker,
            engine,
            notifier,
            tick,
            jitter: true,
            slots,
        }
    }

    /// Enable or disable the random delay before each target's first check.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Current phase of a target.
    pub fn phase(&self, target_name: &str, now: Instant) -> Option<Phase> {
        self.slots
            .iter()
            .find(|s| s.target.name == target_name)
            .map(|s| s.phase(now))
    }

    /// Dispatch every due target. Each dispatched check runs in its own task;
    /// the handles are returned so callers can wait for them.
    pub fn tick(self: &Arc<Self>, now: Instant) -> Vec<JoinHandle<()>> {
        self.dispatch(now, false)
    }

    /// Check every idle target once, regardless of interval, and wait for
    /// all of them to finish. Returns the number of checks run.
    pub async fn run_once(self: &Arc<Self>) -> usize {
        let handles = self.dispatch(Instant::now(), true);
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Check task failed: {}", e);
            }
        }
        count
    }

    /// Tick until a shutdown signal arrives, then wait for in-flight checks.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            "Starting scheduler with {} targets (tick {:?})",
            self.slots.len(),
            self.tick
        );

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                now = interval.tick() => {
                    in_flight.retain(|h| !h.is_finished());
                    in_flight.extend(self.tick(now));
                }
            }
        }

        tracing::info!("Scheduler stopping; waiting for {} in-flight checks", in_flight.len());
        for handle in in_flight {
            let _ = handle.await;
        }
    }

    fn dispatch(self: &Arc<Self>, now: Instant, force: bool) -> Vec<JoinHandle<()>> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let first = slot.claim(now, force)?;
                let guard = SlotGuard(slot.clone());
                let this = self.clone();
                let delay = if first && this.jitter {
                    Duration::from_millis(rand::random::<u64>() % MAX_JITTER_MS)
                } else {
                    Duration::ZERO
                };

                Some(tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let target = guard.0.target.clone();
                    this.run_cycle(target).await;
                    drop(guard);
                }))
            })
            .collect()
    }

    /// One check cycle. Internal faults are logged here and never propagate.
    async fn run_cycle(&self, target: Arc<CheckTarget>) {
        let checker = self.checker.clone();
        let checked = target.clone();
        let result = match tokio::spawn(async move { checker.check(&checked).await }).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(target_name = %target.name, "Internal checker error: {}", e);
                return;
            }
            Err(e) => {
                tracing::error!(target_name = %target.name, "Check task aborted: {}", e);
                return;
            }
        };

        if let Err(e) = self.record(&target, result).await {
            tracing::error!(target_name = %target.name, "Failed to process check result: {}", e);
        }
    }

    /// Persist a result, then update status and raise any alerts.
    async fn record(&self, target: &CheckTarget, result: CheckResult) -> Result<(), SchedulerError> {
        let to_append = result.clone();
        self.with_history(move |h| h.append(&to_append)).await?;

        tracing::info!(
            target_name = %target.name,
            "{}: {} - {}ms",
            target.name,
            if result.success { "UP" } else { "DOWN" },
            result.response_time_ms
        );

        let transition = self.tracker.apply(&result)?;
        if let Some(t) = &transition {
            tracing::info!(target_name = %target.name, from = %t.from, to = %t.to, "State changed");
        }

        let events = transition
            .and_then(|t| self.engine.decide(target, &t, &result))
            .into_iter()
            .chain(self.engine.decide_ssl(target, &result));

        for event in events {
            self.notify(event).await?;
        }
        Ok(())
    }

    async fn notify(&self, event: AlertEvent) -> Result<(), SchedulerError> {
        let channels = match self.notifier.deliver(&event).await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!(target_name = %event.target_name, kind = %event.kind, "Alert not delivered: {}", e);
                return Ok(());
            }
        };

        self.with_history(move |h| {
            for channel in &channels {
                h.record_alert(&event, channel)?;
            }
            Ok(())
        })
        .await
    }

    async fn with_history<T, F>(&self, f: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&HistoryStore) -> Result<T, HistoryError> + Send + 'static,
        T: Send + 'static,
    {
        let history = self.history.clone();
        Ok(tokio::task::spawn_blocking(move || f(&history)).await??)
    }

    // --- Queries ---

    pub fn get_status(&self, target_name: &str) -> Option<TargetStatus> {
        self.tracker.get(target_name)
    }

    pub fn get_status_all(&self) -> Vec<TargetStatus> {
        self.tracker.snapshot()
    }

    pub async fn get_uptime(&self, target_name: &str, since: DateTime<Utc>) -> Result<Option<f64>, SchedulerError> {
        let name = target_name.to_string();
        self.with_history(move |h| h.uptime(&name, since)).await
    }

    pub async fn get_history(&self, target_name: &str, since: DateTime<Utc>) -> Result<Vec<CheckResult>, SchedulerError> {
        let name = target_name.to_string();
        self.with_history(move |h| h.window(&name, since)).await
    }

    pub async fn get_summary(&self, target_name: &str, since: DateTime<Utc>) -> Result<WindowSummary, SchedulerError> {
        let name = target_name.to_string();
        self.with_history(move |h| h.summary(&name, since)).await
    }

    pub async fn get_alerts(&self, target_name: &str, since: DateTime<Utc>) -> Result<Vec<AlertRecord>, SchedulerError> {
        let name = target_name.to_string();
        self.with_history(move |h| h.alerts(&name, since)).await
    }

    pub async fn get_stats(&self) -> Result<StoreStats, SchedulerError> {
        self.with_history(|h| Ok(h.store().get_stats()?)).await
    }
}
