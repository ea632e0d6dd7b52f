//! Daily availability report, written to the log.

use crate::history::{HistoryStore, WindowSummary};
use crate::target::TargetRegistry;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Logs a 24-hour summary of every target once a day.
pub struct ReportManager {
    history: Arc<HistoryStore>,
    registry: Arc<TargetRegistry>,
    hour: u32,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl ReportManager {
    /// `hour` is the UTC hour of day at which the report is written.
    pub fn new(history: Arc<HistoryStore>, registry: Arc<TargetRegistry>, hour: u32) -> Self {
        Self {
            history,
            registry,
            hour: hour % 24,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the report background task.
    pub fn start(&self) {
        let history = self.history.clone();
        let registry = self.registry.clone();
        let hour = self.hour;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();

            loop {
                let now = Utc::now();
                let wait = (next_report_at(now, hour) - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tokio::time::sleep(wait) => {
                        let history = history.clone();
                        let registry = registry.clone();
                        let report = tokio::task::spawn_blocking(move || process_report(&history, &registry, Utc::now())).await;
                        if let Err(e) = report {
                            tracing::error!("ReportManager: Report task failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the report manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

/// The first `hour`:00 UTC strictly after `now`.
pub fn next_report_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour % 24, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Summarize the last 24 hours of every target and log one line each.
fn process_report(history: &HistoryStore, registry: &TargetRegistry, now: DateTime<Utc>) -> Vec<(String, WindowSummary)> {
    tracing::info!("ReportManager: Generating daily report");
    let since = now - ChronoDuration::hours(24);

    let mut report = Vec::with_capacity(registry.len());
    for name in registry.names() {
        let summary = match history.summary(name, since) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(target_name = %name, "ReportManager: Failed to summarize: {}", e);
                continue;
            }
        };

        match (summary.uptime, summary.avg_response_ms) {
            (Some(uptime), Some(avg)) => tracing::info!(
                target_name = %name,
                "Report {}: {:.1}% uptime, {:.0}ms average over {} checks",
                name,
                uptime,
                avg,
                summary.total
            ),
            (Some(uptime), None) => tracing::info!(
                target_name = %name,
                "Report {}: {:.1}% uptime over {} checks",
                name,
                uptime,
                summary.total
            ),
            _ => tracing::info!(target_name = %name, "Report {}: no checks in the last 24h", name),
        }
        report.push((name.to_string(), summary));
    }
    report
}
