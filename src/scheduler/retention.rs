//! Retention manager for pruning old check results.

use crate::history::HistoryStore;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Manager for deleting check results past the retention period.
pub struct RetentionManager {
    history: Arc<HistoryStore>,
    retention: ChronoDuration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(history: Arc<HistoryStore>, retention_days: u32) -> Self {
        Self {
            history,
            retention: ChronoDuration::days(i64::from(retention_days)),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self) {
        let history = self.history.clone();
        let retention = self.retention;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(RETENTION_INTERVAL);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        let history = history.clone();
                        let pruned = tokio::task::spawn_blocking(move || process_retention(&history, retention)).await;
                        if let Err(e) = pruned {
                            tracing::error!("RetentionManager: Pruning task failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn process_retention(history: &HistoryStore, retention: ChronoDuration) -> usize {
    let cutoff = Utc::now() - retention;
    match history.prune_before(cutoff) {
        Ok(0) => 0,
        Ok(n) => {
            tracing::info!("RetentionManager: Deleted {} results older than {}", n, cutoff);
            n
        }
        Err(e) => {
            tracing::error!("RetentionManager: Failed to delete old results: {}", e);
            0
        }
    }
}
