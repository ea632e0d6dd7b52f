//! HTTP request handlers.

use super::AppState;
use crate::history::HistoryError;
use crate::scheduler::SchedulerError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub target: String,
    #[serde(default)]
    pub hours: Option<i64>,
}

impl WindowQuery {
    /// Start of the requested window, or `None` when `hours` is out of range.
    fn since(&self) -> Option<DateTime<Utc>> {
        let hours = self.hours.filter(|h| *h > 0).unwrap_or(DEFAULT_WINDOW_HOURS);
        ChronoDuration::try_hours(hours).and_then(|window| Utc::now().checked_sub_signed(window))
    }
}

fn invalid_window(query: &WindowQuery) -> Response {
    (
        StatusCode::BAD_REQUEST,
        format!("Invalid hours: {}", query.hours.unwrap_or_default()),
    )
        .into_response()
}

fn error_response(err: SchedulerError) -> Response {
    match err {
        SchedulerError::History(HistoryError::UnknownTarget(name)) => {
            (StatusCode::NOT_FOUND, format!("Unknown target: {}", name)).into_response()
        }
        e => {
            tracing::error!("API request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// API: Targets and status
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    let targets: Vec<_> = state.scheduler.registry().iter().map(|t| t.as_ref().clone()).collect();
    Json(targets)
}

pub async fn handle_get_status_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.get_status_all())
}

pub async fn handle_get_status(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.scheduler.get_status(&name) {
        Some(status) => Json(status).into_response(),
        None => (StatusCode::NOT_FOUND, "Target not found").into_response(),
    }
}

// ============================================================================
// API: History
// ============================================================================

pub async fn handle_get_history(State(state): State<AppState>, Query(query): Query<WindowQuery>) -> impl IntoResponse {
    let Some(since) = query.since() else {
        return invalid_window(&query);
    };
    match state.scheduler.get_history(&query.target, since).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Serialize)]
pub struct UptimeResponse {
    pub target: String,
    pub since: DateTime<Utc>,
    /// `null` when the window holds no samples.
    pub uptime: Option<f64>,
}

pub async fn handle_get_uptime(State(state): State<AppState>, Query(query): Query<WindowQuery>) -> impl IntoResponse {
    let Some(since) = query.since() else {
        return invalid_window(&query);
    };
    match state.scheduler.get_uptime(&query.target, since).await {
        Ok(uptime) => Json(UptimeResponse {
            target: query.target,
            since,
            uptime,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_summary(State(state): State<AppState>, Query(query): Query<WindowQuery>) -> impl IntoResponse {
    let Some(since) = query.since() else {
        return invalid_window(&query);
    };
    match state.scheduler.get_summary(&query.target, since).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_alerts(State(state): State<AppState>, Query(query): Query<WindowQuery>) -> impl IntoResponse {
    let Some(since) = query.since() else {
        return invalid_window(&query);
    };
    match state.scheduler.get_alerts(&query.target, since).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.get_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertEngine, LogNotifier, MultiNotifier, Notifier};
    use crate::config::ServerConfig;
    use crate::db::{CheckResult, Store};
    use crate::history::HistoryStore;
    use crate::probe::{Check, CheckError};
    use crate::scheduler::Scheduler;
    use crate::status::StatusTracker;
    use crate::target::{CheckTarget, TargetRegistry};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct AlwaysUp;

    #[async_trait]
    impl Check for AlwaysUp {
        async fn check(&self, target: &CheckTarget) -> Result<CheckResult, CheckError> {
            Ok(CheckResult::new(&target.name, &target.url, Utc::now()).success(200, 42))
        }
    }

    fn state() -> AppState {
        let registry = Arc::new(TargetRegistry::from_targets(vec![CheckTarget::new("api", "http://api.example")]).unwrap());
        let history = Arc::new(HistoryStore::new(Store::open_in_memory().unwrap(), &registry).unwrap());
        let tracker = Arc::new(StatusTracker::new(&registry));
        let engine = Arc::new(AlertEngine::with_defaults(&registry));
        let notifier = Arc::new(MultiNotifier::new(vec![Arc::new(LogNotifier) as Arc<dyn Notifier>]));
        let scheduler = Scheduler::new(
            registry,
            Arc::new(AlwaysUp),
            history,
            tracker,
            engine,
            notifier,
            Duration::from_secs(1),
        )
        .with_jitter(false);

        AppState {
            config: ServerConfig::default(),
            scheduler: Arc::new(scheduler),
        }
    }

    fn window(target: &str) -> Query<WindowQuery> {
        Query(WindowQuery {
            target: target.to_string(),
            hours: None,
        })
    }

    #[tokio::test]
    async fn test_status_lookup() {
        let state = state();
        state.scheduler.run_once().await;

        let found = handle_get_status(State(state.clone()), Path("api".to_string()))
            .await
            .into_response();
        assert_eq!(found.status(), StatusCode::OK);

        let missing = handle_get_status(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_found() {
        let state = state();
        for response in [
            handle_get_history(State(state.clone()), window("nope")).await.into_response(),
            handle_get_uptime(State(state.clone()), window("nope")).await.into_response(),
            handle_get_summary(State(state.clone()), window("nope")).await.into_response(),
            handle_get_alerts(State(state.clone()), window("nope")).await.into_response(),
        ] {
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_window_endpoints() {
        let state = state();
        state.scheduler.run_once().await;

        for response in [
            handle_get_history(State(state.clone()), window("api")).await.into_response(),
            handle_get_uptime(State(state.clone()), window("api")).await.into_response(),
            handle_get_summary(State(state.clone()), window("api")).await.into_response(),
            handle_get_stats(State(state.clone())).await.into_response(),
        ] {
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_window_defaults_to_a_day() {
        let query = WindowQuery {
            target: "api".to_string(),
            hours: Some(-5),
        };
        let age = Utc::now() - query.since().unwrap();
        assert!(age >= ChronoDuration::hours(24) && age < ChronoDuration::hours(25));
    }

    #[tokio::test]
    async fn test_oversized_window_is_bad_request() {
        let state = state();
        let huge = || {
            Query(WindowQuery {
                target: "api".to_string(),
                hours: Some(i64::MAX / 1000),
            })
        };
        assert!(huge().0.since().is_none());

        for response in [
            handle_get_history(State(state.clone()), huge()).await.into_response(),
            handle_get_uptime(State(state.clone()), huge()).await.into_response(),
            handle_get_summary(State(state.clone()), huge()).await.into_response(),
            handle_get_alerts(State(state.clone()), huge()).await.into_response(),
        ] {
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }
}
