//! Vigil - HTTP(S) Monitoring Service

use vigil::alerts::{AlertEngine, LogNotifier, MultiNotifier, Notifier, WebhookNotifier};
use vigil::config::ServerConfig;
use vigil::db::Store;
use vigil::history::HistoryStore;
use vigil::probe::HttpChecker;
use vigil::scheduler::{ReportManager, RetentionManager, Scheduler};
use vigil::status::StatusTracker;
use vigil::target::TargetRegistry;
use vigil::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let one_shot = match std::env::args().nth(1).as_deref() {
        None => false,
        Some("check") => true,
        Some(other) => return Err(format!("unknown command: {} (expected `check`)", other).into()),
    };

    // Load configuration
    let cfg = ServerConfig::load();
    let registry = match TargetRegistry::load(&cfg.targets_path, &cfg.target_defaults()) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!("Invalid target configuration in {}: {}", cfg.targets_path, e);
            return Err(e.into());
        }
    };
    if registry.is_empty() {
        tracing::warn!("No targets configured in {}", cfg.targets_path);
    }

    // Initialize database
    tracing::info!("Using database at {}", cfg.db_path);
    let store = Store::new(&cfg.db_path)?;
    let history = Arc::new(HistoryStore::new(store, &registry)?);
    tracing::info!("Database initialized successfully");

    let mut notifier = MultiNotifier::new(vec![Arc::new(LogNotifier) as Arc<dyn Notifier>]);
    if let Some(url) = &cfg.webhook_url {
        tracing::info!("Sending alerts to webhook {}", url);
        notifier.push(Arc::new(WebhookNotifier::new(url.clone())));
    }

    // Pick up where the last run left off.
    let tracker = StatusTracker::resume(&registry, &history)?;
    let engine = AlertEngine::resume(&registry, &history, cfg.ssl_warning_days, chrono::Duration::hours(24))?;

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        Arc::new(HttpChecker::new(cfg.retry_policy())?),
        history.clone(),
        Arc::new(tracker),
        Arc::new(engine),
        Arc::new(notifier),
        cfg.tick(),
    ));

    if one_shot {
        let checked = scheduler.run_once().await;
        for status in scheduler.get_status_all() {
            tracing::info!(target_name = %status.target_name, state = %status.current_state, "Check complete");
        }
        tracing::info!("Checked {} targets", checked);
        return Ok(());
    }

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let retention = cfg.retention_days.map(|days| {
        tracing::info!("Keeping {} days of history", days);
        let manager = RetentionManager::new(history.clone(), days);
        manager.start();
        manager
    });

    let report = ReportManager::new(history.clone(), registry.clone(), cfg.report_hour);
    report.start();

    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown_tx.subscribe()));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        let _ = signal_tx.send(());
    });

    // Start web server
    tracing::info!("Starting Vigil on port {}...", cfg.http_port);
    let server = Server::new(cfg, scheduler);
    let served = server.start(shutdown_tx.subscribe()).await;

    // The server may also exit on its own (e.g. bind failure).
    let _ = shutdown_tx.send(());
    if let Some(manager) = retention {
        manager.stop().await;
    }
    report.stop().await;
    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {}", e);
    }

    served
}
