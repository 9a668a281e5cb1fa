// Scheduler binary entry point

use common::config::Settings;
use common::db::repositories::CallQueueRepository;
use common::db::{DbPool, PostgresCampaignStore};
use common::dispatch::HttpCallDispatcher;
use common::queue::DrainProcessor;
use common::scheduler::{CampaignScheduler, SystemClock};
use common::telemetry;
use sqlx::postgres::{PgListener, PgNotification};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Channels the dashboard backend notifies on.
const CAMPAIGN_CHANGED_CHANNEL: &str = "campaign_changed";
const CALL_QUEUED_CHANNEL: &str = "call_queued";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration before logging is up; failures here print plainly.
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    settings.validate()?;

    telemetry::init_logging(
        &settings.telemetry.log_level,
        settings.telemetry.otlp_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.telemetry.prometheus_port)?;

    info!("Starting outbound call scheduler");
    info!(
        database_url = %settings.database.url,
        dispatch_endpoint = %settings.dispatch.endpoint,
        "Configuration loaded"
    );

    // Initialize database connection pool
    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        e
    })?;
    let latency = db_pool.health_check().await.map_err(|e| {
        error!(error = %e, "Database unreachable at startup");
        e
    })?;
    info!(latency_ms = latency.as_millis() as u64, "Database reachable");

    // Wire the engine's collaborators
    let clock = Arc::new(SystemClock);
    let store = Arc::new(PostgresCampaignStore::new(db_pool.clone()));
    let dispatcher = Arc::new(HttpCallDispatcher::new(&settings.dispatch).map_err(|e| {
        error!(error = %e, "Failed to create call dispatcher");
        e
    })?);
    let queue_store = Arc::new(CallQueueRepository::new(db_pool.clone()));
    let processor = Arc::new(
        DrainProcessor::new(
            queue_store,
            dispatcher,
            clock.clone(),
            settings.scheduler.drain_batch_size,
            settings.scheduler.default_timezone.clone(),
        ),
    );

    let scheduler = CampaignScheduler::new(
        settings.scheduler.clone(),
        clock,
        store,
        processor,
    );

    // Cold start must see the campaign tables or there is nothing to run.
    scheduler.initialize().await.map_err(|e| {
        error!(error = %e, "Failed to initialize scheduler");
        e
    })?;
    info!("Scheduler initialized");

    // Listen for change notifications from the dashboard backend
    let mut listener = PgListener::connect_with(db_pool.pool()).await.map_err(|e| {
        error!(error = %e, "Failed to connect notification listener");
        e
    })?;
    listener
        .listen_all([CAMPAIGN_CHANGED_CHANNEL, CALL_QUEUED_CHANNEL])
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to subscribe to notification channels");
            e
        })?;
    info!("Listening for campaign and call queue notifications");

    // Notifications drive the scheduler; the reconciliation tick is a safety
    // net for notifications lost while the listener reconnects.
    let mut reconcile = tokio::time::interval(settings.scheduler.reconcile_interval());
    reconcile.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C signal, initiating graceful shutdown");
                break;
            }
            _ = reconcile.tick() => {
                info!("Reconciliation reload");
                scheduler.reload_and_plan().await;
            }
            notification = listener.recv() => {
                match notification {
                    Ok(n) => handle_notification(&scheduler, n).await,
                    Err(e) => {
                        warn!(error = %e, "Notification stream interrupted, will reconnect");
                    }
                }
            }
        }
    }

    scheduler.shutdown().await;
    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Scheduler stopped");

    Ok(())
}

async fn handle_notification(scheduler: &CampaignScheduler, notification: PgNotification) {
    match notification.channel() {
        CAMPAIGN_CHANGED_CHANNEL => {
            // Payload is the campaign id; an empty payload means a bulk
            // change and recomputes everything.
            let campaign_id = Uuid::parse_str(notification.payload()).ok();
            scheduler.on_campaign_change(campaign_id).await;
        }
        CALL_QUEUED_CHANNEL => match Uuid::parse_str(notification.payload()) {
            Ok(user_id) => scheduler.on_direct_call_queued(user_id).await,
            Err(_) => {
                warn!(
                    payload = notification.payload(),
                    "Ignoring call notification with malformed user id"
                );
            }
        },
        other => {
            warn!(channel = other, "Ignoring notification on unexpected channel");
        }
    }
}
