//! # Periscope Service Entry Point
//!
//! Boots storage, the ingestion pipeline, the alerting scheduler and the HTTP
//! server, and tears them down in dependency order on shutdown.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use periscope::alerting::AlertingScheduler;
use periscope::clock::system_clock;
use periscope::config::ConfigLoader;
use periscope::db;
use periscope::ingestion::{Aggregator, PersistenceFlusher};
use periscope::notification::ChannelRegistry;
use periscope::repositories::{
    AlertRepository, DestinationRepository, EventRepository, NotificationRepository,
    ProjectCache, ProjectRepository,
};
use periscope::server::{AppState, run_server};
use periscope::service::ServiceHandle;
use periscope::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    telemetry::init_tracing(&config).context("Failed to initialize telemetry")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(configuration = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::prepare_schema(&db).await?;

    let aggregator = Arc::new(Aggregator::new(config.aggregator_channel_capacity));
    let subscription = aggregator
        .subscribe()
        .context("Failed to subscribe to the event aggregator")?;

    let http_client = reqwest::Client::builder()
        .timeout(config.alerting.webhook_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let root = CancellationToken::new();

    let consumer = {
        let aggregator = Arc::clone(&aggregator);
        ServiceHandle::spawn("aggregator-consumer", &root, move |token| async move {
            aggregator.consume(subscription, token).await;
        })
    };

    let flusher = PersistenceFlusher::new(
        Arc::clone(&aggregator),
        ProjectRepository::new(db.clone()),
        EventRepository::new(db.clone()),
        config.persistence.flush_interval(),
        config.persistence.flush_timeout(),
    );
    let flusher = ServiceHandle::spawn("persistence-flusher", &root, move |token| {
        flusher.run(token)
    });

    let scheduler = AlertingScheduler::new(
        AlertRepository::new(db.clone()),
        NotificationRepository::new(db.clone()),
        DestinationRepository::new(db.clone()),
        EventRepository::new(db.clone()),
        ChannelRegistry::with_defaults(http_client, system_clock()),
        config.alerting.tick_interval(),
        config.alerting.storage_timeout(),
    );
    let scheduler = ServiceHandle::spawn("alerting-scheduler", &root, move |token| {
        scheduler.run(token)
    });

    let cache_capacity = NonZeroUsize::new(config.project_cache_capacity)
        .context("Project cache capacity must be positive")?;
    let projects = ProjectCache::new(
        ProjectRepository::new(db.clone()),
        cache_capacity,
        config.project_cache_ttl(),
    );

    let state = AppState {
        config: Arc::new(config),
        db: db.clone(),
        aggregator,
        projects,
    };

    let http_shutdown = CancellationToken::new();
    tokio::spawn({
        let http_shutdown = http_shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            http_shutdown.cancel();
        }
    });

    let served = run_server(state, http_shutdown).await;

    // Consumer first so buffered events reach the buckets before the final flush.
    consumer.stop_and_wait().await;
    flusher.stop_and_wait().await;
    scheduler.stop_and_wait().await;
    root.cancel();

    if let Err(err) = db.close().await {
        tracing::warn!(error = %err, "Failed to close database pool");
    }

    info!("Periscope stopped");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
