//! Health Monitor - Main Entry Point
//!
//! Runs the NATS telemetry subscriber in the background and serves the
//! current record over HTTP.

use anyhow::{Context, Result};
use health_monitor::{connect_nats, create_app, AppState, Config, TelemetrySubscriber};
use std::sync::Arc;
use telemetry_store::{RecordStore, TelemetryState};
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse_config();

    init_logging(config.log_json);

    info!("Starting Health Monitor");
    info!("Configuration:");
    info!("  NATS URL: {}", config.nats_url);
    info!("  Topic: {}", config.topic);
    info!("  Subject filter: {}", config.subject_filter());
    info!("  Data file: {}", config.data_file.display());
    info!("  Liveness threshold: {}s", config.liveness_threshold_secs);

    let telemetry = Arc::new(TelemetryState::open(RecordStore::new(&config.data_file)));

    // Ingestion runs independently of the HTTP surface; losing the broker
    // only stops new samples from arriving.
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let subscriber = TelemetrySubscriber::new(Arc::clone(&telemetry), config.subject_filter());
    let client = connect_nats(&config).await?;
    let subscriber_task = tokio::spawn(async move {
        if let Err(e) = subscriber.run(&client, shutdown_rx).await {
            error!("Telemetry subscriber failed: {:#}", e);
        }
    });

    let state = AppState::new(telemetry, config.liveness_threshold())?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Health Monitor listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down subscriber");
    let _ = shutdown_tx.send(());
    if let Err(e) = subscriber_task.await {
        error!("Subscriber task panicked: {}", e);
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,health_monitor=debug,telemetry_store=debug"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
