//! lifeline-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lifeline_api::{app, AppState, SosConfig, SosService};
use lifeline_core::defaults::SERVER_PORT;
use lifeline_core::{EventBus, NotificationSink};
use lifeline_db::{log_pool_metrics, Database, PoolConfig};
use lifeline_jobs::{
    LogNotificationSink, NotificationDispatcher, ReaperWorker, StaleIncidentReaper,
    WebhookNotificationSink, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "lifeline_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lifeline_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("lifeline-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/lifeline".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(SERVER_PORT);

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    db.migrate().await?;
    log_pool_metrics(db.pool());
    info!("Database ready");

    let repos = db.repositories();
    let event_bus = EventBus::default();

    let sink: Arc<dyn NotificationSink> = match WebhookNotificationSink::from_env()? {
        Some(webhook) => {
            info!(url = %webhook.url(), "Delivering notifications via webhook");
            Arc::new(webhook)
        }
        None => {
            warn!("NOTIFY_WEBHOOK_URL not set; notifications are only logged");
            Arc::new(LogNotificationSink)
        }
    };

    let dispatcher =
        NotificationDispatcher::new(&repos, sink).with_event_bus(event_bus.clone());
    let sos_config = SosConfig::from_env();
    info!(
        match_radius_m = sos_config.match_radius_m,
        match_limit = sos_config.match_limit,
        match_timeout_ms = sos_config.match_timeout.as_millis() as u64,
        "SOS matching configured"
    );
    let service = SosService::new(repos.clone(), dispatcher, event_bus.clone(), sos_config);

    let reaper =
        StaleIncidentReaper::new(repos.events.clone()).with_event_bus(event_bus.clone());
    let reaper_handle = ReaperWorker::new(reaper, WorkerConfig::from_env()).start();

    let state = AppState::new(service, repos.identity.clone());
    let router = app(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = reaper_handle.shutdown().await {
        warn!(error = %e, "Reaper worker already stopped");
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
