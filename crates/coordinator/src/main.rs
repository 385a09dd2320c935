use axum::routing::get;
use axum::Router;
use coordinator::broadcaster::Broadcaster;
use coordinator::coordinator::Coordinator;
use coordinator::loops::{
    job_status_relay_loop, result_ingest_loop, satellite_monitor_loop, scheduler_promotion_loop,
};
use coordinator::{health, ws, AppState};
use core::broker::Broker;
use core::config::Config;
use core::job_store::{InMemoryJobStore, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let broker = Broker::connect(&config.redis_url, &config.queue).await?;
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let broadcaster = Broadcaster::new();

    let coordinator = Coordinator::new(
        broker,
        store,
        broadcaster.clone(),
        config.monitoring.crawler_timeout as i64,
    );

    let shutdown = CancellationToken::new();

    let scheduler_interval = Duration::from_secs(config.queue.scheduler_interval);
    let result_loop = tokio::spawn(result_ingest_loop(coordinator.clone(), shutdown.clone()));
    let scheduler_loop = tokio::spawn(scheduler_promotion_loop(
        coordinator.clone(),
        scheduler_interval,
        shutdown.clone(),
    ));
    let monitor_loop = tokio::spawn(satellite_monitor_loop(
        coordinator.clone(),
        scheduler_interval,
        shutdown.clone(),
    ));
    let status_relay_loop = tokio::spawn(job_status_relay_loop(coordinator.clone(), shutdown.clone()));

    let state = AppState {
        coordinator,
        broadcaster,
    };
    let app = Router::new()
        .route("/health", get(health::health))
        .route("/ws", get(ws::dashboard_ws))
        .with_state(state);

    let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("SERVER_PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "coordinator listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining background loops");
    shutdown.cancel();

    let _ = tokio::join!(
        result_loop,
        scheduler_loop,
        monitor_loop,
        status_relay_loop,
        server
    );
    Ok(())
}
