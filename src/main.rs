use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use recapd::api;
use recapd::audio::processor;
use recapd::audio::transcription::HttpTranscriber;
use recapd::config::Config;
use recapd::database::manager::DatabaseManager;
use recapd::jobs::{engine, monitor};
use recapd::notifications::listener;
use recapd::state::AppContext;
use recapd::summary::llm_client::HttpInferenceClient;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    config.validate().map_err(anyhow::Error::msg)?;

    info!("starting recapd...");
    let db = DatabaseManager::connect(&config.database_url)
        .await
        .context("failed to open database")?;

    let inference = Arc::new(HttpInferenceClient::new(&config));
    let transcriber = Arc::new(HttpTranscriber::new(&config));
    let ctx = AppContext::new(config, db, inference, transcriber).map_err(anyhow::Error::msg)?;

    let shutdown = CancellationToken::new();

    tokio::spawn(listener::run_update_listener(
        ctx.updates.clone(),
        ctx.bus.clone(),
        shutdown.child_token(),
    ));
    let workers = engine::spawn_workers(ctx.clone(), shutdown.child_token());
    tokio::spawn(monitor::run(ctx.clone(), shutdown.child_token()));
    let _audio_processor = processor::spawn(ctx.clone(), shutdown.child_token())
        .context("failed to start audio processor")?;

    let addr = format!("{}:{}", ctx.config.api_host, ctx.config.api_port);
    let tcp_listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on http://{}", addr);

    let serve_shutdown = shutdown.clone();
    axum::serve(tcp_listener, api::router(ctx.clone()))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .context("server error")?;

    // Let workers finish their current job, best effort.
    for handle in workers {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
    }

    ctx.db.cleanup().await;
    info!("shutdown complete");
    Ok(())
}
