use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use eyre::{eyre, Result};

use dispatcher::config::{DispatcherArgs, DispatcherConfig};
use dispatcher::data_tracker::DataTracker;
use dispatcher::http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = DispatcherArgs::parse();
    let cfg = DispatcherConfig::from_args(args).map_err(|e| eyre!(e))?;
    let bind_addr = cfg.bind_addr.clone();

    let tracker = Arc::new(DataTracker::new(cfg).map_err(|e| eyre!(e))?);
    let (router, shutting_down) = http::router(tracker.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| eyre!("failed to bind {bind_addr}: {e}"))?;
    tracing::info!(%bind_addr, "dispatcher listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutting_down))
        .await
        .map_err(|e| eyre!("server error: {e}"))?;

    tracker.close().map_err(|e| eyre!(e))?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Waits for Ctrl-C, then flips the shared flag so in-flight and
/// newly-arriving requests start seeing `503 server_unavailable` while
/// axum drains the handlers already running.
async fn shutdown_signal(shutting_down: Arc<std::sync::atomic::AtomicBool>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("ctrl-c received; starting graceful shutdown");
    shutting_down.store(true, Ordering::Release);
}
