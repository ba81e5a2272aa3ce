use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use leaseq_server::api::{self, AppState};
use leaseq_server::config::Cli;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env は無くてもよい
    dotenvy::dotenv().ok();

    fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(?cli, "starting leaseq");

    let queue = Arc::new(
        cli.open_queue()
            .with_context(|| format!("failed to open queue at {}", cli.path.display()))?,
    );
    let app = api::create_router(AppState::new(Arc::clone(&queue)));

    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;
    info!("listening on http://{}", cli.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown().await.context("failed to close queue")?;
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
