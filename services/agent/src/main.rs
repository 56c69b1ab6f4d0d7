//! menmos agent
//!
//! Serves the node control API until interrupted, then stops every node
//! before exiting.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use menmos_agent::api::{create_router, AppState};
use menmos_agent::{Agent, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        release_repo = %config.release_repo,
        "Starting menmos agent"
    );

    let listen_addr = config.listen_addr;
    let agent = Arc::new(Agent::new(config).await?);
    agent.restore_all().await?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listen_addr, "Control API listening");

    let app = create_router(AppState::new(agent.clone()));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("HTTP server exited"),
                Ok(Err(e)) => error!(error = %e, "HTTP server error"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    agent.shutdown().await;

    info!("menmos agent shutdown complete");
    Ok(())
}
