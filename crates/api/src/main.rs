use std::net::SocketAddr;

use anyhow::Context;
use keystone_infra::{KeystoneConfig, TokenCleanupWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keystone_observability::init();

    let config = KeystoneConfig::from_env().context("invalid configuration")?;
    tracing::info!(?config, "configuration loaded");

    let state = keystone_api::app::build_state(&config)
        .await
        .context("failed to initialize stores")?;

    let cleanup = config
        .cleanup_interval
        .map(|interval| TokenCleanupWorker::spawn(state.sessions.tokens().clone(), interval));

    let app = keystone_api::app::build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    if let Some(handle) = cleanup {
        handle.shutdown().await;
    }
    Ok(())
}
