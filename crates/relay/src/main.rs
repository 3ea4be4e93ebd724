use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use supplyreg_infra::RelayConfig;
use supplyreg_relay::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    supplyreg_observability::init();

    let config = RelayConfig::from_env().context("reading relay configuration")?;
    let services = Arc::new(app::services::build_services(&config).await?);
    let loops = services.start(&config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, producer_id = %config.producer_id, "relay listening");

    axum::serve(listener, app::build_app(services))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("ops server failed")?;

    for handle in loops {
        let name = handle.name();
        handle.shutdown().await;
        info!(job = name, "loop stopped");
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("could not listen for ctrl-c; shutting down immediately");
    }
    info!("shutdown requested");
}
