//! Standalone worker process: drains the shared queue without serving HTTP.
//! Only meaningful with persistent stores; in-memory stores are per process.

use anyhow::Context;

use docflow_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    if !config.use_persistent_stores {
        tracing::warn!("USE_PERSISTENT_STORES is false; this worker only sees its own in-memory queue");
    }

    let services = docflow_api::app::build_services(config).await?;
    let background = services.spawn_background();
    tracing::info!(
        worker = %services.config.worker.name,
        concurrency = services.config.worker.concurrency,
        "worker running; ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down; waiting for in-flight jobs");
    background.shutdown().await;
    Ok(())
}
