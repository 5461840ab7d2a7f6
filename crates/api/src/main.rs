use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use docflow_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let jwt_secret = config.jwt_secret.clone().unwrap_or_else(|| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });

    let services = Arc::new(docflow_api::app::build_services(config.clone()).await?);
    let background = config.embedded_worker.then(|| services.spawn_background());
    let app = docflow_api::app::build_app(services, &jwt_secret);

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    tracing::info!(addr = %listener.local_addr()?, embedded_worker = config.embedded_worker, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(background) = background {
        tracing::info!("draining embedded worker");
        background.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
