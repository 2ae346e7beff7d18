use crate::api;
use crate::infrastructure::config::{BindAddress, Settings};
use crate::volume::Repository;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::Future;
use std::sync::Arc;

async fn health_check() -> &'static str {
    "OK"
}

/// Volume API plus the control-plane health routes, without `/metrics`.
pub fn app(repository: Arc<Repository>) -> Router {
    Router::new()
        .route("/health/live", get(health_check))
        .route("/health/ready", get(health_check))
        .merge(api::router(repository))
}

/// Runs the HTTP server until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the Prometheus recorder cannot be installed, the
/// address is invalid, or the server fails while running.
pub async fn run_server(
    config: &Settings,
    repository: Arc<Repository>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))?;

    let app = app(repository).route("/metrics", get(move || std::future::ready(handle.render())));

    let addr = BindAddress::from(&config.server).to_socket_addr()?;
    tracing::info!("Volume API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
