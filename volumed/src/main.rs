use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use volumed::infrastructure::{audit, config::Settings, server, telemetry::TelemetryBuilder};
use volumed::volume::{Filesystem, Reaper, Repository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::new().context("Failed to load configuration")?;

    TelemetryBuilder::new("volumed", env!("CARGO_PKG_VERSION"))
        .with_settings(&config.telemetry)
        .init()?;

    info!("volumed starting...");
    audit::log_audit(&audit::AuditEvent::SystemStartup {
        component: "volumed".into(),
    });

    let filesystem = Filesystem::new(config.volumes.driver.build(), &config.volumes.root)
        .with_context(|| format!("Failed to prepare volume root {:?}", config.volumes.root))?;
    let namespacer = config.namespace.namespacer();
    info!(
        driver = ?config.volumes.driver,
        namespacer = %namespacer.cache_key(),
        "Opening repository at {:?}",
        filesystem.root()
    );

    let repository = tokio::task::spawn_blocking(move || Repository::open(filesystem, namespacer))
        .await?
        .context("Failed to open volume repository")?;
    let repository = Arc::new(repository);

    let reaper = Reaper::new(Arc::clone(&repository), config.reaper.interval()).spawn();

    let server_config = config.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_config, repository, shutdown_signal()).await {
            error!("Volume API failed: {:?}", e);
        }
    });

    info!("volumed initialized. Waiting for shutdown signal...");
    server.await?;
    reaper.abort();

    audit::log_audit(&audit::AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });
    info!("volumed shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, cleaning up...");
}
