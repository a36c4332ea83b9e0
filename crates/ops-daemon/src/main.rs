//! opsd - autonomous operations daemon

use anyhow::Context;
use ops_common::OpsConfig;
use ops_daemon::Engine;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match std::env::var("OPS_CONFIG") {
        Ok(path) => OpsConfig::from_file(std::path::Path::new(&path))
            .with_context(|| format!("loading config file {}", path))?,
        Err(_) => OpsConfig::from_env().context("reading configuration from environment")?,
    };

    let engine = Engine::build(config).context("building engine")?;
    info!(actions = engine.list_actions().len(), "opsd starting");

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    engine.start_monitors(cancel.clone(), &tracker);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, stopping loops");

    cancel.cancel();
    tracker.close();
    tracker.wait().await;
    info!("opsd stopped");
    Ok(())
}
