//! Convergence agent
//!
//! Runs inside the cluster, converging every declared application's
//! workload, autoscaler and disruption budget on a fixed interval.

use anyhow::{Context, Result};
use converge_agent::{api, config, sweep::Sweeper};
use converge_lib::{
    cluster::{KubeClientFactory, KubeClusterClient},
    health::{components, HealthRegistry},
    observability::ConvergeMetrics,
    reconcile::ApplicationReconciler,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting converge-agent");

    let config = config::AgentConfig::load()?;
    info!(
        namespace = %config.namespace,
        apps_path = %config.apps_path.display(),
        interval_secs = config.reconcile_interval_secs,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::RECONCILER).await;
    health_registry.register(components::CLUSTER_CLIENT).await;
    let metrics = ConvergeMetrics::new();

    let client = KubeClusterClient::try_default()
        .await
        .context("failed to connect to the cluster")?;
    let factory = KubeClientFactory::infer()
        .await
        .context("failed to infer cluster configuration")?;
    let reconciler = ApplicationReconciler::new(Arc::new(client), Arc::new(factory));
    let mut sweeper = Sweeper::new(reconciler, health_registry.clone());

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = shutdown_rx.await;
    }));

    let mut ticker = tokio::time::interval(Duration::from_secs(config.reconcile_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match config::load_applications(&config.apps_path, &config.namespace) {
                    Ok(apps) => {
                        sweeper.sweep(&apps).await;
                    }
                    Err(e) => warn!(error = %e, "Skipping sweep, applications unavailable"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!(in_flight = sweeper.in_flight(), "Shutdown signal received");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }
    info!("Shutting down");

    Ok(())
}
