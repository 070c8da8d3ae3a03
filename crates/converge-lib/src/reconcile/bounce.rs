//! Bounce strategies for existing workloads

use super::workload::{deep_delete_and_create, rolling_workload};
use super::record_write;
use crate::cluster::{kinds, ClientFactory, ClusterClient};
use crate::error::{DeployError, Result};
use crate::models::{BounceMethod, DesiredApplication};
use k8s_openapi::api::apps::v1::Deployment;
use crate::observability::ConvergeMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

/// Timing of the background delete-and-recreate path
#[derive(Debug, Clone)]
pub struct RecreateSettings {
    /// How often to check whether the deleted workload is gone
    pub deletion_poll_interval: Duration,
    /// How long to wait before force deleting lingering pods
    pub deletion_timeout: Duration,
}

impl Default for RecreateSettings {
    fn default() -> Self {
        Self {
            deletion_poll_interval: Duration::from_secs(1),
            deletion_timeout: Duration::from_secs(60),
        }
    }
}

/// Handle to a running background recreate
#[derive(Debug)]
pub struct BounceHandle {
    handle: JoinHandle<Result<()>>,
}

impl BounceHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the background task and surface its result
    pub async fn join(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| DeployError::BounceTask(e.to_string()))?
    }
}

#[derive(Debug)]
pub enum BounceOutcome {
    /// The workload was replaced in place
    Rolled,
    Recreating(BounceHandle),
}

/// Applies a changed workload using the application's bounce method
pub struct BounceController {
    client: Arc<dyn ClusterClient>,
    factory: Arc<dyn ClientFactory>,
    settings: RecreateSettings,
    metrics: ConvergeMetrics,
}

impl BounceController {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        factory: Arc<dyn ClientFactory>,
        settings: RecreateSettings,
    ) -> Self {
        Self {
            client,
            factory,
            settings,
            metrics: ConvergeMetrics::new(),
        }
    }

    /// Push the desired workload for `app` over the `live` one.
    ///
    /// A brutal bounce hands the work to a background task on a freshly built
    /// client and returns as soon as the task is spawned.
    pub async fn update(
        &self,
        app: &DesiredApplication,
        live: &Deployment,
    ) -> Result<BounceOutcome> {
        let namespace = &app.namespace;
        let name = app.resource_name();

        match app.spec.bounce_method {
            BounceMethod::Rolling => {
                self.client
                    .replace_workload(namespace, &name, &rolling_workload(app, live))
                    .await?;
                record_write(kinds::WORKLOAD, "replace");
                info!(%namespace, %name, "Replaced workload for rolling update");
                Ok(BounceOutcome::Rolled)
            }
            BounceMethod::Brutal => {
                let client = self.factory.fresh_client()?;
                let app = app.clone();
                let settings = self.settings.clone();
                let span = tracing::info_span!("brutal_bounce", app = %app.key());

                info!(%namespace, %name, "Launching background delete and recreate");
                let handle = tokio::spawn(
                    async move {
                        let result =
                            deep_delete_and_create(client.as_ref(), &app, &settings).await;
                        match &result {
                            Ok(()) => info!("Recreated workload"),
                            Err(e) => error!(error = %e, "Delete and recreate failed"),
                        }
                        result
                    }
                    .instrument(span),
                );
                self.metrics.inc_brutal_bounces();
                Ok(BounceOutcome::Recreating(BounceHandle { handle }))
            }
        }
    }
}
