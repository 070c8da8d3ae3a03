//! Resource reconciliation
//!
//! This module provides:
//! - Autoscaler and disruption-budget reconcilers (create / patch / delete)
//! - Workload rendering with config-sha change detection
//! - Bounce strategies, including the background delete-and-recreate path
//! - A full application pass tying the above together

mod autoscaler;
mod bounce;
mod disruption_budget;
mod workload;


pub use autoscaler::{autoscaler_for_application, sync_autoscaler};
pub use bounce::{BounceController, BounceHandle, BounceOutcome, RecreateSettings};
pub use disruption_budget::{
    disruption_budget_for_application, max_unavailable, sync_disruption_budget,
};
pub use workload::{
    app_labels, config_sha, create_application, deep_delete_and_create, desired_workload,
    live_config_sha, rolling_workload,
};

use crate::cluster::{kinds, ClientFactory, ClusterClient};
use crate::error::{DeployError, Result};
use crate::observability::ConvergeMetrics;
use crate::models::DesiredApplication;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What a reconciler did to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Patched,
    Deleted,
    /// Desired and live state already agree
    Unchanged,
    /// Resource is owned elsewhere or handled by another task
    Skipped,
}

/// What a pass did to the workload itself
#[derive(Debug)]
pub enum WorkloadAction {
    Created,
    Unchanged,
    Rolled,
    /// A background delete-and-recreate was launched
    Recreating(BounceHandle),
}

/// Result of one application pass
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub workload: WorkloadAction,
    pub autoscaler: SyncAction,
    pub disruption_budget: SyncAction,
}

/// Converges one application's workload, autoscaler and disruption budget
pub struct ApplicationReconciler {
    client: Arc<dyn ClusterClient>,
    bounce: BounceController,
    metrics: ConvergeMetrics,
}

impl ApplicationReconciler {
    pub fn new(client: Arc<dyn ClusterClient>, factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_settings(client, factory, RecreateSettings::default())
    }

    pub fn with_settings(
        client: Arc<dyn ClusterClient>,
        factory: Arc<dyn ClientFactory>,
        settings: RecreateSettings,
    ) -> Self {
        Self {
            bounce: BounceController::new(client.clone(), factory, settings),
            client,
            metrics: ConvergeMetrics::new(),
        }
    }

    /// Run one reconciliation pass for `app`
    #[instrument(skip_all, fields(app = %app.key()))]
    pub async fn reconcile(&self, app: &DesiredApplication) -> Result<ReconcileOutcome> {
        self.metrics.inc_reconcile_passes();
        let result = self.reconcile_inner(app).await;
        if let Err(e) = &result {
            self.metrics.inc_reconcile_errors();
            warn!(error = %e, "Reconcile pass failed");
        }
        result
    }

    async fn reconcile_inner(&self, app: &DesiredApplication) -> Result<ReconcileOutcome> {
        let client = self.client.as_ref();
        let namespace = &app.namespace;
        let name = app.resource_name();

        let live = match client.read_workload(namespace, &name).await {
            Ok(live) => Some(live),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(DeployError::fetch(kinds::WORKLOAD, name, e)),
        };

        let Some(live) = live else {
            info!(%namespace, %name, "Workload missing, creating");
            let (autoscaler, disruption_budget) = create_application(client, app).await?;
            return Ok(ReconcileOutcome {
                workload: WorkloadAction::Created,
                autoscaler,
                disruption_budget,
            });
        };

        let desired_sha = config_sha(&desired_workload(app));
        let workload = if live_config_sha(&live) == Some(desired_sha.as_str()) {
            WorkloadAction::Unchanged
        } else {
            info!(%namespace, %name, config_sha = %desired_sha, "Workload config changed, bouncing");
            match self.bounce.update(app, &live).await? {
                BounceOutcome::Rolled => WorkloadAction::Rolled,
                BounceOutcome::Recreating(handle) => {
                    // The background task recreates the dependents itself
                    return Ok(ReconcileOutcome {
                        workload: WorkloadAction::Recreating(handle),
                        autoscaler: SyncAction::Skipped,
                        disruption_budget: SyncAction::Skipped,
                    });
                }
            }
        };

        let live_replicas = live
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .map(|r| r.max(0) as u32);
        let autoscaler = sync_autoscaler(client, app).await?;
        let disruption_budget =
            sync_disruption_budget(client, app, app.spec.target_instances(live_replicas)).await?;

        Ok(ReconcileOutcome {
            workload,
            autoscaler,
            disruption_budget,
        })
    }
}

fn record_write(kind: &str, operation: &str) {
    ConvergeMetrics::new().record_write(kind, operation);
}
