//! Pod disruption budget reconciliation

use super::{record_write, workload::app_labels, SyncAction};
use crate::cluster::{kinds, ClusterClient};
use crate::error::{DeployError, Result};
use crate::models::DesiredApplication;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info};

/// Replicas allowed to be down at once: the share of `instances` outside the
/// bounce margin, rounded down.
pub fn max_unavailable(instances: u32, bounce_margin_factor: f64) -> i32 {
    let raw = instances as f64 * (1.0 - bounce_margin_factor);
    // absorb float error, e.g. 100 * (1 - 0.9) = 9.999999999999998
    (raw + 1e-9).floor().max(0.0) as i32
}

pub fn disruption_budget_for_application(
    app: &DesiredApplication,
    max_unavailable: i32,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(app.resource_name()),
            namespace: Some(app.namespace.clone()),
            labels: Some(app_labels(app)),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            selector: Some(LabelSelector {
                match_labels: Some(app_labels(app)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Converge the disruption budget for `app` sized against `instance_count`.
///
/// A live budget is always patched to the computed value, even when it
/// already matches.
pub async fn sync_disruption_budget(
    client: &dyn ClusterClient,
    app: &DesiredApplication,
    instance_count: u32,
) -> Result<SyncAction> {
    let namespace = &app.namespace;
    let name = app.resource_name();
    let budget = max_unavailable(instance_count, app.spec.bounce_margin_factor);
    let desired = disruption_budget_for_application(app, budget);

    match client.read_disruption_budget(namespace, &name).await {
        Err(e) if e.is_not_found() => {
            info!(%namespace, %name, max_unavailable = budget, "Creating disruption budget");
            client.create_disruption_budget(namespace, &desired).await?;
            record_write(kinds::DISRUPTION_BUDGET, "create");
            Ok(SyncAction::Created)
        }
        Err(e) => Err(DeployError::fetch(kinds::DISRUPTION_BUDGET, name, e)),
        Ok(_) => {
            debug!(%namespace, %name, max_unavailable = budget, "Patching disruption budget");
            client.patch_disruption_budget(namespace, &name, &desired).await?;
            record_write(kinds::DISRUPTION_BUDGET, "patch");
            Ok(SyncAction::Patched)
        }
    }
}
