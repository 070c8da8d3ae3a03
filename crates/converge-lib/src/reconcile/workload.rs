//! Workload rendering, creation and destructive recreation

use super::bounce::RecreateSettings;
use super::{record_write, sync_autoscaler, sync_disruption_budget, SyncAction};
use crate::cluster::{kinds, ClusterClient};
use crate::error::{DeployError, Result};
use crate::models::{
    AutoscalingPolicy, DesiredApplication, CONFIG_SHA_LABEL, INSTANCE_LABEL, SERVICE_LABEL,
};
use k8s_openapi::api::apps::v1::Deployment;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Labels identifying the resources of one application
pub fn app_labels(app: &DesiredApplication) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVICE_LABEL.to_string(), app.service.clone()),
        (INSTANCE_LABEL.to_string(), app.instance.clone()),
    ])
}

/// Short digest of a workload's spec, used to detect config changes
pub fn config_sha(workload: &Deployment) -> String {
    let spec = serde_json::to_vec(&workload.spec).unwrap_or_default();
    let digest = Sha256::digest(&spec);
    format!("config{}", &hex::encode(digest)[..8])
}

/// Config sha recorded on a live workload, if any
pub fn live_config_sha(live: &Deployment) -> Option<&str> {
    live.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CONFIG_SHA_LABEL))
        .map(String::as_str)
}

/// The workload manifest as it should exist in the cluster: named,
/// namespaced and labelled for this application
pub fn desired_workload(app: &DesiredApplication) -> Deployment {
    let mut workload = app.workload.clone();
    let sha = config_sha(&workload);

    workload.metadata.name = Some(app.resource_name());
    workload.metadata.namespace = Some(app.namespace.clone());
    let labels = workload.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.extend(app_labels(app));
    labels.insert(CONFIG_SHA_LABEL.to_string(), sha);
    workload
}

/// The workload to roll out over `live`.
///
/// Autoscaled applications keep the live replica count. The config sha label
/// still reflects the rendered manifest, so the next pass sees no change.
pub fn rolling_workload(app: &DesiredApplication, live: &Deployment) -> Deployment {
    let mut workload = desired_workload(app);
    if matches!(app.spec.autoscaling_policy(), AutoscalingPolicy::Absent) {
        return workload;
    }
    let live_replicas = live.spec.as_ref().and_then(|s| s.replicas);
    if let (Some(replicas), Some(spec)) = (live_replicas, workload.spec.as_mut()) {
        spec.replicas = Some(replicas);
    }
    workload
}

/// Create the workload and its dependents.
///
/// Returns the autoscaler and disruption budget actions.
pub async fn create_application(
    client: &dyn ClusterClient,
    app: &DesiredApplication,
) -> Result<(SyncAction, SyncAction)> {
    let workload = desired_workload(app);
    client.create_workload(&app.namespace, &workload).await?;
    record_write(kinds::WORKLOAD, "create");
    info!(namespace = %app.namespace, name = %app.resource_name(), "Created workload");

    let budget = sync_disruption_budget(client, app, app.spec.target_instances(None)).await?;
    let autoscaler = sync_autoscaler(client, app).await?;
    Ok((autoscaler, budget))
}

fn ignore_not_found(result: std::result::Result<(), crate::error::ClusterError>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}

/// Delete the workload and its dependents, wait for the workload deletion to
/// land, then create everything again from the desired spec.
///
/// When the workload lingers past `settings.deletion_timeout` its pods are
/// force deleted and creation proceeds anyway.
pub async fn deep_delete_and_create(
    client: &dyn ClusterClient,
    app: &DesiredApplication,
    settings: &RecreateSettings,
) -> Result<()> {
    let namespace = &app.namespace;
    let name = app.resource_name();

    info!(%namespace, %name, "Deleting workload for recreation");
    ignore_not_found(client.delete_workload(namespace, &name).await)?;
    record_write(kinds::WORKLOAD, "delete");
    ignore_not_found(client.delete_autoscaler(namespace, &name).await)?;
    ignore_not_found(client.delete_disruption_budget(namespace, &name).await)?;

    let mut waited = Duration::ZERO;
    loop {
        match client.read_workload(namespace, &name).await {
            Err(e) if e.is_not_found() => break,
            Err(e) => return Err(DeployError::fetch(kinds::WORKLOAD, name, e)),
            Ok(_) => {}
        }
        if waited >= settings.deletion_timeout {
            warn!(
                %namespace,
                %name,
                waited_secs = waited.as_secs(),
                "Workload still present after deletion, force deleting its pods"
            );
            if let Err(e) = client.force_delete_pods(namespace, &app_labels(app)).await {
                warn!(%namespace, %name, error = %e, "Force deleting pods failed");
            } else {
                record_write(kinds::POD, "force_delete");
            }
            break;
        }
        sleep(settings.deletion_poll_interval).await;
        waited += settings.deletion_poll_interval;
    }

    create_application(client, app).await?;
    Ok(())
}
