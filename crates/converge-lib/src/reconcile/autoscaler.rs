//! Horizontal autoscaler reconciliation

use super::{record_write, workload::app_labels, SyncAction};
use crate::cluster::{kinds, ClusterClient};
use crate::error::{DeployError, Result};
use crate::models::{AutoscalingParams, AutoscalingPolicy, DesiredApplication, MetricsProvider};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricIdentifier, MetricSpec, MetricTarget, PodsMetricSource, ResourceMetricSource,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

fn metric_spec(params: &AutoscalingParams) -> MetricSpec {
    match params.metrics_provider {
        MetricsProvider::Cpu => MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "cpu".to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some((params.setpoint * 100.0).round() as i32),
                    ..Default::default()
                },
            }),
            ..Default::default()
        },
        MetricsProvider::Http | MetricsProvider::Uwsgi => MetricSpec {
            type_: "Pods".to_string(),
            pods: Some(PodsMetricSource {
                metric: MetricIdentifier {
                    name: params.metrics_provider.as_str().to_string(),
                    selector: None,
                },
                target: MetricTarget {
                    type_: "AverageValue".to_string(),
                    average_value: Some(Quantity(params.setpoint.to_string())),
                    ..Default::default()
                },
            }),
            ..Default::default()
        },
    }
}

/// Desired autoscaler for `app`, or `None` when this engine should not own one
pub fn autoscaler_for_application(app: &DesiredApplication) -> Option<HorizontalPodAutoscaler> {
    let AutoscalingPolicy::Managed {
        min_replicas,
        max_replicas,
        params,
    } = app.spec.autoscaling_policy()
    else {
        return None;
    };
    let name = app.resource_name();

    Some(HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(app.namespace.clone()),
            labels: Some(app_labels(app)),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            min_replicas: Some(min_replicas as i32),
            max_replicas: max_replicas as i32,
            metrics: Some(vec![metric_spec(&params)]),
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: kinds::WORKLOAD.to_string(),
                name,
            },
            ..Default::default()
        }),
        status: None,
    })
}

async fn autoscaler_exists(client: &dyn ClusterClient, namespace: &str, name: &str) -> Result<bool> {
    match client.read_autoscaler(namespace, name).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(DeployError::fetch(kinds::AUTOSCALER, name, e)),
    }
}

/// Converge the autoscaler for `app`.
///
/// Bespoke autoscaling is never touched. Without autoscaling any live
/// autoscaler is deleted. Managed autoscaling creates the resource, or
/// overwrites the live spec wholesale.
pub async fn sync_autoscaler(client: &dyn ClusterClient, app: &DesiredApplication) -> Result<SyncAction> {
    let namespace = &app.namespace;
    let name = app.resource_name();

    if app.spec.autoscaling_policy() == AutoscalingPolicy::Bespoke {
        debug!(%namespace, %name, "Autoscaling is bespoke, leaving autoscaler alone");
        return Ok(SyncAction::Skipped);
    }

    let exists = autoscaler_exists(client, namespace, &name).await?;
    let Some(desired) = autoscaler_for_application(app) else {
        if !exists {
            return Ok(SyncAction::Unchanged);
        }
        info!(%namespace, %name, "Autoscaling no longer requested, deleting autoscaler");
        client.delete_autoscaler(namespace, &name).await?;
        record_write(kinds::AUTOSCALER, "delete");
        return Ok(SyncAction::Deleted);
    };

    if exists {
        debug!(%namespace, %name, "Patching autoscaler");
        client.patch_autoscaler(namespace, &name, &desired).await?;
        record_write(kinds::AUTOSCALER, "patch");
        Ok(SyncAction::Patched)
    } else {
        info!(%namespace, %name, "Creating autoscaler");
        client.create_autoscaler(namespace, &desired).await?;
        record_write(kinds::AUTOSCALER, "create");
        Ok(SyncAction::Created)
    }
}
