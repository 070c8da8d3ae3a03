//! Core data models for deployment convergence

use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};

/// Literal deploy status reported by the status API once a workload settled
pub const DEPLOY_STATUS_RUNNING: &str = "Running";

/// Namespace used for managed resources when none is configured
pub const DEFAULT_NAMESPACE: &str = "paasta";

pub const SERVICE_LABEL: &str = "paasta.io/service";
pub const INSTANCE_LABEL: &str = "paasta.io/instance";
pub const CONFIG_SHA_LABEL: &str = "paasta.io/config_sha";

/// Request to run a commit in a deploy group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployIntent {
    pub service: String,
    pub deploy_group: String,
    pub commit: String,
}

/// Workload-management section of an instance status snapshot.
///
/// Every field is optional: the status API omits fields while a workload is
/// still being created, and a missing field simply means "not ready yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    #[serde(default)]
    pub git_sha: Option<String>,
    #[serde(default)]
    pub app_count: Option<u32>,
    #[serde(default)]
    pub deploy_status: Option<String>,
    #[serde(default)]
    pub expected_instance_count: Option<u32>,
    #[serde(default)]
    pub running_instance_count: Option<u32>,
}

/// Live status of one service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Instance runs as a managed workload exposing rollout status
    Managed(WorkloadStatus),
    /// Instance is handled by another mechanism (batch jobs, adhoc, ...)
    Unmanaged,
}

/// Update strategy for an existing workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BounceMethod {
    /// In-place update using the orchestrator's rollout mechanics
    #[default]
    Rolling,
    /// Delete the workload and its dependents, then recreate them
    Brutal,
}

/// Source of the metric an autoscaler scales on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsProvider {
    #[default]
    Cpu,
    Http,
    Uwsgi,
}

impl MetricsProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricsProvider::Cpu => "cpu",
            MetricsProvider::Http => "http",
            MetricsProvider::Uwsgi => "uwsgi",
        }
    }
}

/// Who makes scaling decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionPolicy {
    #[default]
    Proportional,
    /// Scaling is driven by a system outside this engine
    Bespoke,
}

/// Autoscaling parameters as declared in service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingParams {
    #[serde(default)]
    pub metrics_provider: MetricsProvider,
    #[serde(default)]
    pub decision_policy: DecisionPolicy,
    #[serde(default = "default_setpoint")]
    pub setpoint: f64,
}

fn default_setpoint() -> f64 {
    0.8
}

impl Default for AutoscalingParams {
    fn default() -> Self {
        Self {
            metrics_provider: MetricsProvider::default(),
            decision_policy: DecisionPolicy::default(),
            setpoint: default_setpoint(),
        }
    }
}

/// Autoscaling behaviour derived from a desired spec
#[derive(Debug, Clone, PartialEq)]
pub enum AutoscalingPolicy {
    /// No autoscaling requested; any live autoscaler must go
    Absent,
    /// This engine owns the autoscaler resource
    Managed {
        min_replicas: u32,
        max_replicas: u32,
        params: AutoscalingParams,
    },
    /// The autoscaler is owned elsewhere and left untouched
    Bespoke,
}

/// Desired application settings read by the reconcilers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredApplicationSpec {
    #[serde(default)]
    pub bounce_method: BounceMethod,
    #[serde(default)]
    pub instances: Option<u32>,
    #[serde(default)]
    pub min_instances: Option<u32>,
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub autoscaling: Option<AutoscalingParams>,
    #[serde(default = "default_bounce_margin_factor")]
    pub bounce_margin_factor: f64,
}

fn default_bounce_margin_factor() -> f64 {
    1.0
}

impl Default for DesiredApplicationSpec {
    fn default() -> Self {
        Self {
            bounce_method: BounceMethod::default(),
            instances: None,
            min_instances: None,
            max_instances: None,
            autoscaling: None,
            bounce_margin_factor: default_bounce_margin_factor(),
        }
    }
}

impl DesiredApplicationSpec {
    pub fn min_instances(&self) -> u32 {
        self.min_instances.unwrap_or(1)
    }

    /// Derive the autoscaling policy. Autoscaling is only requested when an
    /// upper instance bound is declared.
    pub fn autoscaling_policy(&self) -> AutoscalingPolicy {
        let Some(max_replicas) = self.max_instances else {
            return AutoscalingPolicy::Absent;
        };
        let params = self.autoscaling.clone().unwrap_or_default();
        match params.decision_policy {
            DecisionPolicy::Bespoke => AutoscalingPolicy::Bespoke,
            DecisionPolicy::Proportional => AutoscalingPolicy::Managed {
                min_replicas: self.min_instances(),
                max_replicas,
                params,
            },
        }
    }

    /// Replica count the disruption budget is computed against
    pub fn target_instances(&self, live_replicas: Option<u32>) -> u32 {
        match self.instances {
            Some(n) => n,
            None if self.max_instances.is_some() => {
                live_replicas.unwrap_or_else(|| self.min_instances())
            }
            None => 1,
        }
    }
}

/// One service instance this engine converges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredApplication {
    pub service: String,
    pub instance: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub spec: DesiredApplicationSpec,
    /// Desired workload manifest rendered from service configuration
    pub workload: Deployment,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl DesiredApplication {
    /// Cluster-safe name shared by the workload and its dependents
    pub fn resource_name(&self) -> String {
        sanitise_name(&format!("{}-{}", self.service, self.instance))
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.service, self.instance)
    }
}

/// Lower-case a name and replace underscores, which are invalid in resource names
pub fn sanitise_name(name: &str) -> String {
    name.replace('_', "--").to_lowercase()
}
