//! Cluster resource access
//!
//! The reconcilers talk to the cluster through [`ClusterClient`] handles that
//! are injected at construction time. Destructive background work gets its own
//! handle from a [`ClientFactory`], so it never shares a connection with the
//! caller.

mod kube_client;

pub use kube_client::{KubeClientFactory, KubeClusterClient};

use crate::error::ClusterError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Resource kinds, used in logs, metrics and errors
pub mod kinds {
    pub const WORKLOAD: &str = "Deployment";
    pub const AUTOSCALER: &str = "HorizontalPodAutoscaler";
    pub const DISRUPTION_BUDGET: &str = "PodDisruptionBudget";
    pub const POD: &str = "Pod";
}

/// Typed CRUD over the resources this engine manages.
///
/// Reads of missing resources return [`ClusterError::NotFound`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn read_workload(&self, namespace: &str, name: &str) -> ClusterResult<Deployment>;
    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()>;
    /// Replace the workload in place; the orchestrator rolls it out
    async fn replace_workload(
        &self,
        namespace: &str,
        name: &str,
        workload: &Deployment,
    ) -> ClusterResult<()>;
    /// Delete the workload, cascading to its replica sets and pods
    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    async fn read_autoscaler(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<HorizontalPodAutoscaler>;
    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &HorizontalPodAutoscaler,
    ) -> ClusterResult<()>;
    /// Overwrite the autoscaler spec wholesale
    async fn patch_autoscaler(
        &self,
        namespace: &str,
        name: &str,
        autoscaler: &HorizontalPodAutoscaler,
    ) -> ClusterResult<()>;
    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    async fn read_disruption_budget(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<PodDisruptionBudget>;
    async fn create_disruption_budget(
        &self,
        namespace: &str,
        budget: &PodDisruptionBudget,
    ) -> ClusterResult<()>;
    async fn patch_disruption_budget(
        &self,
        namespace: &str,
        name: &str,
        budget: &PodDisruptionBudget,
    ) -> ClusterResult<()>;
    async fn delete_disruption_budget(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Delete matching pods immediately, skipping graceful termination
    async fn force_delete_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> ClusterResult<()>;
}

/// Builds independent cluster clients
pub trait ClientFactory: Send + Sync {
    /// A new client with its own connection, never shared with an existing one
    fn fresh_client(&self) -> ClusterResult<Arc<dyn ClusterClient>>;
}
