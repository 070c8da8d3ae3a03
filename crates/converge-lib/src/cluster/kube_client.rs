//! Kubernetes-backed cluster client

use super::{ClientFactory, ClusterClient, ClusterResult};
use crate::error::ClusterError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Field manager recorded on server-side apply patches
const FIELD_MANAGER: &str = "converge";

/// Cluster client over a `kube::Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> ClusterResult<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn workloads(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn autoscalers(&self, namespace: &str) -> Api<HorizontalPodAutoscaler> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn budgets(&self, namespace: &str) -> Api<PodDisruptionBudget> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn read_workload(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        Ok(self.workloads(namespace).get(name).await?)
    }

    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        self.workloads(namespace)
            .create(&PostParams::default(), workload)
            .await?;
        Ok(())
    }

    async fn replace_workload(
        &self,
        namespace: &str,
        name: &str,
        workload: &Deployment,
    ) -> ClusterResult<()> {
        self.workloads(namespace)
            .replace(name, &PostParams::default(), workload)
            .await?;
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.workloads(namespace)
            .delete(name, &DeleteParams::foreground())
            .await?;
        Ok(())
    }

    async fn read_autoscaler(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<HorizontalPodAutoscaler> {
        Ok(self.autoscalers(namespace).get(name).await?)
    }

    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &HorizontalPodAutoscaler,
    ) -> ClusterResult<()> {
        self.autoscalers(namespace)
            .create(&PostParams::default(), autoscaler)
            .await?;
        Ok(())
    }

    async fn patch_autoscaler(
        &self,
        namespace: &str,
        name: &str,
        autoscaler: &HorizontalPodAutoscaler,
    ) -> ClusterResult<()> {
        self.autoscalers(namespace)
            .patch(name, &Self::apply_params(), &Patch::Apply(autoscaler))
            .await?;
        Ok(())
    }

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.autoscalers(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn read_disruption_budget(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<PodDisruptionBudget> {
        Ok(self.budgets(namespace).get(name).await?)
    }

    async fn create_disruption_budget(
        &self,
        namespace: &str,
        budget: &PodDisruptionBudget,
    ) -> ClusterResult<()> {
        self.budgets(namespace)
            .create(&PostParams::default(), budget)
            .await?;
        Ok(())
    }

    async fn patch_disruption_budget(
        &self,
        namespace: &str,
        name: &str,
        budget: &PodDisruptionBudget,
    ) -> ClusterResult<()> {
        self.budgets(namespace)
            .patch(name, &Self::apply_params(), &Patch::Apply(budget))
            .await?;
        Ok(())
    }

    async fn delete_disruption_budget(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.budgets(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn force_delete_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> ClusterResult<()> {
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        debug!(%namespace, %selector, "force deleting pods");

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::default()
        };
        pods.delete_collection(&params, &ListParams::default().labels(&selector))
            .await?;
        Ok(())
    }
}

/// Builds a new `kube::Client`, with its own connection pool, per call
#[derive(Clone)]
pub struct KubeClientFactory {
    config: Config,
}

impl KubeClientFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Infer cluster configuration from kubeconfig or the in-cluster environment
    pub async fn infer() -> ClusterResult<Self> {
        let config = Config::infer()
            .await
            .map_err(|e| ClusterError::Client(e.to_string()))?;
        Ok(Self::new(config))
    }
}

impl ClientFactory for KubeClientFactory {
    fn fresh_client(&self) -> ClusterResult<Arc<dyn ClusterClient>> {
        let client = Client::try_from(self.config.clone())?;
        Ok(Arc::new(KubeClusterClient::new(client)))
    }
}
