//! One reconcile sweep over every declared application

use converge_lib::{
    health::{components, HealthRegistry},
    models::DesiredApplication,
    reconcile::{ApplicationReconciler, BounceHandle, WorkloadAction},
    DeployError,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Counts from one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub reconciled: usize,
    /// Applications skipped because a background recreate is still running
    pub skipped: usize,
    pub failed: usize,
}

/// Drives the reconciler over the application list, keeping at most one
/// background recreate per application in flight
pub struct Sweeper {
    reconciler: ApplicationReconciler,
    health: HealthRegistry,
    in_flight: HashMap<String, BounceHandle>,
}

impl Sweeper {
    pub fn new(reconciler: ApplicationReconciler, health: HealthRegistry) -> Self {
        Self {
            reconciler,
            health,
            in_flight: HashMap::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true while `key` still has a recreate running. A finished
    /// recreate is reaped and its result logged.
    async fn busy(&mut self, key: &str) -> bool {
        match self.in_flight.get(key) {
            None => false,
            Some(handle) if !handle.is_finished() => true,
            Some(_) => {
                if let Some(handle) = self.in_flight.remove(key) {
                    match handle.join().await {
                        Ok(()) => info!(app = %key, "Background recreate finished"),
                        Err(e) => warn!(app = %key, error = %e, "Background recreate failed"),
                    }
                }
                false
            }
        }
    }

    pub async fn sweep(&mut self, apps: &[DesiredApplication]) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let mut cluster_error = None;

        for app in apps {
            let key = app.key();
            if self.busy(&key).await {
                debug!(app = %key, "Recreate still running, skipping");
                summary.skipped += 1;
                continue;
            }

            match self.reconciler.reconcile(app).await {
                Ok(outcome) => {
                    summary.reconciled += 1;
                    if let WorkloadAction::Recreating(handle) = outcome.workload {
                        self.in_flight.insert(key, handle);
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    if matches!(
                        e,
                        DeployError::ReconciliationFetch { .. } | DeployError::Cluster(_)
                    ) {
                        cluster_error = Some(e.to_string());
                    }
                }
            }
        }

        match cluster_error {
            Some(e) => self.health.record_failure(components::CLUSTER_CLIENT, e).await,
            None => self.health.record_success(components::CLUSTER_CLIENT).await,
        }
        if summary.failed == 0 {
            self.health.record_success(components::RECONCILER).await;
        } else {
            let message = format!("{} of {} applications failed", summary.failed, apps.len());
            self.health.record_failure(components::RECONCILER, message).await;
        }
        self.health.mark_synced().await;

        info!(
            reconciled = summary.reconciled,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reconcile sweep complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use converge_lib::cluster::{ClientFactory, ClusterClient, ClusterResult};
    use converge_lib::health::ComponentStatus;
    use converge_lib::models::{BounceMethod, DesiredApplicationSpec};
    use converge_lib::ClusterError;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
    use k8s_openapi::api::policy::v1::PodDisruptionBudget;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Cluster with an optional unlabelled live workload. Writes succeed,
    /// other reads miss.
    #[derive(Default)]
    struct StubCluster {
        live: Option<Deployment>,
        unreachable: bool,
        /// Workload deletes never return
        stall_deletes: bool,
    }

    #[async_trait]
    impl ClusterClient for StubCluster {
        async fn read_workload(&self, _: &str, _: &str) -> ClusterResult<Deployment> {
            if self.unreachable {
                return Err(ClusterError::Client("connection refused".to_string()));
            }
            self.live.clone().ok_or(ClusterError::NotFound)
        }
        async fn create_workload(&self, _: &str, _: &Deployment) -> ClusterResult<()> {
            Ok(())
        }
        async fn replace_workload(&self, _: &str, _: &str, _: &Deployment) -> ClusterResult<()> {
            Ok(())
        }
        async fn delete_workload(&self, _: &str, _: &str) -> ClusterResult<()> {
            if self.stall_deletes {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
        async fn read_autoscaler(&self, _: &str, _: &str) -> ClusterResult<HorizontalPodAutoscaler> {
            Err(ClusterError::NotFound)
        }
        async fn create_autoscaler(&self, _: &str, _: &HorizontalPodAutoscaler) -> ClusterResult<()> {
            Ok(())
        }
        async fn patch_autoscaler(
            &self,
            _: &str,
            _: &str,
            _: &HorizontalPodAutoscaler,
        ) -> ClusterResult<()> {
            Ok(())
        }
        async fn delete_autoscaler(&self, _: &str, _: &str) -> ClusterResult<()> {
            Ok(())
        }
        async fn read_disruption_budget(&self, _: &str, _: &str) -> ClusterResult<PodDisruptionBudget> {
            Err(ClusterError::NotFound)
        }
        async fn create_disruption_budget(&self, _: &str, _: &PodDisruptionBudget) -> ClusterResult<()> {
            Ok(())
        }
        async fn patch_disruption_budget(
            &self,
            _: &str,
            _: &str,
            _: &PodDisruptionBudget,
        ) -> ClusterResult<()> {
            Ok(())
        }
        async fn delete_disruption_budget(&self, _: &str, _: &str) -> ClusterResult<()> {
            Ok(())
        }
        async fn force_delete_pods(&self, _: &str, _: &BTreeMap<String, String>) -> ClusterResult<()> {
            Ok(())
        }
    }

    struct StubFactory;

    impl ClientFactory for StubFactory {
        fn fresh_client(&self) -> ClusterResult<Arc<dyn ClusterClient>> {
            Ok(Arc::new(StubCluster {
                stall_deletes: true,
                ..Default::default()
            }))
        }
    }

    fn app(bounce_method: BounceMethod) -> DesiredApplication {
        DesiredApplication {
            service: "kurupt".to_string(),
            instance: "fm".to_string(),
            namespace: "paasta".to_string(),
            spec: DesiredApplicationSpec {
                instances: Some(1),
                bounce_method,
                ..Default::default()
            },
            workload: Deployment::default(),
        }
    }

    fn sweeper(cluster: StubCluster, health: HealthRegistry) -> Sweeper {
        let reconciler = ApplicationReconciler::new(Arc::new(cluster), Arc::new(StubFactory));
        Sweeper::new(reconciler, health)
    }

    #[tokio::test]
    async fn test_sweep_marks_agent_ready() {
        let health = HealthRegistry::new();
        let mut sweeper = sweeper(StubCluster::default(), health.clone());

        let summary = sweeper.sweep(&[app(BounceMethod::Rolling)]).await;

        assert_eq!(summary.reconciled, 1);
        assert_eq!(summary.failed, 0);
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_running_recreate_is_not_bounced_again() {
        let cluster = StubCluster {
            live: Some(Deployment::default()),
            ..Default::default()
        };
        let mut sweeper = sweeper(cluster, HealthRegistry::new());
        let apps = [app(BounceMethod::Brutal)];

        let first = sweeper.sweep(&apps).await;
        assert_eq!(first.reconciled, 1);
        assert_eq!(sweeper.in_flight(), 1);

        let second = sweeper.sweep(&apps).await;
        assert_eq!(second.skipped, 1);
        assert_eq!(second.reconciled, 0);
        assert_eq!(sweeper.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cluster_failures_reported_to_health() {
        let cluster = StubCluster {
            unreachable: true,
            ..Default::default()
        };
        let health = HealthRegistry::with_failure_threshold(1);
        let mut sweeper = sweeper(cluster, health.clone());

        let summary = sweeper.sweep(&[app(BounceMethod::Rolling)]).await;

        assert_eq!(summary.failed, 1);
        let report = health.health().await;
        assert_eq!(report.status, ComponentStatus::Unhealthy);
        assert_eq!(
            report.components[components::RECONCILER].last_error.as_deref(),
            Some("1 of 1 applications failed")
        );
        assert!(!health.readiness().await.ready);
    }
}
