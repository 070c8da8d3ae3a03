//! Deployment convergence waiting
//!
//! Polls readiness for every instance in a deploy group until all of them run
//! the target commit, or a hard deadline passes.

use crate::error::{DeployError, Result};
use crate::observability::{emit_deploy_event, ConvergeMetrics, EventSink};
use crate::status::ReadinessOracle;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Default deployment timeout in seconds
pub const DEFAULT_DEPLOYMENT_TIMEOUT_SECS: u64 = 1200;

/// Default pause between readiness sweeps
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for a convergence wait
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Pause between readiness sweeps
    pub poll_interval: Duration,
    /// Wall-clock deadline measured from the start of the wait
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Duration::from_secs(DEFAULT_DEPLOYMENT_TIMEOUT_SECS),
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Waits for a deploy group to converge on a commit
pub struct DeploymentWaiter {
    oracle: ReadinessOracle,
    events: Arc<dyn EventSink>,
    config: WaitConfig,
    metrics: ConvergeMetrics,
}

impl DeploymentWaiter {
    pub fn new(oracle: ReadinessOracle, events: Arc<dyn EventSink>, config: WaitConfig) -> Self {
        Self {
            oracle,
            events,
            config,
            metrics: ConvergeMetrics::new(),
        }
    }

    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    /// Block until every instance of `deploy_group` runs `git_sha`.
    ///
    /// Fails with [`DeployError::NoInstancesFound`] when the group is empty and
    /// with [`DeployError::DeploymentTimeout`] once the deadline passes. The
    /// deadline also covers listing the instances.
    pub async fn wait(&self, service: &str, deploy_group: &str, git_sha: &str) -> Result<()> {
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        let listing = self.oracle.api().list_instances(service, deploy_group);
        let instances = match timeout_at(deadline, listing).await {
            Ok(listed) => listed.map_err(|e| DeployError::StatusApi(format!("{:#}", e)))?,
            Err(_) => return Err(self.timed_out(service, deploy_group, git_sha, start)),
        };

        if instances.is_empty() {
            emit_deploy_event(
                self.events.as_ref(),
                service,
                &format!(
                    "Couldn't find any instances for service {} in deploy group {}",
                    service, deploy_group
                ),
            );
            return Err(DeployError::NoInstancesFound {
                service: service.to_string(),
                deploy_group: deploy_group.to_string(),
            });
        }

        info!(
            service = %service,
            deploy_group = %deploy_group,
            git_sha = %git_sha,
            instances = instances.len(),
            timeout_secs = self.config.timeout.as_secs(),
            "Waiting for deployment"
        );

        match timeout_at(deadline, self.poll_until_ready(service, &instances, git_sha)).await {
            Ok(()) => {
                let elapsed = start.elapsed();
                self.metrics.observe_wait_duration(elapsed.as_secs_f64());
                info!(
                    service = %service,
                    deploy_group = %deploy_group,
                    elapsed_secs = elapsed.as_secs(),
                    "Deployment converged"
                );
                Ok(())
            }
            Err(_) => Err(self.timed_out(service, deploy_group, git_sha, start)),
        }
    }

    /// Record the timeout and point the operator at the status command
    fn timed_out(
        &self,
        service: &str,
        deploy_group: &str,
        git_sha: &str,
        start: Instant,
    ) -> DeployError {
        let elapsed_secs = start.elapsed().as_secs();
        self.metrics.observe_wait_duration(elapsed_secs as f64);
        emit_deploy_event(
            self.events.as_ref(),
            service,
            &format!(
                "Timed out after {} seconds, waiting for {} in {} to be deployed. \
                 Try running 'converge status -s {} -l {} -c {}' to determine the cause. \
                 If the service is slow to start you may wish to increase the timeout",
                elapsed_secs, deploy_group, service, service, deploy_group, git_sha
            ),
        );
        DeployError::DeploymentTimeout {
            service: service.to_string(),
            deploy_group: deploy_group.to_string(),
            elapsed_secs,
        }
    }

    async fn poll_until_ready(&self, service: &str, instances: &[String], git_sha: &str) {
        loop {
            if self.all_ready(service, instances, git_sha).await {
                return;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// One fresh sweep over every instance; nothing carries over between sweeps
    async fn all_ready(&self, service: &str, instances: &[String], git_sha: &str) -> bool {
        let mut ready = 0usize;
        for instance in instances {
            match self.oracle.is_ready(service, instance, git_sha).await {
                Ok(true) => ready += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        service = %service,
                        instance = %instance,
                        error = %e,
                        "Failed to fetch instance status, treating as not ready"
                    );
                }
            }
        }
        debug!(service = %service, ready, total = instances.len(), "Readiness sweep");
        ready == instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceStatus, WorkloadStatus};
    use crate::observability::MemoryEventSink;
    use crate::status::StatusApi;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SHA: &str = "abc123def456";

    fn ready() -> Option<InstanceStatus> {
        Some(InstanceStatus::Managed(WorkloadStatus {
            git_sha: Some("abc123de".to_string()),
            app_count: Some(1),
            deploy_status: Some("Running".to_string()),
            expected_instance_count: Some(2),
            running_instance_count: Some(2),
        }))
    }

    fn deploying() -> Option<InstanceStatus> {
        Some(InstanceStatus::Managed(WorkloadStatus {
            git_sha: Some("abc123de".to_string()),
            app_count: Some(2),
            deploy_status: Some("Deploying".to_string()),
            expected_instance_count: Some(2),
            running_instance_count: Some(1),
        }))
    }

    /// Status API replaying a script per instance; `None` entries are API errors.
    /// The last entry repeats once the script runs out.
    struct ScriptedStatus {
        instances: Vec<String>,
        scripts: Mutex<HashMap<String, VecDeque<Option<InstanceStatus>>>>,
        status_calls: AtomicUsize,
    }

    impl ScriptedStatus {
        fn new(scripts: Vec<(&str, Vec<Option<InstanceStatus>>)>) -> Self {
            Self {
                instances: scripts.iter().map(|(name, _)| name.to_string()).collect(),
                scripts: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|(name, script)| (name.to_string(), script.into()))
                        .collect(),
                ),
                status_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusApi for ScriptedStatus {
        async fn get_instance_status(&self, _: &str, instance: &str) -> anyhow::Result<InstanceStatus> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.get_mut(instance).unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            next.ok_or_else(|| anyhow::anyhow!("status api unavailable"))
        }

        async fn list_instances(&self, _: &str, _: &str) -> anyhow::Result<Vec<String>> {
            Ok(self.instances.clone())
        }
    }

    fn waiter(api: Arc<ScriptedStatus>, sink: Arc<MemoryEventSink>, timeout_secs: u64) -> DeploymentWaiter {
        DeploymentWaiter::new(
            ReadinessOracle::new(api),
            sink,
            WaitConfig::with_timeout(Duration::from_secs(timeout_secs)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_instances_fails_immediately() {
        let api = Arc::new(ScriptedStatus::new(vec![]));
        let sink = Arc::new(MemoryEventSink::new());
        let start = Instant::now();

        let err = waiter(api.clone(), sink.clone(), 60)
            .wait("svc", "cluster1.main", SHA)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::NoInstancesFound { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            sink.lines(),
            vec!["Couldn't find any instances for service svc in deploy group cluster1.main".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_interval_of_deadline() {
        let api = Arc::new(ScriptedStatus::new(vec![("main", vec![deploying()])]));
        let sink = Arc::new(MemoryEventSink::new());
        let start = Instant::now();

        let err = waiter(api, sink.clone(), 25)
            .wait("svc", "cluster1.main", SHA)
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(25));
        assert!(elapsed < Duration::from_secs(25) + DEFAULT_POLL_INTERVAL);
        match err {
            DeployError::DeploymentTimeout { elapsed_secs, .. } => assert_eq!(elapsed_secs, 25),
            other => panic!("unexpected error: {other:?}"),
        }
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Timed out after 25 seconds"));
        assert!(lines[0].contains("converge status -s svc -l cluster1.main -c abc123def456"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_instance_listing_still_times_out() {
        struct HungListing;

        #[async_trait]
        impl StatusApi for HungListing {
            async fn get_instance_status(&self, _: &str, _: &str) -> anyhow::Result<InstanceStatus> {
                unreachable!("no instances were listed")
            }

            async fn list_instances(&self, _: &str, _: &str) -> anyhow::Result<Vec<String>> {
                std::future::pending().await
            }
        }

        let sink = Arc::new(MemoryEventSink::new());
        let waiter = DeploymentWaiter::new(
            ReadinessOracle::new(Arc::new(HungListing)),
            sink.clone(),
            WaitConfig::with_timeout(Duration::from_secs(30)),
        );
        let start = Instant::now();

        let err = waiter.wait("svc", "cluster1.main", SHA).await.unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert!(matches!(err, DeployError::DeploymentTimeout { elapsed_secs: 30, .. }));
        assert!(sink.lines()[0].starts_with("Timed out after 30 seconds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_once_all_instances_ready() {
        let api = Arc::new(ScriptedStatus::new(vec![
            ("canary", vec![deploying(), ready()]),
            ("main", vec![deploying(), deploying(), ready()]),
        ]));
        let sink = Arc::new(MemoryEventSink::new());
        let start = Instant::now();

        waiter(api.clone(), sink.clone(), 600)
            .wait("svc", "cluster1.main", SHA)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 6);
        assert!(sink.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_instance_is_rechecked_every_sweep() {
        // canary is ready first, then regresses while main catches up
        let api = Arc::new(ScriptedStatus::new(vec![
            ("canary", vec![ready(), deploying(), ready()]),
            ("main", vec![deploying(), ready(), ready()]),
        ]));
        let sink = Arc::new(MemoryEventSink::new());
        let start = Instant::now();

        waiter(api.clone(), sink, 600)
            .wait("svc", "cluster1.main", SHA)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_errors_count_as_not_ready() {
        let api = Arc::new(ScriptedStatus::new(vec![("main", vec![None, ready()])]));
        let sink = Arc::new(MemoryEventSink::new());

        waiter(api.clone(), sink, 600)
            .wait("svc", "cluster1.main", SHA)
            .await
            .unwrap();

        assert_eq!(api.status_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_config_default() {
        let config = WaitConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_secs(1200));
    }
}
