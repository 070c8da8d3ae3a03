//! Instance readiness evaluation
//!
//! Answers "is this instance running the commit we asked for, and has its
//! rollout settled?" from a live status snapshot.

use crate::models::{InstanceStatus, DEPLOY_STATUS_RUNNING};
use async_trait::async_trait;
use std::sync::Arc;

/// Live status queries against the platform status API
#[async_trait]
pub trait StatusApi: Send + Sync {
    /// Status snapshot for one instance
    async fn get_instance_status(&self, service: &str, instance: &str)
        -> anyhow::Result<InstanceStatus>;

    /// Instances of `service` that belong to `deploy_group` (possibly empty)
    async fn list_instances(&self, service: &str, deploy_group: &str)
        -> anyhow::Result<Vec<String>>;
}

/// Readiness predicate over a status snapshot.
///
/// Unmanaged instances are always ready. Managed instances are ready once the
/// observed sha is a prefix of `git_sha`, a single replica set exists, the
/// rollout reports "Running", and every expected replica is running.
pub fn is_instance_deployed(status: &InstanceStatus, git_sha: &str) -> bool {
    let workload = match status {
        InstanceStatus::Unmanaged => return true,
        InstanceStatus::Managed(workload) => workload,
    };

    let sha_matches = workload
        .git_sha
        .as_deref()
        .map(|observed| git_sha.starts_with(observed))
        .unwrap_or(false);
    let counts_match = match (
        workload.expected_instance_count,
        workload.running_instance_count,
    ) {
        (Some(expected), Some(running)) => expected == running,
        _ => false,
    };

    sha_matches
        && workload.app_count == Some(1)
        && workload.deploy_status.as_deref() == Some(DEPLOY_STATUS_RUNNING)
        && counts_match
}

/// Fetches instance status and evaluates readiness
#[derive(Clone)]
pub struct ReadinessOracle {
    api: Arc<dyn StatusApi>,
}

impl ReadinessOracle {
    pub fn new(api: Arc<dyn StatusApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn StatusApi> {
        &self.api
    }

    pub async fn is_ready(
        &self,
        service: &str,
        instance: &str,
        target_commit: &str,
    ) -> anyhow::Result<bool> {
        let status = self.api.get_instance_status(service, instance).await?;
        Ok(is_instance_deployed(&status, target_commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkloadStatus;

    const SHA: &str = "abc123def4567890";

    fn ready_status() -> WorkloadStatus {
        WorkloadStatus {
            git_sha: Some("abc123de".to_string()),
            app_count: Some(1),
            deploy_status: Some("Running".to_string()),
            expected_instance_count: Some(3),
            running_instance_count: Some(3),
        }
    }

    #[test]
    fn test_ready_when_all_conditions_hold() {
        assert!(is_instance_deployed(&InstanceStatus::Managed(ready_status()), SHA));
    }

    #[test]
    fn test_full_sha_also_matches() {
        let mut status = ready_status();
        status.git_sha = Some(SHA.to_string());
        assert!(is_instance_deployed(&InstanceStatus::Managed(status), SHA));
    }

    #[test]
    fn test_mismatched_sha_is_not_ready() {
        let mut status = ready_status();
        status.git_sha = Some("ffff0000".to_string());
        assert!(!is_instance_deployed(&InstanceStatus::Managed(status), SHA));
    }

    #[test]
    fn test_multiple_replica_sets_is_not_ready() {
        let mut status = ready_status();
        status.app_count = Some(2);
        assert!(!is_instance_deployed(&InstanceStatus::Managed(status), SHA));

        let mut status = ready_status();
        status.app_count = Some(0);
        assert!(!is_instance_deployed(&InstanceStatus::Managed(status), SHA));
    }

    #[test]
    fn test_deploy_status_must_be_running() {
        let mut status = ready_status();
        status.deploy_status = Some("Deploying".to_string());
        assert!(!is_instance_deployed(&InstanceStatus::Managed(status), SHA));
    }

    #[test]
    fn test_expected_must_equal_running() {
        let mut status = ready_status();
        status.running_instance_count = Some(2);
        assert!(!is_instance_deployed(&InstanceStatus::Managed(status), SHA));
    }

    #[test]
    fn test_missing_fields_are_not_ready() {
        assert!(!is_instance_deployed(
            &InstanceStatus::Managed(WorkloadStatus::default()),
            SHA
        ));

        let mut status = ready_status();
        status.expected_instance_count = None;
        status.running_instance_count = None;
        assert!(!is_instance_deployed(&InstanceStatus::Managed(status), SHA));
    }

    #[test]
    fn test_unmanaged_is_always_ready() {
        assert!(is_instance_deployed(&InstanceStatus::Unmanaged, SHA));
        assert!(is_instance_deployed(&InstanceStatus::Unmanaged, ""));
    }

    struct FixedStatus(InstanceStatus);

    #[async_trait]
    impl StatusApi for FixedStatus {
        async fn get_instance_status(&self, _: &str, _: &str) -> anyhow::Result<InstanceStatus> {
            Ok(self.0.clone())
        }

        async fn list_instances(&self, _: &str, _: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec!["main".to_string()])
        }
    }

    #[tokio::test]
    async fn test_oracle_queries_api() {
        let oracle = ReadinessOracle::new(Arc::new(FixedStatus(InstanceStatus::Managed(
            ready_status(),
        ))));
        assert!(oracle.is_ready("svc", "main", SHA).await.unwrap());
        assert!(!oracle.is_ready("svc", "main", "0000").await.unwrap());
    }
}
