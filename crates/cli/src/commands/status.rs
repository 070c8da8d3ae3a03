//! `converge status`: per-instance rollout state of a deploy group

use anyhow::Result;
use colored::Colorize;
use converge_lib::models::InstanceStatus;
use converge_lib::status::{is_instance_deployed, StatusApi};
use serde::Serialize;
use tabled::Tabled;
use tracing::warn;

use crate::output::{color_ready, color_status, print_table, short_sha, OutputFormat};

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct StatusRow {
    #[tabled(rename = "Instance")]
    pub instance: String,
    #[tabled(rename = "Git sha", display_with = "display_sha")]
    pub git_sha: Option<String>,
    #[tabled(rename = "Status", display_with = "display_status")]
    pub deploy_status: Option<String>,
    #[tabled(rename = "Running")]
    pub replicas: String,
    #[tabled(rename = "Ready", display_with = "display_ready")]
    pub ready: Option<bool>,
}

fn display_sha(sha: &Option<String>) -> String {
    sha.as_deref().map(short_sha).unwrap_or("-").to_string()
}

fn display_status(status: &Option<String>) -> String {
    status.as_deref().map(color_status).unwrap_or_else(|| "-".to_string())
}

fn display_ready(ready: &Option<bool>) -> String {
    ready.map(color_ready).unwrap_or_else(|| "-".to_string())
}

fn count(n: Option<u32>) -> String {
    n.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
}

/// One row per instance. `ready` is only filled in when a commit is given.
pub fn status_row(instance: &str, status: &InstanceStatus, commit: Option<&str>) -> StatusRow {
    let ready = commit.map(|sha| is_instance_deployed(status, sha));
    match status {
        InstanceStatus::Unmanaged => StatusRow {
            instance: instance.to_string(),
            git_sha: None,
            deploy_status: Some("unmanaged".to_string()),
            replicas: "-".to_string(),
            ready,
        },
        InstanceStatus::Managed(workload) => StatusRow {
            instance: instance.to_string(),
            git_sha: workload.git_sha.clone(),
            deploy_status: workload.deploy_status.clone(),
            replicas: format!(
                "{}/{}",
                count(workload.running_instance_count),
                count(workload.expected_instance_count)
            ),
            ready,
        },
    }
}

pub async fn collect_rows(
    api: &dyn StatusApi,
    service: &str,
    deploy_group: &str,
    commit: Option<&str>,
) -> Result<Vec<StatusRow>> {
    let instances = api.list_instances(service, deploy_group).await?;
    let mut rows = Vec::with_capacity(instances.len());
    for instance in &instances {
        match api.get_instance_status(service, instance).await {
            Ok(status) => rows.push(status_row(instance, &status, commit)),
            Err(e) => {
                warn!(service = %service, instance = %instance, error = %e, "Status unavailable");
                rows.push(StatusRow {
                    instance: instance.clone(),
                    git_sha: None,
                    deploy_status: None,
                    replicas: "?".to_string(),
                    ready: commit.map(|_| false),
                });
            }
        }
    }
    Ok(rows)
}

pub async fn show_status(
    api: &dyn StatusApi,
    service: &str,
    deploy_group: &str,
    commit: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let rows = collect_rows(api, service, deploy_group, commit).await?;

    if matches!(format, OutputFormat::Table) {
        println!(
            "{} {} in {}",
            "Status of".bold(),
            service.cyan(),
            deploy_group.cyan()
        );
    }
    print_table(&rows, format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use converge_lib::models::WorkloadStatus;

    struct TwoInstances;

    #[async_trait]
    impl StatusApi for TwoInstances {
        async fn get_instance_status(&self, _: &str, instance: &str) -> Result<InstanceStatus> {
            match instance {
                "main" => Ok(InstanceStatus::Managed(WorkloadStatus {
                    git_sha: Some("abc123de".to_string()),
                    app_count: Some(1),
                    deploy_status: Some("Running".to_string()),
                    expected_instance_count: Some(3),
                    running_instance_count: Some(3),
                })),
                _ => anyhow::bail!("connection reset"),
            }
        }

        async fn list_instances(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Ok(vec!["main".to_string(), "canary".to_string()])
        }
    }

    #[tokio::test]
    async fn test_rows_for_deploy_group() {
        let rows = collect_rows(&TwoInstances, "kurupt", "prod.main", Some("abc123def"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].replicas, "3/3");
        assert_eq!(rows[0].ready, Some(true));
        assert_eq!(rows[1].instance, "canary");
        assert_eq!(rows[1].ready, Some(false));
    }

    #[test]
    fn test_unmanaged_row_without_commit() {
        let row = status_row("batch", &InstanceStatus::Unmanaged, None);
        assert_eq!(row.deploy_status.as_deref(), Some("unmanaged"));
        assert_eq!(row.ready, None);
    }

    #[test]
    fn test_partial_status_renders_unknown_counts() {
        let status = InstanceStatus::Managed(WorkloadStatus {
            running_instance_count: Some(1),
            ..Default::default()
        });
        assert_eq!(status_row("main", &status, None).replicas, "1/?");
    }
}
