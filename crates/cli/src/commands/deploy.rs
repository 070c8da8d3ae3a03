//! Deployment commands: mark a commit for a deploy group, and wait for it

use anyhow::Result;
use converge_lib::models::DeployIntent;
use converge_lib::observability::{emit_deploy_event, EventSink};
use converge_lib::signal::{DeployIntentSignal, RefStore};
use converge_lib::status::{ReadinessOracle, StatusApi};
use converge_lib::waiter::{DeploymentWaiter, WaitConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Service names may be given as their repository name
pub fn strip_services_prefix(service: &str) -> &str {
    service.strip_prefix("services-").unwrap_or(service)
}

/// Check the service has a configuration directory under `soa_dir`
pub fn validate_service_name(service: &str, soa_dir: Option<&Path>) -> Result<()> {
    let Some(soa_dir) = soa_dir else {
        return Ok(());
    };
    if !soa_dir.join(service).is_dir() {
        anyhow::bail!(
            "Service {} not found in {}. Check the service name",
            service,
            soa_dir.display()
        );
    }
    Ok(())
}

/// Options for `converge mark-for-deployment`
#[derive(Debug, Clone)]
pub struct MarkForDeployment {
    pub git_url: String,
    pub commit: String,
    pub deploy_group: String,
    pub service: String,
    pub wait: bool,
    pub timeout_secs: u64,
    pub soa_dir: Option<PathBuf>,
}

/// Collaborators shared by the deployment commands
#[derive(Clone)]
pub struct DeployContext {
    pub refs: Arc<dyn RefStore>,
    pub status: Arc<dyn StatusApi>,
    pub events: Arc<dyn EventSink>,
    /// Pause between readiness sweeps while waiting
    pub poll_interval: Duration,
}

pub async fn mark_for_deployment(ctx: &DeployContext, args: &MarkForDeployment) -> Result<()> {
    let service = strip_services_prefix(&args.service);
    validate_service_name(service, args.soa_dir.as_deref())?;

    let intent = DeployIntent {
        service: service.to_string(),
        deploy_group: args.deploy_group.clone(),
        commit: args.commit.clone(),
    };
    DeployIntentSignal::new(ctx.refs.clone(), ctx.events.clone())
        .signal(&args.git_url, &intent)
        .await?;

    if args.wait {
        wait_for_deployment(ctx, service, &args.deploy_group, &args.commit, args.timeout_secs)
            .await?;
    }
    Ok(())
}

/// Block until every instance in `deploy_group` runs `commit`
pub async fn wait_for_deployment(
    ctx: &DeployContext,
    service: &str,
    deploy_group: &str,
    commit: &str,
    timeout_secs: u64,
) -> Result<()> {
    let service = strip_services_prefix(service);
    emit_deploy_event(
        ctx.events.as_ref(),
        service,
        &format!("Waiting for deployment of {} to {} complete", commit, deploy_group),
    );

    let config = WaitConfig {
        poll_interval: ctx.poll_interval,
        timeout: Duration::from_secs(timeout_secs),
    };
    let waiter = DeploymentWaiter::new(
        ReadinessOracle::new(ctx.status.clone()),
        ctx.events.clone(),
        config,
    );
    waiter.wait(service, deploy_group, commit).await?;

    emit_deploy_event(
        ctx.events.as_ref(),
        service,
        &format!("Deployment of {} to {} complete", commit, deploy_group),
    );
    info!(service = %service, deploy_group = %deploy_group, commit = %commit, "Deployment complete");
    Ok(())
}
