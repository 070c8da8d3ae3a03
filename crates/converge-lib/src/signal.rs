//! Deploy intent signaling
//!
//! Marks a commit as intended for a deploy group by force-moving a tag in the
//! service's git repository. Downstream components watch these tags to learn
//! what should be running where.

use crate::error::{DeployError, Result};
use crate::models::DeployIntent;
use crate::observability::{emit_deploy_event, EventSink};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// Desired state encoded in deploy tags
const DEPLOY_STATE: &str = "deploy";

/// Tag name for a deploy group, e.g. `paasta-cluster1.main-deploy`
pub fn deploy_tag(deploy_group: &str) -> String {
    format!("paasta-{}-{}", deploy_group, DEPLOY_STATE)
}

/// Fully-qualified ref for a deploy group
pub fn deploy_ref_name(deploy_group: &str) -> String {
    format!("refs/tags/{}", deploy_tag(deploy_group))
}

/// Remote reference store
#[async_trait]
pub trait RefStore: Send + Sync {
    /// Point `ref_name` at `commit`, replacing whatever it pointed at before
    async fn create_or_force_update_ref(
        &self,
        repo_location: &str,
        ref_name: &str,
        commit: &str,
    ) -> anyhow::Result<()>;
}

/// Reference store backed by the `git` command line
#[derive(Debug, Clone, Default)]
pub struct GitRefStore {
    workdir: Option<PathBuf>,
}

impl GitRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run git from a checkout that contains the commits being pushed
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

#[async_trait]
impl RefStore for GitRefStore {
    async fn create_or_force_update_ref(
        &self,
        repo_location: &str,
        ref_name: &str,
        commit: &str,
    ) -> anyhow::Result<()> {
        let refspec = format!("{}:{}", commit, ref_name);
        let mut cmd = Command::new("git");
        cmd.args(["push", "--force", repo_location, &refspec]);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        debug!(repo = %repo_location, refspec = %refspec, "Pushing deploy ref");
        let output = cmd
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to run git: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git push of {} failed:\n{}", refspec, stderr.trim_end());
        }
        Ok(())
    }
}

/// Writes deploy intents and records the outcome in the audit trail
pub struct DeployIntentSignal {
    refs: Arc<dyn RefStore>,
    events: Arc<dyn EventSink>,
}

impl DeployIntentSignal {
    pub fn new(refs: Arc<dyn RefStore>, events: Arc<dyn EventSink>) -> Self {
        Self { refs, events }
    }

    /// Mark `intent.commit` for deployment in `intent.deploy_group`.
    ///
    /// Failures are returned as [`DeployError::SignalFailure`]; the audit trail
    /// receives one line on success, or a header line followed by every line
    /// of the underlying cause on failure.
    pub async fn signal(&self, repo_location: &str, intent: &DeployIntent) -> Result<()> {
        let ref_name = deploy_ref_name(&intent.deploy_group);
        let result = self
            .refs
            .create_or_force_update_ref(repo_location, &ref_name, &intent.commit)
            .await;

        match result {
            Ok(()) => {
                emit_deploy_event(
                    self.events.as_ref(),
                    &intent.service,
                    &format!(
                        "Marked {} for deployment in deploy group {}",
                        intent.commit, intent.deploy_group
                    ),
                );
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(
                    service = %intent.service,
                    deploy_group = %intent.deploy_group,
                    commit = %intent.commit,
                    error = %message,
                    "Failed to push deploy ref"
                );
                emit_deploy_event(
                    self.events.as_ref(),
                    &intent.service,
                    &format!(
                        "Failed to mark {} for deployment in deploy group {}!",
                        intent.commit, intent.deploy_group
                    ),
                );
                for line in message.split('\n') {
                    emit_deploy_event(self.events.as_ref(), &intent.service, line);
                }
                Err(DeployError::SignalFailure {
                    commit: intent.commit.clone(),
                    deploy_group: intent.deploy_group.clone(),
                    message,
                })
            }
        }
    }
}
