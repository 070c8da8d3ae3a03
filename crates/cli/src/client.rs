//! Client for the platform status API

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use converge_lib::models::{InstanceStatus, WorkloadStatus};
use converge_lib::status::StatusApi;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;
use url::Url;

/// HTTP client for the status API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid API URL: {}", base_url);
        }

        Ok(Self { client, base_url })
    }

    /// Base URL extended with escaped path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid API URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

/// Body of `GET v1/services/{service}/{instance}/status`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceStatusResponse {
    #[serde(default)]
    pub git_sha: Option<String>,
    #[serde(default)]
    pub kubernetes: Option<WorkloadStatus>,
    #[serde(default)]
    pub marathon: Option<WorkloadStatus>,
}

impl From<InstanceStatusResponse> for InstanceStatus {
    fn from(response: InstanceStatusResponse) -> Self {
        match response.kubernetes.or(response.marathon) {
            Some(mut workload) => {
                if workload.git_sha.is_none() {
                    workload.git_sha = response.git_sha;
                }
                InstanceStatus::Managed(workload)
            }
            None => InstanceStatus::Unmanaged,
        }
    }
}

/// Body of `GET v1/services/{service}?deploy_group=...`
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceList {
    pub instances: Vec<String>,
}

#[async_trait]
impl StatusApi for ApiClient {
    async fn get_instance_status(&self, service: &str, instance: &str) -> Result<InstanceStatus> {
        let url = self.endpoint(&["v1", "services", service, instance, "status"])?;
        let response: InstanceStatusResponse = self
            .get(url)
            .await
            .with_context(|| format!("Failed to fetch status of {}.{}", service, instance))?;
        Ok(response.into())
    }

    async fn list_instances(&self, service: &str, deploy_group: &str) -> Result<Vec<String>> {
        let mut url = self.endpoint(&["v1", "services", service])?;
        url.query_pairs_mut().append_pair("deploy_group", deploy_group);
        let list: InstanceList = self
            .get(url)
            .await
            .with_context(|| format!("Failed to list instances of {} in {}", service, deploy_group))?;
        Ok(list.instances)
    }
}
