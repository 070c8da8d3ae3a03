//! Liveness and readiness state for the convergence agent
//!
//! Components report the outcome of each unit of work. A component turns
//! degraded on its first failure and unhealthy once failures keep coming.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component is reported unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Component names for health tracking
pub mod components {
    /// The periodic reconcile loop
    pub const RECONCILER: &str = "reconciler";
    /// Connectivity to the cluster API
    pub const CLUSTER_CLIENT: &str = "cluster_client";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn fresh() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            consecutive_failures: 0,
            last_error: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    /// Set once the first full reconcile sweep finished
    synced: bool,
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
    failure_threshold: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(failure_threshold: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::fresh());
    }

    /// Record a successful unit of work, clearing any failure streak
    pub async fn record_success(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::fresh());
    }

    /// Record a failed unit of work
    pub async fn record_failure(&self, name: &str, error: impl Into<String>) {
        let mut state = self.state.write().await;
        let entry = state
            .components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::fresh);

        entry.consecutive_failures += 1;
        entry.last_error = Some(error.into());
        entry.last_check_timestamp = chrono::Utc::now().timestamp();
        entry.status = if entry.consecutive_failures >= self.failure_threshold {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
    }

    /// Mark the first reconcile sweep as done
    pub async fn mark_synced(&self) {
        self.state.write().await.synced = true;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = components
            .values()
            .map(|c| c.status)
            .max_by_key(|s| match s {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let synced = self.state.read().await.synced;
        if !synced {
            return ReadinessResponse {
                ready: false,
                reason: Some("Initial reconcile sweep has not completed".to_string()),
            };
        }

        let unhealthy: Vec<String> = self
            .health()
            .await
            .components
            .into_iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name)
            .collect();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}
