//! Deployment convergence library
//!
//! This crate provides the core functionality for:
//! - Signaling deploy intent by pushing a per-group git tag
//! - Waiting for a deploy group to converge on a commit
//! - Reconciling workloads, autoscalers and disruption budgets
//! - Rolling and brutal bounces
//! - Health checks and observability

pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconcile;
pub mod signal;
pub mod status;
pub mod waiter;

pub use error::{ClusterError, DeployError, Result};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{ConvergeMetrics, EventSink, MemoryEventSink, TracingEventSink};
pub use reconcile::{ApplicationReconciler, ReconcileOutcome, SyncAction, WorkloadAction};
pub use signal::{DeployIntentSignal, GitRefStore, RefStore};
pub use status::{ReadinessOracle, StatusApi};
pub use waiter::{DeploymentWaiter, WaitConfig};
