//! Convergence agent
//!
//! Periodically converges every declared application against the cluster
//! and serves health and metrics endpoints.

pub mod api;
pub mod config;
pub mod sweep;
