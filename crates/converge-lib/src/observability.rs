//! Observability infrastructure for convergence
//!
//! Provides:
//! - Prometheus metrics (reconcile passes, resource writes, bounces, waits)
//! - The audit event sink used for human-readable deploy events

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::{Mutex, OnceLock};
use tracing::info;

/// Histogram buckets for deployment wait durations (in seconds)
const WAIT_BUCKETS: &[f64] = &[10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 2400.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ConvergeMetricsInner> = OnceLock::new();

struct ConvergeMetricsInner {
    reconcile_passes: IntCounter,
    reconcile_errors: IntCounter,
    brutal_bounces: IntCounter,
    resource_writes: IntCounterVec,
    wait_duration_seconds: Histogram,
}

impl ConvergeMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_passes: register_int_counter!(
                "converge_reconcile_passes_total",
                "Total number of application reconcile passes"
            )
            .expect("Failed to register reconcile_passes"),

            reconcile_errors: register_int_counter!(
                "converge_reconcile_errors_total",
                "Total number of failed application reconcile passes"
            )
            .expect("Failed to register reconcile_errors"),

            brutal_bounces: register_int_counter!(
                "converge_brutal_bounces_total",
                "Total number of background delete-and-recreate bounces launched"
            )
            .expect("Failed to register brutal_bounces"),

            resource_writes: register_int_counter_vec!(
                "converge_resource_writes_total",
                "Create, patch and delete calls issued against cluster resources",
                &["kind", "operation"]
            )
            .expect("Failed to register resource_writes"),

            wait_duration_seconds: register_histogram!(
                "converge_wait_duration_seconds",
                "Time spent waiting for a deploy group to converge",
                WAIT_BUCKETS.to_vec()
            )
            .expect("Failed to register wait_duration_seconds"),
        }
    }
}

/// Lightweight handle to the global metrics instance.
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ConvergeMetrics {
    _private: (),
}

impl Default for ConvergeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvergeMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ConvergeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ConvergeMetricsInner {
        GLOBAL_METRICS.get_or_init(ConvergeMetricsInner::new)
    }

    pub fn inc_reconcile_passes(&self) {
        self.inner().reconcile_passes.inc();
    }

    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors.inc();
    }

    pub fn inc_brutal_bounces(&self) {
        self.inner().brutal_bounces.inc();
    }

    /// Count a write against a resource kind ("create", "patch", "delete", ...)
    pub fn record_write(&self, kind: &str, operation: &str) {
        self.inner()
            .resource_writes
            .with_label_values(&[kind, operation])
            .inc();
    }

    pub fn observe_wait_duration(&self, duration_secs: f64) {
        self.inner().wait_duration_seconds.observe(duration_secs);
    }
}

/// Audit trail for deploy events.
///
/// Emitting never fails and never blocks the caller's control flow.
pub trait EventSink: Send + Sync {
    fn emit(&self, service: &str, line: &str, component: &str, level: &str);
}

/// Component and level used for every deploy audit event
pub const DEPLOY_COMPONENT: &str = "deploy";
pub const EVENT_LEVEL: &str = "event";

/// Emit one deploy event
pub fn emit_deploy_event(sink: &dyn EventSink, service: &str, line: &str) {
    sink.emit(service, line, DEPLOY_COMPONENT, EVENT_LEVEL);
}

/// Event sink writing structured `tracing` records
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, service: &str, line: &str, component: &str, level: &str) {
        info!(
            event = "deploy_event",
            service = %service,
            component = %component,
            level = %level,
            "{}",
            line
        );
    }
}

/// A recorded audit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub service: String,
    pub line: String,
    pub component: String,
    pub level: String,
}

/// Event sink keeping events in memory, used to inspect the audit trail
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.line).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, service: &str, line: &str, component: &str, level: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                service: service.to_string(),
                line: line.to_string(),
                component: component.to_string(),
                level: level.to_string(),
            });
        }
    }
}
