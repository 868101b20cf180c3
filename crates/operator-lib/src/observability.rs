//! Observability infrastructure for the operator
//!
//! Provides:
//! - Prometheus metrics (reconciliation outcomes, scaler activity)
//! - Structured JSON logging of significant lifecycle events

use prometheus::{register_histogram, register_int_gauge, Histogram, IntGauge};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconciliation latency (in seconds)
const RECONCILE_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct OperatorMetricsInner {
    reconcile_duration_seconds: Histogram,
    instances_managed: IntGauge,
    drift_detected: IntGauge,
    reconcile_errors: IntGauge,
    workloads_created: IntGauge,
    memory_bumps: IntGauge,
    rule_documents_stored: IntGauge,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_duration_seconds: register_histogram!(
                "loki_operator_reconcile_duration_seconds",
                "Time spent reconciling one instance",
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            instances_managed: register_int_gauge!(
                "loki_operator_instances_managed",
                "Number of custom-resource instances seen by the last pass"
            )
            .expect("Failed to register instances_managed"),

            drift_detected: register_int_gauge!(
                "loki_operator_drift_detected_total",
                "Total number of diverged workloads detected"
            )
            .expect("Failed to register drift_detected"),

            reconcile_errors: register_int_gauge!(
                "loki_operator_reconcile_errors_total",
                "Total number of per-instance reconciliation failures"
            )
            .expect("Failed to register reconcile_errors"),

            workloads_created: register_int_gauge!(
                "loki_operator_workloads_created_total",
                "Total number of workloads created"
            )
            .expect("Failed to register workloads_created"),

            memory_bumps: register_int_gauge!(
                "loki_operator_memory_bumps_total",
                "Total number of memory increments applied by the scaler"
            )
            .expect("Failed to register memory_bumps"),

            rule_documents_stored: register_int_gauge!(
                "loki_operator_rule_documents_stored_total",
                "Total number of alerting-rule documents persisted"
            )
            .expect("Failed to register rule_documents_stored"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OperatorMetrics {
    _private: (),
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OperatorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a reconciliation latency observation
    pub fn observe_reconcile_duration(&self, duration_secs: f64) {
        self.inner().reconcile_duration_seconds.observe(duration_secs);
    }

    /// Update the managed-instance count
    pub fn set_instances_managed(&self, count: i64) {
        self.inner().instances_managed.set(count);
    }

    /// Increment the drift counter
    pub fn inc_drift_detected(&self) {
        self.inner().drift_detected.inc();
    }

    /// Increment the per-instance failure counter
    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors.inc();
    }

    /// Increment the workload-creation counter
    pub fn inc_workloads_created(&self) {
        self.inner().workloads_created.inc();
    }

    /// Increment the scaler bump counter
    pub fn inc_memory_bumps(&self) {
        self.inner().memory_bumps.inc();
    }

    /// Increment the stored-rule-document counter
    pub fn inc_rule_documents_stored(&self) {
        self.inner().rule_documents_stored.inc();
    }
}

/// Structured logger for operator events
///
/// Provides consistent JSON-formatted logging for drift, scaling and
/// lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    operator_namespace: String,
}

impl StructuredLogger {
    pub fn new(operator_namespace: impl Into<String>) -> Self {
        Self {
            operator_namespace: operator_namespace.into(),
        }
    }

    /// Log operator startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "operator_started",
            operator_namespace = %self.operator_namespace,
            version = %version,
            "Operator started"
        );
    }

    /// Log operator shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_stopped",
            operator_namespace = %self.operator_namespace,
            reason = %reason,
            "Operator stopped"
        );
    }

    /// Log a detected divergence
    pub fn log_drift(&self, name: &str, namespace: &str) {
        info!(
            event = "drift_detected",
            operator_namespace = %self.operator_namespace,
            name = %name,
            namespace = %namespace,
            "Workload drifted from the declared state"
        );
    }

    /// Log a memory increment decided by the scaler
    pub fn log_memory_bump(&self, name: &str, namespace: &str, previous: &str, updated: &str) {
        warn!(
            event = "memory_bump",
            operator_namespace = %self.operator_namespace,
            name = %name,
            namespace = %namespace,
            previous = %previous,
            updated = %updated,
            "Container stuck retrying after a kill, growing its memory limit"
        );
    }

    /// Log a per-instance reconciliation failure
    pub fn log_instance_failure(&self, name: &str, namespace: &str, error: &str) {
        warn!(
            event = "reconcile_failed",
            operator_namespace = %self.operator_namespace,
            name = %name,
            namespace = %namespace,
            error = %error,
            "Instance reconciliation failed"
        );
    }
}
