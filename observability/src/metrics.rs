//! Prometheus-compatible metrics for the cluster agent.
//!
//! One histogram observation per externally visible operation, keyed by
//! cluster type, version, outcome code, verb and resource path. Emission is
//! fire-and-forget: without an installed recorder every call is a no-op.

use std::fmt;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

pub const REQUEST_DURATION: &str = "cluster_agent_request_duration_seconds";
pub const OPERATIONS_TOTAL: &str = "cluster_agent_operations_total";
pub const RECONCILERS_REGISTERED: &str = "cluster_agent_reconcilers_registered";

pub const REQUEST_DURATION_BUCKETS: [f64; 18] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 50.0, 100.0, 200.0, 300.0, 400.0,
    500.0, 600.0,
];

/// Outcome code attached to every observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Success,
    Failed,
    ClusterCreated,
    ClusterFailed,
    DeleteDone,
    DeleteFailed,
    ClusterAlreadyInitialized,
    UpgradeDone,
    UpgradeFailed,
    ResetDone,
    ResetFailed,
    PatchDone,
    PatchFailed,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Success => "success",
            ResponseCode::Failed => "failed",
            ResponseCode::ClusterCreated => "cluster-created",
            ResponseCode::ClusterFailed => "cluster-failed",
            ResponseCode::DeleteDone => "delete-done",
            ResponseCode::DeleteFailed => "delete-failed",
            ResponseCode::ClusterAlreadyInitialized => "cluster-already-initialized",
            ResponseCode::UpgradeDone => "upgrade-done",
            ResponseCode::UpgradeFailed => "upgrade-failed",
            ResponseCode::ResetDone => "reset-done",
            ResponseCode::ResetFailed => "reset-failed",
            ResponseCode::PatchDone => "patch-done",
            ResponseCode::PatchFailed => "patch-failed",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prometheus recorder plus its render handle.
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Install the process-wide Prometheus recorder.
    ///
    /// Only one recorder can be installed per process.
    pub fn install() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION.to_string()),
                &REQUEST_DURATION_BUCKETS,
            )?
            .install_recorder()?;

        Self::register_descriptions();
        Ok(Self { handle })
    }

    fn register_descriptions() {
        describe_histogram!(
            REQUEST_DURATION,
            "Duration of cluster lifecycle requests, labelled by outcome"
        );
        describe_counter!(
            OPERATIONS_TOTAL,
            "Completed lifecycle operations by outcome code"
        );
        describe_gauge!(
            RECONCILERS_REGISTERED,
            "Number of reconcilers currently registered"
        );
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Handle used by the engine to emit observations.
#[derive(Debug, Clone, Default)]
pub struct OperationMetrics;

impl OperationMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Record one request/operation observation.
    pub fn observe(
        &self,
        cluster_type: &str,
        version: &str,
        code: ResponseCode,
        method: &str,
        path: &str,
        elapsed: Duration,
    ) {
        let labels = [
            ("cluster_type", cluster_type.to_string()),
            ("version", version.to_string()),
            ("code", code.as_str().to_string()),
            ("method", method.to_string()),
            ("path", path.to_string()),
        ];
        histogram!(REQUEST_DURATION, &labels).record(elapsed.as_secs_f64());
    }

    /// Count a completed lifecycle operation.
    pub fn inc_operation(&self, operation: &str, code: ResponseCode) {
        let labels = [
            ("operation", operation.to_string()),
            ("code", code.as_str().to_string()),
        ];
        counter!(OPERATIONS_TOTAL, &labels).increment(1);
    }

    pub fn set_reconcilers_registered(&self, count: usize) {
        gauge!(RECONCILERS_REGISTERED).set(count as f64);
    }

    /// Start timing a request against `method path`.
    pub fn start_timer(&self, method: &'static str, path: &'static str) -> MetricTimer {
        MetricTimer {
            metrics: self.clone(),
            start: Instant::now(),
            method,
            path,
        }
    }
}

/// Measures elapsed time until the outcome is known.
pub struct MetricTimer {
    metrics: OperationMetrics,
    start: Instant,
    method: &'static str,
    path: &'static str,
}

impl MetricTimer {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record the observation with the final outcome.
    pub fn finish(self, cluster_type: &str, version: &str, code: ResponseCode) {
        self.metrics.observe(
            cluster_type,
            version,
            code,
            self.method,
            self.path,
            self.start.elapsed(),
        );
    }
}
