//! Observability for the cluster agent.
//!
//! - **Tracing**: structured logging with lifecycle and reconciler spans
//! - **Metrics**: Prometheus-compatible operation metrics

pub mod metrics;
pub mod tracing_setup;

pub use metrics::{MetricTimer, MetricsRegistry, OperationMetrics, ResponseCode};
pub use tracing_setup::{init_tracing, TracingConfig};
