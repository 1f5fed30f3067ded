//! API server state.

use std::sync::Arc;

use observability::MetricsRegistry;

use crate::service::AgentService;

/// Shared state for the API server.
#[derive(Clone)]
pub struct ApiState {
    /// Service every handler delegates to.
    pub service: AgentService,
    /// Prometheus registry served at `/metrics`, when one is installed.
    pub metrics: Option<Arc<MetricsRegistry>>,
}

impl ApiState {
    pub fn new(service: AgentService) -> Self {
        Self {
            service,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
