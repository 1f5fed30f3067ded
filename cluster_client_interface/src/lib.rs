use async_trait::async_trait;
use cluster_shared_types::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// What the status reconciler needs to know about the single local node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeObservation {
    pub name: String,
    /// The node's `Ready` condition is `True`.
    pub ready: bool,
    pub unschedulable: bool,
    pub kubelet_version: String,
}

/// Read-only view of the live cluster API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Status of the only node in the cluster.
    ///
    /// Returns `None` when the cluster does not have exactly one node.
    async fn node_status(&self) -> Result<Option<NodeObservation>>;

    /// True when every kube-system pod whose name starts with one of
    /// `prefixes` is in phase `Running`.
    async fn control_plane_ready(&self, prefixes: &[&str]) -> Result<bool>;
}

/// Builds clients from a kubeconfig file.
#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterClient>>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterClientError {
    #[error("Failed to read kubeconfig {path}: {message}")]
    Kubeconfig { path: String, message: String },
    #[error("Failed to create client: {0}")]
    ClientCreation(String),
    #[error("API request failed: {0}")]
    Api(String),
}

impl From<ClusterClientError> for OrchestrationError {
    fn from(err: ClusterClientError) -> Self {
        OrchestrationError::ClusterError(err.to_string())
    }
}
