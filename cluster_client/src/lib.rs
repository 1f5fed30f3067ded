//! `kube` backed implementation of the cluster client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use cluster_client_interface::{ClusterClient, ClusterClientError, ClusterClientFactory, NodeObservation};
use cluster_shared_types::Result;

pub use cluster_client_interface;

const KUBE_SYSTEM: &str = "kube-system";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the local cluster API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Reduce a node object to the fields the agent tracks.
pub fn observe_node(node: &Node) -> NodeObservation {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    NodeObservation {
        name: node.metadata.name.clone().unwrap_or_default(),
        ready,
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
        kubelet_version: node
            .status
            .as_ref()
            .and_then(|s| s.node_info.as_ref())
            .map(|info| info.kubelet_version.clone())
            .unwrap_or_default(),
    }
}

/// Every pod matching one of `prefixes` must be `Running`.
pub fn control_plane_pods_running(pods: &[Pod], prefixes: &[&str]) -> bool {
    pods.iter()
        .filter(|pod| {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            prefixes.iter().any(|prefix| name.starts_with(prefix))
        })
        .all(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                == Some("Running")
        })
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn node_status(&self) -> Result<Option<NodeObservation>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterClientError::Api(format!("list nodes: {}", e)))?;

        debug!(count = list.items.len(), "Listed nodes");
        match list.items.as_slice() {
            [node] => Ok(Some(observe_node(node))),
            _ => Ok(None),
        }
    }

    async fn control_plane_ready(&self, prefixes: &[&str]) -> Result<bool> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), KUBE_SYSTEM);
        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterClientError::Api(format!("list kube-system pods: {}", e)))?;
        Ok(control_plane_pods_running(&list.items, prefixes))
    }
}

/// Builds [`KubeClusterClient`]s from kubeconfig files.
#[derive(Debug, Clone)]
pub struct KubeClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for KubeClientFactory {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl KubeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }
}

#[async_trait]
impl ClusterClientFactory for KubeClientFactory {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterClient>> {
        let kubeconfig_err = |message: String| ClusterClientError::Kubeconfig {
            path: kubeconfig.display().to_string(),
            message,
        };

        let raw = Kubeconfig::read_from(kubeconfig).map_err(|e| kubeconfig_err(e.to_string()))?;
        let mut config = Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
            .await
            .map_err(|e| kubeconfig_err(e.to_string()))?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        let client =
            Client::try_from(config).map_err(|e| ClusterClientError::ClientCreation(e.to_string()))?;
        Ok(Arc::new(KubeClusterClient::new(client)))
    }
}
