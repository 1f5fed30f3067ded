//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cluster_client_interface::{ClusterClient, ClusterClientFactory, NodeObservation};
use cluster_shared_types::{ClusterNetworking, ClusterSpec, Result};
use observability::OperationMetrics;
use orchestrator_core::reconciler::ReconcilerRegistry;
use orchestrator_core::task::TaskTimings;
use orchestrator_core::{AgentService, ClusterState, Orchestrator};
use os_utility::DryRunOsUtil;
use state_store_interface::in_memory::InMemoryClusterStore;

/// A node that is always ready.
pub struct HealthyCluster;

#[async_trait]
impl ClusterClient for HealthyCluster {
    async fn node_status(&self) -> Result<Option<NodeObservation>> {
        Ok(Some(NodeObservation {
            name: "localhost".to_string(),
            ready: true,
            unschedulable: false,
            kubelet_version: "v1.26.5".to_string(),
        }))
    }

    async fn control_plane_ready(&self, _prefixes: &[&str]) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
pub struct CountingFactory {
    pub connects: AtomicUsize,
}

#[async_trait]
impl ClusterClientFactory for CountingFactory {
    async fn connect(&self, _kubeconfig: &Path) -> Result<Arc<dyn ClusterClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(HealthyCluster))
    }
}

pub struct Harness {
    pub service: AgentService,
    pub os: Arc<DryRunOsUtil>,
    pub state: ClusterState,
    pub factory: Arc<CountingFactory>,
}

pub fn harness() -> Harness {
    harness_with(DryRunOsUtil::new())
}

pub fn harness_with(os: DryRunOsUtil) -> Harness {
    let os = Arc::new(os);
    let state = ClusterState::new(Arc::new(InMemoryClusterStore::new()));
    let metrics = OperationMetrics::new();
    let orchestrator = Orchestrator::new(state.clone(), os.clone(), metrics.clone())
        .with_timings(TaskTimings::immediate());
    let registry = ReconcilerRegistry::new(CancellationToken::new(), metrics);
    let factory = Arc::new(CountingFactory::default());
    let service = AgentService::new(orchestrator, registry, factory.clone());
    Harness {
        service,
        os,
        state,
        factory,
    }
}

pub fn kubeadm_spec() -> ClusterSpec {
    ClusterSpec {
        cluster_type: "kubeadm".to_string(),
        version: "1.26.5".to_string(),
        networking: Some(ClusterNetworking {
            cni_manifest_url: "https://example.com/calico.yaml".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
