//! The narrow surface the REST layer talks to.
//!
//! [`AgentService`] forwards each request to the [`Orchestrator`] and keeps
//! the background reconcilers in step with the cluster's lifecycle: they are
//! started once a cluster exists, the status reconciler is stopped when the
//! cluster is deleted, and it is restarted after a certificate reset so it
//! picks up the new kubeconfig.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cluster_client_interface::ClusterClientFactory;
use cluster_shared_types::{
    AuditRecord, CertificateInfo, Cluster, ClusterPhase, ClusterSpec, OrchestrationError, Result,
};

use crate::lifecycle::{OperationHandle, Orchestrator};
use crate::providers;
use crate::reconciler::{
    ClusterCertsReconciler, ClusterStatusReconciler, ReconcilerRegistry, ReconcilerStatus,
    StatusReconcilerConfig, CERTS_RECONCILER_NAME, STATUS_RECONCILER_NAME,
};
use crate::startup;

#[derive(Clone)]
pub struct AgentService {
    orchestrator: Orchestrator,
    registry: ReconcilerRegistry,
    factory: Arc<dyn ClusterClientFactory>,
    status_config: StatusReconcilerConfig,
    certs_interval: Duration,
}

impl AgentService {
    pub fn new(
        orchestrator: Orchestrator,
        registry: ReconcilerRegistry,
        factory: Arc<dyn ClusterClientFactory>,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            factory,
            status_config: StatusReconcilerConfig::default(),
            certs_interval: Duration::from_secs(10 * 60 * 60),
        }
    }

    pub fn with_status_config(mut self, config: StatusReconcilerConfig) -> Self {
        self.status_config = config;
        self
    }

    pub fn with_certs_interval(mut self, interval: Duration) -> Self {
        self.certs_interval = interval;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn registry(&self) -> &ReconcilerRegistry {
        &self.registry
    }

    /// Recover from an interrupted operation and resume reconciling an
    /// existing cluster.
    pub async fn start(&self) -> Result<Option<ClusterPhase>> {
        let interrupted = startup::recover_interrupted_operation(self.orchestrator.state()).await?;

        let cluster_type = self.orchestrator.state().spec().await?.distribution()?;
        let kubeconfig = providers::kubeconfig_path(cluster_type);
        if self.orchestrator.os().filesystem().exists(kubeconfig).await? {
            info!(path = %kubeconfig.display(), "Existing cluster found; starting reconcilers");
            self.register_reconcilers().await;
        }
        Ok(interrupted)
    }

    /// Stop every reconciler and wait for them.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    // ===== Lifecycle =====

    pub async fn create_cluster(&self, spec: ClusterSpec) -> Result<OperationHandle> {
        if spec.cluster_type.trim().is_empty() {
            return Err(OrchestrationError::validation("cluster type is required"));
        }

        let handle = self.orchestrator.install(spec).await?;
        let service = self.clone();
        Ok(handle.and_then(move |phase| async move {
            if phase == ClusterPhase::Failed {
                warn!("Install failed; reconcilers not started");
                return;
            }
            service.register_reconcilers().await;
        }))
    }

    pub async fn upgrade_cluster(&self, version: &str) -> Result<OperationHandle> {
        self.orchestrator.upgrade(version).await
    }

    pub async fn patch_cluster(&self, delta: ClusterSpec) -> Result<OperationHandle> {
        self.orchestrator.patch(delta).await
    }

    pub async fn delete_cluster(&self) -> Result<OperationHandle> {
        let handle = self.orchestrator.reset().await?;
        let registry = self.registry.clone();
        Ok(handle.and_then(move |phase| async move {
            if phase == ClusterPhase::Deleted {
                registry.unregister(STATUS_RECONCILER_NAME).await;
            }
        }))
    }

    pub async fn reset_certs(&self) -> Result<OperationHandle> {
        let handle = self.orchestrator.reset_config().await?;
        let service = self.clone();
        Ok(handle.and_then(move |phase| async move {
            if phase == ClusterPhase::Provisioned {
                service.registry.unregister(STATUS_RECONCILER_NAME).await;
                service.register_status_reconciler().await;
            }
        }))
    }

    // ===== Queries =====

    pub async fn get_cluster(&self) -> Result<Cluster> {
        self.orchestrator.get_cluster().await
    }

    pub async fn get_kubeconfig(&self) -> Result<String> {
        self.orchestrator.get_kubeconfig().await
    }

    pub async fn get_certs(&self) -> Result<Vec<CertificateInfo>> {
        self.orchestrator.get_certs().await
    }

    pub async fn audit_history(&self) -> Result<Vec<AuditRecord>> {
        self.orchestrator.audit_history().await
    }

    pub async fn reconciler_statuses(&self) -> Vec<ReconcilerStatus> {
        self.registry.statuses().await
    }

    // ===== Reconciler wiring =====

    async fn register_reconcilers(&self) {
        self.register_status_reconciler().await;
        if !self.registry.is_running(CERTS_RECONCILER_NAME).await {
            let certs = ClusterCertsReconciler::new(self.orchestrator.clone())
                .with_interval(self.certs_interval)
                .with_threshold_days(self.orchestrator.rotation_threshold_days());
            self.registry.register(Arc::new(certs)).await;
        }
    }

    async fn register_status_reconciler(&self) {
        if self.registry.is_running(STATUS_RECONCILER_NAME).await {
            return;
        }
        let status = ClusterStatusReconciler::new(
            self.orchestrator.state().clone(),
            self.orchestrator.os().clone(),
            self.factory.clone(),
            self.status_config.clone(),
        );
        self.registry.register(Arc::new(status)).await;
    }
}
