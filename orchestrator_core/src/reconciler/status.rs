//! Keeps `ClusterReady`, `NodeReady` and `ControlPlaneReady` in line with
//! the live cluster.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cluster_client_interface::{ClusterClient, ClusterClientFactory, NodeObservation};
use cluster_shared_types::constants::{
    CLUSTER_READY_FAILED, CONTROL_PLANE_PODS, CONTROL_PLANE_READY_FAILED, NODE_READY_FAILED,
    STATIC_POD_MANIFESTS, STATIC_POD_MANIFESTS_BACKUP,
};
use cluster_shared_types::{
    ClusterPhase, ClusterStatus, ClusterType, ConditionType, OrchestrationError, Result, Severity,
};
use os_utility_interface::OsUtil;

use super::{ReconcileContext, Reconciler};
use crate::conditions::Conditions;
use crate::providers;
use crate::state::ClusterState;

pub const STATUS_RECONCILER_NAME: &str = "cluster-status-reconciler";

const KUBECONFIG_ABSENT_MESSAGE: &str = "Kubeconfig not present for cluster status";
const NODE_NOT_READY_MESSAGE: &str = "Node is not in ready status";
const CONTROL_PLANE_NOT_READY_MESSAGE: &str = "Control Plane is not in ready status";

#[derive(Debug, Clone)]
pub struct StatusReconcilerConfig {
    pub interval: Duration,
    /// Time given to the control plane after its manifests are restored.
    pub manifest_restore_wait: Duration,
    pub node_status_retries: u32,
    pub node_status_backoff: Duration,
}

impl Default for StatusReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            manifest_restore_wait: Duration::from_secs(40),
            node_status_retries: 5,
            node_status_backoff: Duration::from_secs(10),
        }
    }
}

impl StatusReconcilerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_manifest_restore_wait(mut self, wait: Duration) -> Self {
        self.manifest_restore_wait = wait;
        self
    }

    pub fn with_node_status_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.node_status_retries = retries;
        self.node_status_backoff = backoff;
        self
    }
}

pub struct ClusterStatusReconciler {
    state: ClusterState,
    os: Arc<dyn OsUtil>,
    factory: Arc<dyn ClusterClientFactory>,
    client: Mutex<Option<Arc<dyn ClusterClient>>>,
    config: StatusReconcilerConfig,
}

impl ClusterStatusReconciler {
    pub fn new(
        state: ClusterState,
        os: Arc<dyn OsUtil>,
        factory: Arc<dyn ClusterClientFactory>,
        config: StatusReconcilerConfig,
    ) -> Self {
        Self {
            state,
            os,
            factory,
            client: Mutex::new(None),
            config,
        }
    }

    /// Cached client, connecting on first use.
    async fn client(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterClient>> {
        let mut client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }
        let connected = self.factory.connect(kubeconfig).await?;
        *client = Some(connected.clone());
        Ok(connected)
    }

    async fn reconnect(&self, kubeconfig: &Path) -> Result<Arc<dyn ClusterClient>> {
        *self.client.lock().await = None;
        self.client(kubeconfig).await
    }

    /// Node status, reconnecting and retrying on failure.
    async fn node_status(
        &self,
        ctx: &ReconcileContext,
        kubeconfig: &Path,
    ) -> Result<Option<NodeObservation>> {
        let retries = self.config.node_status_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=retries {
            let result = match self.client(kubeconfig).await {
                Ok(client) => client.node_status().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(node) => return Ok(node),
                Err(e) => {
                    warn!(attempt, error = %e, "Node status query failed");
                    *self.client.lock().await = None;
                    last_error = Some(e);
                }
            }
            if attempt < retries && !ctx.sleep(self.config.node_status_backoff).await {
                break;
            }
        }
        Err(last_error.unwrap_or_else(|| {
            OrchestrationError::ClusterError("node status was not queried".to_string())
        }))
    }

    /// Put back manifests left in the backup directory by an interrupted
    /// control plane restart.
    async fn restore_manifests(&self, ctx: &ReconcileContext, kubeconfig: &Path) -> Result<()> {
        let backup = Path::new(STATIC_POD_MANIFESTS_BACKUP);
        if !self.os.filesystem().exists(backup).await? {
            return Ok(());
        }
        info!("Restoring control plane manifests from backup");
        self.os
            .filesystem()
            .rename(backup, Path::new(STATIC_POD_MANIFESTS))
            .await?;
        info!(wait = ?self.config.manifest_restore_wait, "Waiting for control plane to come up");
        if ctx.sleep(self.config.manifest_restore_wait).await {
            self.reconnect(kubeconfig).await?;
        }
        Ok(())
    }

    /// Derive readiness from the live cluster into `status`.
    ///
    /// Conditions observed before an error stay in `status` so they are
    /// still committed.
    async fn observe(
        &self,
        ctx: &ReconcileContext,
        cluster_type: ClusterType,
        kubeconfig: &Path,
        status: &mut ClusterStatus,
    ) -> Result<()> {
        self.restore_manifests(ctx, kubeconfig).await?;
        if ctx.is_stopping() {
            return Ok(());
        }

        let node = match self.node_status(ctx, kubeconfig).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                mark_node_not_ready(status);
                return Err(OrchestrationError::ClusterError(
                    "expected exactly one node in the cluster".to_string(),
                ));
            }
            Err(e) => {
                mark_node_not_ready(status);
                return Err(e);
            }
        };

        status.unschedulable = node.unschedulable;
        if !node.kubelet_version.is_empty() {
            status.kubernetes_version = node.kubelet_version.trim_start_matches('v').to_string();
        }
        if node.ready {
            status.mark_true(ConditionType::NodeReady);
        } else {
            mark_node_not_ready(status);
        }

        let control_plane_ready = if providers::has_static_control_plane(cluster_type) {
            self.client(kubeconfig)
                .await?
                .control_plane_ready(&CONTROL_PLANE_PODS)
                .await?
        } else {
            node.ready
        };
        if control_plane_ready {
            status.mark_true(ConditionType::ControlPlaneReady);
        } else {
            status.mark_false(
                ConditionType::ControlPlaneReady,
                CONTROL_PLANE_READY_FAILED,
                Severity::Error,
                CONTROL_PLANE_NOT_READY_MESSAGE,
            );
        }

        if node.ready && control_plane_ready {
            status.mark_true(ConditionType::ClusterReady);
        } else {
            status.mark_false(
                ConditionType::ClusterReady,
                CLUSTER_READY_FAILED,
                Severity::Error,
                CONTROL_PLANE_NOT_READY_MESSAGE,
            );
        }
        Ok(())
    }

    /// Write what was observed, unless an operation took over meanwhile.
    async fn commit(&self, observed_phase: ClusterPhase, observed: ClusterStatus) -> Result<()> {
        self.state
            .update(|status| {
                if status.phase != observed_phase {
                    debug!(phase = %status.phase, "Phase changed during tick; discarding observation");
                    return;
                }
                status.conditions = observed.conditions;
                status.kubernetes_version = observed.kubernetes_version;
                status.unschedulable = observed.unschedulable;
                status.phase = observed.phase;
            })
            .await?;
        Ok(())
    }
}

fn mark_node_not_ready(status: &mut ClusterStatus) {
    status.mark_false(
        ConditionType::NodeReady,
        NODE_READY_FAILED,
        Severity::Error,
        NODE_NOT_READY_MESSAGE,
    );
}

fn is_reconcilable(phase: ClusterPhase) -> bool {
    !phase.is_in_progress() && !matches!(phase, ClusterPhase::NotInitialised | ClusterPhase::Deleted)
}

#[async_trait]
impl Reconciler for ClusterStatusReconciler {
    fn name(&self) -> &'static str {
        STATUS_RECONCILER_NAME
    }

    fn interval(&self) -> Duration {
        self.config.interval
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<()> {
        let snapshot = self.state.status().await?;
        if !is_reconcilable(snapshot.phase) {
            debug!(phase = %snapshot.phase, "Skipping status reconcile");
            return Ok(());
        }

        let cluster_type = self.state.spec().await?.distribution()?;
        let kubeconfig = providers::kubeconfig_path(cluster_type);

        if !self.os.filesystem().exists(kubeconfig).await? {
            warn!(path = %kubeconfig.display(), "Kubeconfig not present; marking cluster deleted");
            let mut observed = snapshot.clone();
            observed.delete_all_conditions();
            observed.mark_false(
                ConditionType::ClusterReady,
                CLUSTER_READY_FAILED,
                Severity::Error,
                KUBECONFIG_ABSENT_MESSAGE,
            );
            observed.phase = ClusterPhase::Deleted;
            *self.client.lock().await = None;
            // Stopping drops an in-flight pass, so persist first.
            let committed = self.commit(snapshot.phase, observed).await;
            ctx.request_stop();
            return committed;
        }

        let mut observed = snapshot.clone();
        let outcome = self.observe(ctx, cluster_type, kubeconfig, &mut observed).await;
        self.commit(snapshot.phase, observed).await?;
        outcome
    }
}
