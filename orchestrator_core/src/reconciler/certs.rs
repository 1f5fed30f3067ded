//! Rotates control plane certificates before they expire.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use cluster_shared_types::constants::CLUSTER_CERTS_ROTATION_DAYS;
use cluster_shared_types::{ClusterPhase, OrchestrationError, Result};
use os_utility_interface::CertsExpiry;

use super::{ReconcileContext, Reconciler};
use crate::lifecycle::Orchestrator;
use crate::providers;

pub const CERTS_RECONCILER_NAME: &str = "cluster-certs-reconciler";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60 * 60);

/// Triggers the reset-certs workflow once the shortest remaining
/// certificate validity drops to the threshold.
pub struct ClusterCertsReconciler {
    orchestrator: Orchestrator,
    interval: Duration,
    threshold_days: i64,
}

impl ClusterCertsReconciler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            interval: DEFAULT_INTERVAL,
            threshold_days: CLUSTER_CERTS_ROTATION_DAYS,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold_days(mut self, days: i64) -> Self {
        self.threshold_days = days;
        self
    }

    async fn expiry(&self) -> Result<CertsExpiry> {
        self.orchestrator.os().kubeadm().certs_expiry().await
    }

    async fn rotate(&self) -> Result<CertsExpiry> {
        let handle = self.orchestrator.reset_config().await?;
        let phase = handle.wait().await?;
        if phase != ClusterPhase::Provisioned {
            return Err(OrchestrationError::InternalError(format!(
                "certificate rotation left the cluster in phase {}",
                phase
            )));
        }

        let expiry = self.expiry().await?;
        for (name, days) in &expiry.certificates {
            if *days != expiry.min_days {
                error!(certificate = %name, remaining_days = days, "Certificate yet to be rotated");
            }
        }
        info!(remaining_days = expiry.min_days, "Certificates rotated");
        Ok(expiry)
    }
}

#[async_trait]
impl Reconciler for ClusterCertsReconciler {
    fn name(&self) -> &'static str {
        CERTS_RECONCILER_NAME
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn reconcile(&self, _ctx: &ReconcileContext) -> Result<()> {
        let state = self.orchestrator.state();
        let cluster_type = state.spec().await?.distribution()?;
        if !providers::manages_certificates(cluster_type) {
            debug!(cluster_type = %cluster_type, "Certificates managed by the distribution");
            return Ok(());
        }
        let phase = state.phase().await?;
        if phase != ClusterPhase::Provisioned {
            debug!(phase = %phase, "Skipping certificate check");
            return Ok(());
        }

        let mut expiry = self.expiry().await?;
        if expiry.min_days <= self.threshold_days {
            info!(
                remaining_days = expiry.min_days,
                threshold_days = self.threshold_days,
                "Certificates due for rotation"
            );
            expiry = self.rotate().await?;
        }

        info!(
            deadline_days = expiry.min_days - self.threshold_days,
            "Days until next certificate rotation"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClusterState;
    use crate::task::TaskTimings;
    use cluster_shared_types::ClusterSpec;
    use observability::OperationMetrics;
    use os_utility::DryRunOsUtil;
    use os_utility_interface::OsUtil;
    use state_store_interface::in_memory::InMemoryClusterStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn setup(cluster_type: &str, days: i64) -> (ClusterCertsReconciler, Arc<DryRunOsUtil>, ClusterState) {
        let state = ClusterState::new(Arc::new(InMemoryClusterStore::new()));
        state
            .write_spec(&ClusterSpec {
                cluster_type: cluster_type.to_string(),
                version: "1.26.5".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        state.set_phase(ClusterPhase::Provisioned).await.unwrap();

        let os = Arc::new(DryRunOsUtil::new().with_cert_expiry_days(days));
        let orchestrator = Orchestrator::new(state.clone(), os.clone(), OperationMetrics::new())
            .with_timings(TaskTimings::immediate());
        (ClusterCertsReconciler::new(orchestrator), os, state)
    }

    fn ctx() -> ReconcileContext {
        ReconcileContext::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_rotates_when_below_threshold() {
        let (reconciler, os, state) = setup("kubeadm", 45).await;

        reconciler.reconcile(&ctx()).await.unwrap();

        assert_eq!(os.call_count("kubeadm certs renew all").await, 1);
        let expiry = os.kubeadm().certs_expiry().await.unwrap();
        assert!(expiry.min_days > 45);
        assert_eq!(state.phase().await.unwrap(), ClusterPhase::Provisioned);
        let history = state.audit_history().await.unwrap().unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_rotates_at_threshold() {
        let (reconciler, os, _) = setup("kubeadm", 60).await;
        reconciler.reconcile(&ctx()).await.unwrap();
        assert_eq!(os.call_count("kubeadm certs renew all").await, 1);
    }

    #[tokio::test]
    async fn test_leaves_fresh_certificates_alone() {
        let (reconciler, os, state) = setup("kubeadm", 200).await;
        reconciler.reconcile(&ctx()).await.unwrap();
        assert_eq!(os.call_count("kubeadm certs renew all").await, 0);
        assert!(state.audit_history().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skips_k3s() {
        let (reconciler, os, _) = setup("k3s", 10).await;
        reconciler.reconcile(&ctx()).await.unwrap();
        assert_eq!(os.call_count("kubeadm certs").await, 0);
    }

    #[tokio::test]
    async fn test_failed_rotation_is_reported() {
        let (reconciler, os, state) = setup("kubeadm", 30).await;
        os.fail_on("kubeadm certs renew all").await;

        assert!(reconciler.reconcile(&ctx()).await.is_err());
        assert_eq!(state.phase().await.unwrap(), ClusterPhase::Failed);
    }

    #[tokio::test]
    async fn test_skips_unless_provisioned() {
        let (reconciler, os, state) = setup("kubeadm", 10).await;
        state.set_phase(ClusterPhase::Upgrading).await.unwrap();
        reconciler.reconcile(&ctx()).await.unwrap();
        assert_eq!(os.call_count("kubeadm certs").await, 0);
    }
}
