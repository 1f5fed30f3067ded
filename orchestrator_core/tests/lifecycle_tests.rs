//! End-to-end lifecycle flows against the dry-run OS utility and the
//! in-memory store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cluster_shared_types::constants::{KUBEADM_KUBECONFIG_PATH, UPGRADE_FAILED};
use cluster_shared_types::{
    ClusterNetworking, ClusterPhase, ClusterSpec, ConditionStatus, ConditionType,
    OrchestrationError,
};
use observability::OperationMetrics;
use orchestrator_core::task::TaskTimings;
use orchestrator_core::{ClusterState, Orchestrator};
use os_utility::DryRunOsUtil;
use os_utility_interface::OsUtil;
use state_store_interface::in_memory::InMemoryClusterStore;

fn setup(os: DryRunOsUtil) -> (Orchestrator, Arc<DryRunOsUtil>) {
    let os = Arc::new(os);
    let state = ClusterState::new(Arc::new(InMemoryClusterStore::new()));
    let orchestrator = Orchestrator::new(state, os.clone(), OperationMetrics::new())
        .with_timings(TaskTimings::immediate());
    (orchestrator, os)
}

fn kubeadm_spec() -> ClusterSpec {
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

async fn installed(os: DryRunOsUtil) -> (Orchestrator, Arc<DryRunOsUtil>) {
    let (orch, os) = setup(os);
    let phase = orch.install(kubeadm_spec()).await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    (orch, os)
}

#[tokio::test]
async fn test_install_runs_whole_pipeline() {
    let (orch, os) = installed(DryRunOsUtil::new()).await;

    let calls = os.calls().await;
    let position = |needle: &str| {
        calls
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("{} never ran", needle))
    };
    assert!(position("package install containerd") < position("kubeadm init"));
    assert!(position("kubeadm init") < position("taint"));
    assert!(position("taint") < position("kubectl apply -f https://example.com/calico.yaml"));

    let cluster = orch.get_cluster().await.unwrap();
    assert!(cluster.status.is_condition_true(ConditionType::InstallSuccess));
    let history = orch.audit_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, "Install");
    assert_eq!(history[0].status, "Provisioned");
    assert_eq!(history[0].current_version, "1.26.5");

    assert!(orch.get_kubeconfig().await.unwrap().contains("kubernetes-admin"));
}

#[tokio::test]
async fn test_install_twice_is_rejected() {
    let (orch, _) = installed(DryRunOsUtil::new()).await;
    let err = orch.install(kubeadm_spec()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::AlreadyInitialized));
    assert_eq!(orch.audit_history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pre_task_failure_stops_pipeline() {
    let os = DryRunOsUtil::new();
    os.fail_on("package install containerd").await;
    let (orch, os) = setup(os);

    let phase = orch.install(kubeadm_spec()).await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Failed);
    assert_eq!(os.call_count("kubeadm init").await, 0);
    assert_eq!(os.call_count("kubectl").await, 0);

    let status = orch.state().status().await.unwrap();
    let condition = status.condition(ConditionType::InstallSuccess).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);

    let history = orch.audit_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "Failed");
    assert!(history[0].reason.starts_with("pre-task install-containerd:"));
}

#[tokio::test]
async fn test_failed_install_can_be_retried() {
    let os = DryRunOsUtil::new();
    os.fail_on("kubeadm init").await;
    let (orch, os) = setup(os);
    orch.install(kubeadm_spec()).await.unwrap().wait().await.unwrap();

    os.clear_failures().await;
    let phase = orch.install(kubeadm_spec()).await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    assert_eq!(orch.audit_history().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_upgrade_during_install_is_rejected() {
    let (orch, _) = setup(DryRunOsUtil::new());
    let handle = orch.install(kubeadm_spec()).await.unwrap();

    let err = orch.upgrade("1.27.3").await.unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::OperationInProgress(ClusterPhase::Provisioning)
    ));
    assert_eq!(orch.state().phase().await.unwrap(), ClusterPhase::Provisioning);

    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_upgrade_before_install_is_rejected() {
    let (orch, _) = setup(DryRunOsUtil::new());
    assert!(matches!(
        orch.upgrade("1.27.3").await.unwrap_err(),
        OrchestrationError::NotInitialized(_)
    ));
    assert!(matches!(
        orch.upgrade("").await.unwrap_err(),
        OrchestrationError::Validation(_)
    ));
}

#[tokio::test]
async fn test_upgrade_success() {
    let (orch, os) = installed(DryRunOsUtil::new()).await;

    let phase = orch.upgrade("1.27.3").await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    assert_eq!(os.call_count("kubeadm upgrade apply v1.27.3").await, 1);
    assert_eq!(os.call_count("kubectl cordon").await, 1);
    assert_eq!(os.call_count("kubectl uncordon").await, 2);

    let cluster = orch.get_cluster().await.unwrap();
    assert_eq!(cluster.status.kubernetes_version, "1.27.3");
    assert_eq!(cluster.spec.version, "1.27.3");
    assert!(cluster.status.is_condition_true(ConditionType::UpgradeSuccess));

    let history = orch.audit_history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].operation, "Upgrade");
    assert_eq!(history[1].current_version, "1.27.3");
}

#[tokio::test]
async fn test_failed_upgrade_restores_version() {
    let (orch, os) = installed(DryRunOsUtil::new()).await;
    os.fail_on("kubeadm upgrade apply").await;

    let phase = orch.upgrade("1.27.3").await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Failed);

    let cluster = orch.get_cluster().await.unwrap();
    assert_eq!(cluster.status.kubernetes_version, "1.26.5");
    assert_eq!(cluster.spec.version, "1.26.5");
    let condition = cluster.status.condition(ConditionType::UpgradeSuccess).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, UPGRADE_FAILED);

    let history = orch.audit_history().await.unwrap();
    assert_eq!(history.last().unwrap().status, "Failed");
    assert_eq!(history.last().unwrap().current_version, "1.26.5");
}

#[tokio::test]
async fn test_reset_purges_everything_but_its_own_record() {
    let (orch, os) = installed(DryRunOsUtil::new()).await;

    let phase = orch.reset().await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Deleted);
    assert_eq!(os.call_count("kubeadm reset -f").await, 1);
    assert!(!os
        .filesystem()
        .exists(std::path::Path::new(KUBEADM_KUBECONFIG_PATH))
        .await
        .unwrap());

    let cluster = orch.get_cluster().await.unwrap();
    assert_eq!(cluster.status.phase, ClusterPhase::Deleted);
    assert_eq!(cluster.spec, ClusterSpec::default());

    let history = orch.audit_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, "Reset");

    // A deleted cluster can be installed again.
    let phase = orch.install(kubeadm_spec()).await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
}

#[tokio::test]
async fn test_reset_without_cluster_is_rejected() {
    let (orch, _) = setup(DryRunOsUtil::new());
    assert!(matches!(
        orch.reset().await.unwrap_err(),
        OrchestrationError::NotInitialized(_)
    ));
    assert!(orch.state().audit_history().await.unwrap().is_none());
}

#[tokio::test]
async fn test_reset_tears_down_stuck_operation() {
    for phase in [ClusterPhase::Provisioning, ClusterPhase::Upgrading] {
        let (orch, os) = setup(DryRunOsUtil::new());
        orch.state().write_spec(&kubeadm_spec()).await.unwrap();
        orch.state().set_phase(phase).await.unwrap();

        let phase = orch.reset().await.unwrap().wait().await.unwrap();
        assert_eq!(phase, ClusterPhase::Deleted);
        assert_eq!(os.call_count("kubeadm reset -f").await, 1);
        assert_eq!(orch.state().phase().await.unwrap(), ClusterPhase::Deleted);
    }
}

#[tokio::test]
async fn test_failed_reset_keeps_history() {
    let (orch, os) = installed(DryRunOsUtil::new()).await;
    os.fail_on("kubeadm reset").await;

    let phase = orch.reset().await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Failed);
    let status = orch.state().status().await.unwrap();
    assert_eq!(
        status.condition(ConditionType::DeleteSuccess).unwrap().status,
        ConditionStatus::False
    );
    assert_eq!(orch.audit_history().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_reset_config_rotates_certificates() {
    let (orch, os) = installed(DryRunOsUtil::new().with_cert_expiry_days(20)).await;

    let phase = orch.reset_config().await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    assert_eq!(os.call_count("kubeadm certs renew all").await, 1);
    assert_eq!(os.call_count("fs rename /etc/kubernetes/manifests ").await, 1);

    let certs = orch.get_certs().await.unwrap();
    assert!(certs.iter().all(|c| c.remaining_days > 20));
    assert_eq!(orch.audit_history().await.unwrap()[1].operation, "Reset Certs");
}

#[tokio::test]
async fn test_patch_updates_scheduling() {
    let (orch, os) = installed(DryRunOsUtil::new()).await;

    let delta = ClusterSpec {
        disable_workloads: Some(true),
        ..Default::default()
    };
    let phase = orch.patch(delta).await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    assert_eq!(os.call_count("kubectl cordon").await, 1);

    let cluster = orch.get_cluster().await.unwrap();
    assert!(cluster.status.unschedulable);
    assert_eq!(cluster.spec.disable_workloads, Some(true));
    assert!(cluster.status.is_condition_true(ConditionType::PackageReady));
    assert_eq!(orch.audit_history().await.unwrap()[1].operation, "Patch");
}

#[tokio::test]
async fn test_failed_patch_keeps_phase() {
    let (orch, os) = installed(DryRunOsUtil::new()).await;
    os.fail_on("kubectl apply").await;

    let phase = orch
        .patch(ClusterSpec::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    let status = orch.state().status().await.unwrap();
    let condition = status.condition(ConditionType::PackageReady).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert!(condition.message.contains("install-cni"));
}

#[tokio::test]
async fn test_k3s_install_and_reset() {
    let (orch, os) = setup(DryRunOsUtil::new());
    let spec = ClusterSpec {
        cluster_type: "k3s".to_string(),
        ..Default::default()
    };

    let phase = orch.install(spec).await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    assert_eq!(os.call_count("fs download https://get.k3s.io").await, 1);
    assert_eq!(os.call_count("kubeadm").await, 0);

    let cluster = orch.get_cluster().await.unwrap();
    assert_eq!(cluster.spec.version, "latest");
    assert_eq!(
        cluster.spec.networking.unwrap().pod_subnet,
        "10.42.0.0/16"
    );
    assert!(orch.get_certs().await.unwrap().is_empty());

    let phase = orch.reset().await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Deleted);
}

#[tokio::test]
async fn test_cancelled_operation_fails() {
    let cancel = CancellationToken::new();
    let (orch, os) = setup(DryRunOsUtil::new());
    let orch = orch.with_cancellation(cancel.clone());
    cancel.cancel();

    let phase = orch.install(kubeadm_spec()).await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Failed);
    assert!(os.calls().await.is_empty());
}
