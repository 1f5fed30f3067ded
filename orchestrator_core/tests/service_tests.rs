mod common;

use std::sync::atomic::Ordering;

use cluster_shared_types::constants::KUBEADM_KUBECONFIG_PATH;
use cluster_shared_types::{ClusterPhase, ClusterSpec, OrchestrationError};
use orchestrator_core::reconciler::{ReconcilerState, CERTS_RECONCILER_NAME, STATUS_RECONCILER_NAME};

use common::{harness, kubeadm_spec};

#[tokio::test]
async fn test_create_starts_reconcilers() {
    let h = harness();
    assert!(h.service.reconciler_statuses().await.is_empty());

    let phase = h
        .service
        .create_cluster(kubeadm_spec())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);

    let statuses = h.service.reconciler_statuses().await;
    let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec![CERTS_RECONCILER_NAME, STATUS_RECONCILER_NAME]);
    assert!(statuses.iter().all(|s| s.status == ReconcilerState::Ok));
    assert_eq!(statuses[1].interval, "10s");

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_failed_create_starts_nothing() {
    let h = harness();
    h.os.fail_on("kubeadm init").await;

    let phase = h
        .service
        .create_cluster(kubeadm_spec())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(phase, ClusterPhase::Failed);
    assert!(h.service.reconciler_statuses().await.is_empty());
}

#[tokio::test]
async fn test_create_requires_cluster_type() {
    let h = harness();
    let spec = ClusterSpec {
        cluster_type: "  ".to_string(),
        ..kubeadm_spec()
    };
    let err = h.service.create_cluster(spec).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(_)));
    assert_eq!(h.state.phase().await.unwrap(), ClusterPhase::NotInitialised);
}

#[tokio::test]
async fn test_delete_stops_status_reconciler() {
    let h = harness();
    h.service
        .create_cluster(kubeadm_spec())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let phase = h.service.delete_cluster().await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Deleted);
    assert!(!h.service.registry().is_running(STATUS_RECONCILER_NAME).await);
    assert!(h.service.registry().is_running(CERTS_RECONCILER_NAME).await);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_reset_certs_restarts_status_reconciler() {
    let h = harness();
    h.service
        .create_cluster(kubeadm_spec())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let phase = h.service.reset_certs().await.unwrap().wait().await.unwrap();
    assert_eq!(phase, ClusterPhase::Provisioned);
    assert!(h.service.registry().is_running(STATUS_RECONCILER_NAME).await);
    assert_eq!(h.service.reconciler_statuses().await.len(), 2);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_start_recovers_interrupted_operation() {
    let h = harness();
    h.state.write_spec(&kubeadm_spec()).await.unwrap();
    h.state.set_phase(ClusterPhase::Upgrading).await.unwrap();
    h.os.add_file(KUBEADM_KUBECONFIG_PATH, b"apiVersion: v1").await;

    let interrupted = h.service.start().await.unwrap();
    assert_eq!(interrupted, Some(ClusterPhase::Upgrading));
    assert_eq!(h.state.phase().await.unwrap(), ClusterPhase::Failed);
    assert_eq!(h.service.reconciler_statuses().await.len(), 2);

    h.service.shutdown().await;
    assert!(h.service.reconciler_statuses().await.is_empty());
}

#[tokio::test]
async fn test_start_without_cluster() {
    let h = harness();
    assert_eq!(h.service.start().await.unwrap(), None);
    assert_eq!(h.state.phase().await.unwrap(), ClusterPhase::NotInitialised);
    assert!(h.service.reconciler_statuses().await.is_empty());
    assert_eq!(h.factory.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_queries_pass_through() {
    let h = harness();
    assert!(matches!(
        h.service.audit_history().await.unwrap_err(),
        OrchestrationError::NotFound(_)
    ));
    assert!(matches!(
        h.service.get_kubeconfig().await.unwrap_err(),
        OrchestrationError::NotInitialized(_)
    ));

    h.service
        .create_cluster(kubeadm_spec())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(h.service.get_cluster().await.unwrap().spec.version, "1.26.5");
    assert!(!h.service.get_certs().await.unwrap().is_empty());
    assert_eq!(h.service.audit_history().await.unwrap().len(), 1);

    h.service.shutdown().await;
}
