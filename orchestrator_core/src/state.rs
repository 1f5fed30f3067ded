//! Shared handle on the persisted cluster spec, status, audit history and
//! config blobs.
//!
//! Every read-modify-write of the status goes through [`ClusterState`] while
//! holding its mutex, so a precondition check and the phase write that
//! follows it cannot interleave with another writer.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use cluster_shared_types::{AuditRecord, ClusterPhase, ClusterSpec, ClusterStatus, Result};
use state_store_interface::ClusterStore;

#[derive(Clone)]
pub struct ClusterState {
    store: Arc<dyn ClusterStore>,
    lock: Arc<Mutex<()>>,
}

impl ClusterState {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    // ===== Status =====

    /// Current status; the first access creates and persists the
    /// `NotInitialised` default.
    pub async fn status(&self) -> Result<ClusterStatus> {
        let _guard = self.lock.lock().await;
        self.load_status().await
    }

    pub async fn phase(&self) -> Result<ClusterPhase> {
        Ok(self.status().await?.phase)
    }

    /// Apply `f` to the persisted status and write it back.
    pub async fn update<F>(&self, f: F) -> Result<ClusterStatus>
    where
        F: FnOnce(&mut ClusterStatus),
    {
        let _guard = self.lock.lock().await;
        let mut status = self.load_status().await?;
        f(&mut status);
        self.store.write_cluster_status(&status).await?;
        Ok(status)
    }

    pub async fn set_phase(&self, phase: ClusterPhase) -> Result<ClusterStatus> {
        self.update(|status| status.phase = phase).await
    }

    /// Check a precondition and move to `target` as one step.
    ///
    /// `check` sees the current status; when it fails nothing is written.
    /// When `spec` is given it is persisted together with the new phase.
    pub async fn try_begin<F>(
        &self,
        check: F,
        target: ClusterPhase,
        spec: Option<&ClusterSpec>,
    ) -> Result<ClusterStatus>
    where
        F: FnOnce(&ClusterStatus) -> Result<()>,
    {
        let _guard = self.lock.lock().await;
        let mut status = self.load_status().await?;
        check(&status)?;

        debug!(from = %status.phase, to = %target, "Phase transition");
        status.phase = target;
        if let Some(spec) = spec {
            self.store.write_cluster_spec(spec).await?;
        }
        self.store.write_cluster_status(&status).await?;
        Ok(status)
    }

    async fn load_status(&self) -> Result<ClusterStatus> {
        match self.store.read_cluster_status().await? {
            Some(status) => Ok(status),
            None => {
                let status = ClusterStatus::default();
                self.store.write_cluster_status(&status).await?;
                Ok(status)
            }
        }
    }

    // ===== Spec =====

    /// Persisted spec, or an empty spec when none was written yet.
    pub async fn spec(&self) -> Result<ClusterSpec> {
        Ok(self.store.read_cluster_spec().await?.unwrap_or_default())
    }

    pub async fn write_spec(&self, spec: &ClusterSpec) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.write_cluster_spec(spec).await
    }

    // ===== Audit history =====

    pub async fn audit_history(&self) -> Result<Option<Vec<AuditRecord>>> {
        self.store.read_audit_history().await
    }

    /// Read the whole history, let `f` change it and store it again.
    pub async fn modify_audit_history<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<AuditRecord>),
    {
        let _guard = self.lock.lock().await;
        let mut history = self.store.read_audit_history().await?.unwrap_or_default();
        f(&mut history);
        self.store.write_audit_history(&history).await
    }

    // ===== Config blobs =====

    pub async fn config(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.store.read_config(name).await
    }

    pub async fn put_config(&self, name: &str, data: &[u8]) -> Result<()> {
        self.store.write_config(name, data).await
    }

    /// Drop spec, status, audit history and config blobs.
    pub async fn purge(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.purge_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_shared_types::OrchestrationError;
    use state_store_interface::in_memory::InMemoryClusterStore;

    fn state() -> ClusterState {
        ClusterState::new(Arc::new(InMemoryClusterStore::new()))
    }

    #[tokio::test]
    async fn test_first_access_persists_default() {
        let state = state();
        assert!(state.store().read_cluster_status().await.unwrap().is_none());

        let status = state.status().await.unwrap();
        assert_eq!(status.phase, ClusterPhase::NotInitialised);
        assert!(state.store().read_cluster_status().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_try_begin_rejects_without_writing() {
        let state = state();
        state.set_phase(ClusterPhase::Provisioning).await.unwrap();

        let result = state
            .try_begin(
                |status| {
                    if status.phase.is_in_progress() {
                        return Err(OrchestrationError::OperationInProgress(status.phase));
                    }
                    Ok(())
                },
                ClusterPhase::Upgrading,
                None,
            )
            .await;

        assert!(matches!(
            result,
            Err(OrchestrationError::OperationInProgress(ClusterPhase::Provisioning))
        ));
        assert_eq!(state.phase().await.unwrap(), ClusterPhase::Provisioning);
    }

    #[tokio::test]
    async fn test_try_begin_writes_phase_and_spec() {
        let state = state();
        let spec = ClusterSpec {
            cluster_type: "k3s".to_string(),
            version: "latest".to_string(),
            ..Default::default()
        };

        let status = state
            .try_begin(|_| Ok(()), ClusterPhase::Provisioning, Some(&spec))
            .await
            .unwrap();

        assert_eq!(status.phase, ClusterPhase::Provisioning);
        assert_eq!(state.spec().await.unwrap(), spec);
    }

    #[tokio::test]
    async fn test_concurrent_begins_admit_one() {
        let state = state();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                state
                    .try_begin(
                        |status| {
                            if status.phase.is_in_progress() {
                                return Err(OrchestrationError::OperationInProgress(status.phase));
                            }
                            Ok(())
                        },
                        ClusterPhase::Upgrading,
                        None,
                    )
                    .await
                    .is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_purge_clears_everything() {
        let state = state();
        state.set_phase(ClusterPhase::Provisioned).await.unwrap();
        state.put_config("coredns", b"{}").await.unwrap();
        state
            .modify_audit_history(|history| {
                history.push(AuditRecord {
                    operation: "Install".to_string(),
                    status: "Provisioned".to_string(),
                    reason: String::new(),
                    message: String::new(),
                    last_executed: chrono::Utc::now(),
                    cluster_type: "kubeadm".to_string(),
                    current_version: "1.26.5".to_string(),
                })
            })
            .await
            .unwrap();

        state.purge().await.unwrap();

        assert!(state.audit_history().await.unwrap().is_none());
        assert!(state.config("coredns").await.unwrap().is_none());
        assert_eq!(state.phase().await.unwrap(), ClusterPhase::NotInitialised);
    }
}
