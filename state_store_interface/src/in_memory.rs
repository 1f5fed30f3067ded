use async_trait::async_trait;
use cluster_shared_types::{AuditRecord, ClusterSpec, ClusterStatus, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ClusterStore;

/// In-memory implementation of ClusterStore
///
/// Used by tests and by agents started with the `in-memory` backend, where
/// losing the cluster record on restart is acceptable.
pub struct InMemoryClusterStore {
    spec: Arc<RwLock<Option<ClusterSpec>>>,
    status: Arc<RwLock<Option<ClusterStatus>>>,
    audits: Arc<RwLock<Option<Vec<AuditRecord>>>>,
    configs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        Self {
            spec: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(None)),
            audits: Arc::new(RwLock::new(None)),
            configs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    // ===== Cluster spec =====

    async fn read_cluster_spec(&self) -> Result<Option<ClusterSpec>> {
        Ok(self.spec.read().await.clone())
    }

    async fn write_cluster_spec(&self, spec: &ClusterSpec) -> Result<()> {
        *self.spec.write().await = Some(spec.clone());
        Ok(())
    }

    // ===== Cluster status =====

    async fn read_cluster_status(&self) -> Result<Option<ClusterStatus>> {
        Ok(self.status.read().await.clone())
    }

    async fn write_cluster_status(&self, status: &ClusterStatus) -> Result<()> {
        *self.status.write().await = Some(status.clone());
        Ok(())
    }

    // ===== Audit history =====

    async fn read_audit_history(&self) -> Result<Option<Vec<AuditRecord>>> {
        Ok(self.audits.read().await.clone())
    }

    async fn write_audit_history(&self, history: &[AuditRecord]) -> Result<()> {
        *self.audits.write().await = Some(history.to_vec());
        Ok(())
    }

    // ===== Config blobs =====

    async fn read_config(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.configs.read().await.get(name).cloned())
    }

    async fn write_config(&self, name: &str, data: &[u8]) -> Result<()> {
        self.configs
            .write()
            .await
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn purge_all(&self) -> Result<()> {
        *self.spec.write().await = None;
        *self.status.write().await = None;
        *self.audits.write().await = None;
        self.configs.write().await.clear();
        Ok(())
    }
}
