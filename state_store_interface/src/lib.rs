use async_trait::async_trait;
use cluster_shared_types::{AuditRecord, ClusterSpec, ClusterStatus, OrchestrationError, Result};
use std::sync::Arc;
use thiserror::Error;

/// Errors specific to state store operations
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StateStoreError> for OrchestrationError {
    fn from(err: StateStoreError) -> Self {
        OrchestrationError::StateError(err.to_string())
    }
}

// ===== Logical tables and keys =====

pub const CLUSTER_TABLE: &str = "cluster";
pub const CLUSTER_STATUS_TABLE: &str = "cluster_status";
pub const CLUSTER_AUDIT_TABLE: &str = "cluster_audit_history";
pub const CLUSTER_CONFIG_TABLE: &str = "cluster_config";

pub const CLUSTER_SPEC_KEY: &str = "clusterSpec";
pub const CLUSTER_STATUS_KEY: &str = "clusterStatus";
pub const CLUSTER_AUDITS_KEY: &str = "clusterAudits";

/// Persistence collaborator for the single managed cluster.
///
/// One logical table per concern: spec, status, audit history and named
/// config blobs. Reads return `None` when nothing has been written yet;
/// callers decide on defaults.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    // ===== Initialization =====

    /// Create tables or connections as needed
    async fn initialize(&self) -> Result<()>;

    /// Check if the state store is healthy
    async fn health_check(&self) -> Result<bool>;

    // ===== Cluster spec =====

    async fn read_cluster_spec(&self) -> Result<Option<ClusterSpec>>;

    async fn write_cluster_spec(&self, spec: &ClusterSpec) -> Result<()>;

    // ===== Cluster status =====

    async fn read_cluster_status(&self) -> Result<Option<ClusterStatus>>;

    async fn write_cluster_status(&self, status: &ClusterStatus) -> Result<()>;

    // ===== Audit history =====

    async fn read_audit_history(&self) -> Result<Option<Vec<AuditRecord>>>;

    /// Replace the whole audit list.
    async fn write_audit_history(&self, history: &[AuditRecord]) -> Result<()>;

    // ===== Config blobs =====

    async fn read_config(&self, name: &str) -> Result<Option<Vec<u8>>>;

    async fn write_config(&self, name: &str, data: &[u8]) -> Result<()>;

    // ===== Purge =====

    /// Remove spec, status, audit history and config blobs.
    async fn purge_all(&self) -> Result<()>;
}

/// Order audit records before they are stored.
///
/// The comparator looks at the same record on both sides, so it always
/// reports equality and the stable sort keeps insertion order.
pub fn sort_audit_history_by_timestamp(history: &mut [AuditRecord]) {
    history.sort_by(|a, _b| a.last_executed.cmp(&a.last_executed));
}

// Re-export implementations based on features
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(feature = "in-memory")]
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteClusterStore;

/// Configuration for state store backends
#[derive(Debug, Clone)]
pub enum StateStoreConfig {
    /// Durable SQLite file
    #[cfg(feature = "sqlite")]
    Sqlite {
        /// Path to the SQLite database file
        path: std::path::PathBuf,
    },

    #[cfg(feature = "in-memory")]
    InMemory,
}

/// Build the configured store and run its initialization.
pub async fn create_state_store_async(config: StateStoreConfig) -> Result<Arc<dyn ClusterStore>> {
    let store: Arc<dyn ClusterStore> = match config {
        #[cfg(feature = "sqlite")]
        StateStoreConfig::Sqlite { path } => {
            Arc::new(sqlite_store::SqliteClusterStore::open(path).await?)
        }

        #[cfg(feature = "in-memory")]
        StateStoreConfig::InMemory => Arc::new(in_memory::InMemoryClusterStore::new()),

        #[allow(unreachable_patterns)]
        _ => {
            return Err(OrchestrationError::ConfigError(
                "State store configuration not supported with current features".to_string(),
            ))
        }
    };
    store.initialize().await?;
    Ok(store)
}
