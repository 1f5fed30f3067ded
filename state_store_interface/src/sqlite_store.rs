//! SQLite implementation of ClusterStore.
//!
//! The default, durable backend. Each logical table is a key/value table
//! holding JSON documents (config blobs are stored as raw bytes).

use async_trait::async_trait;
use cluster_shared_types::{AuditRecord, ClusterSpec, ClusterStatus, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::{
    ClusterStore, StateStoreError, CLUSTER_AUDITS_KEY, CLUSTER_AUDIT_TABLE, CLUSTER_CONFIG_TABLE,
    CLUSTER_SPEC_KEY, CLUSTER_STATUS_KEY, CLUSTER_STATUS_TABLE, CLUSTER_TABLE,
};

const TABLES: [&str; 4] = [
    CLUSTER_TABLE,
    CLUSTER_STATUS_TABLE,
    CLUSTER_AUDIT_TABLE,
    CLUSTER_CONFIG_TABLE,
];

/// SQLite-backed implementation of ClusterStore.
#[derive(Clone)]
pub struct SqliteClusterStore {
    pool: SqlitePool,
}

impl SqliteClusterStore {
    /// Open or create a SQLite store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StateStoreError::ConnectionError(format!(
                        "failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(StateStoreError::from)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StateStoreError::from)?;

        info!("Connected to SQLite state store at: {}", path.display());
        Ok(Self { pool })
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self> {
        // A single connection, since every new connection gets its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(StateStoreError::from)?;
        Ok(Self { pool })
    }

    async fn get_raw(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(&format!("SELECT value FROM {} WHERE key = ?", table))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StateStoreError::from)?;

        match row {
            Some(row) => Ok(Some(
                row.try_get::<Vec<u8>, _>("value")
                    .map_err(StateStoreError::from)?,
            )),
            None => Ok(None),
        }
    }

    async fn put_raw(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            table
        ))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StateStoreError::from)?;
        debug!(table, key, "State record written");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>> {
        match self.get_raw(table, key).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(StateStoreError::from)?,
            )),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, table: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(StateStoreError::from)?;
        self.put_raw(table, key, &bytes).await
    }
}

#[async_trait]
impl ClusterStore for SqliteClusterStore {
    async fn initialize(&self) -> Result<()> {
        for table in TABLES {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, value BLOB NOT NULL)",
                table
            ))
            .execute(&self.pool)
            .await
            .map_err(StateStoreError::from)?;
        }
        debug!("State store schema ready");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    // ===== Cluster spec =====

    async fn read_cluster_spec(&self) -> Result<Option<ClusterSpec>> {
        self.get_json(CLUSTER_TABLE, CLUSTER_SPEC_KEY).await
    }

    async fn write_cluster_spec(&self, spec: &ClusterSpec) -> Result<()> {
        self.put_json(CLUSTER_TABLE, CLUSTER_SPEC_KEY, spec).await
    }

    // ===== Cluster status =====

    async fn read_cluster_status(&self) -> Result<Option<ClusterStatus>> {
        self.get_json(CLUSTER_STATUS_TABLE, CLUSTER_STATUS_KEY).await
    }

    async fn write_cluster_status(&self, status: &ClusterStatus) -> Result<()> {
        self.put_json(CLUSTER_STATUS_TABLE, CLUSTER_STATUS_KEY, status)
            .await
    }

    // ===== Audit history =====

    async fn read_audit_history(&self) -> Result<Option<Vec<AuditRecord>>> {
        self.get_json(CLUSTER_AUDIT_TABLE, CLUSTER_AUDITS_KEY).await
    }

    async fn write_audit_history(&self, history: &[AuditRecord]) -> Result<()> {
        self.put_json(CLUSTER_AUDIT_TABLE, CLUSTER_AUDITS_KEY, &history)
            .await
    }

    // ===== Config blobs =====

    async fn read_config(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.get_raw(CLUSTER_CONFIG_TABLE, name).await
    }

    async fn write_config(&self, name: &str, data: &[u8]) -> Result<()> {
        self.put_raw(CLUSTER_CONFIG_TABLE, name, data).await
    }

    async fn purge_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(StateStoreError::from)?;
        for table in TABLES {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(StateStoreError::from)?;
        }
        tx.commit().await.map_err(StateStoreError::from)?;
        info!("Cluster state purged");
        Ok(())
    }
}
