//! Agent configuration, read from a TOML file.
//!
//! Every field has a default, so an empty file (or none at all) yields a
//! working configuration. Command line flags are layered on top by the
//! binary.
//!
//! ```toml
//! listen_addr = "0.0.0.0:8080"
//! dry_run = false
//!
//! [state]
//! backend = "sqlite"
//! path = "/var/lib/cluster-agent/state.db"
//!
//! [log]
//! level = "info"
//! json = false
//!
//! [reconcilers]
//! status_interval_secs = 10
//! certs_interval_secs = 36000
//!
//! [certs]
//! rotation_threshold_days = 60
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cluster_shared_types::constants::CLUSTER_CERTS_ROTATION_DAYS;
use cluster_shared_types::OrchestrationError;
use state_store_interface::StateStoreConfig;

use crate::reconciler::StatusReconcilerConfig;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV_VAR: &str = "CLUSTER_AGENT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "/etc/cluster-agent/config.toml";
pub const DEFAULT_STATE_PATH: &str = "/var/lib/cluster-agent/state.db";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid listen address {0}")]
    ListenAddr(String),
}

impl From<ConfigLoadError> for OrchestrationError {
    fn from(err: ConfigLoadError) -> Self {
        OrchestrationError::ConfigError(err.to_string())
    }
}

/// Where the config file lives.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    config_file: PathBuf,
}

impl ConfigPaths {
    /// `$CLUSTER_AGENT_CONFIG`, or the system-wide default.
    pub fn new() -> Self {
        let config_file = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self { config_file }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            config_file: path.into(),
        }
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn config_exists(&self) -> bool {
        self.config_file.exists()
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Sections =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateBackend {
    Sqlite,
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    pub backend: StateBackend,
    pub path: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            backend: StateBackend::Sqlite,
            path: PathBuf::from(DEFAULT_STATE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSection {
    pub status_interval_secs: u64,
    pub certs_interval_secs: u64,
    pub manifest_restore_wait_secs: u64,
    pub node_status_retries: u32,
    pub node_status_backoff_secs: u64,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            status_interval_secs: 10,
            certs_interval_secs: 36_000,
            manifest_restore_wait_secs: 40,
            node_status_retries: 5,
            node_status_backoff_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertsSection {
    pub rotation_threshold_days: i64,
}

impl Default for CertsSection {
    fn default() -> Self {
        Self {
            rotation_threshold_days: CLUSTER_CERTS_ROTATION_DAYS,
        }
    }
}

// ===== AgentConfig =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub listen_addr: String,
    pub dry_run: bool,
    pub state: StateSection,
    pub log: LogSection,
    pub reconcilers: ReconcilerSection,
    pub certs: CertsSection,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            dry_run: false,
            state: StateSection::default(),
            log: LogSection::default(),
            reconcilers: ReconcilerSection::default(),
            certs: CertsSection::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(content)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    /// Load the file named by `paths`, or fall back to defaults when it is
    /// missing.
    pub async fn load_or_default(paths: &ConfigPaths) -> Result<Self, ConfigLoadError> {
        if paths.config_exists() {
            Self::load(paths.config_file()).await
        } else {
            Ok(Self::default())
        }
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log.level = level.into();
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.log.json = json;
        self
    }

    pub fn with_state(mut self, backend: StateBackend, path: impl Into<PathBuf>) -> Self {
        self.state = StateSection {
            backend,
            path: path.into(),
        };
        self
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigLoadError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigLoadError::ListenAddr(self.listen_addr.clone()))
    }

    pub fn state_store(&self) -> StateStoreConfig {
        match self.state.backend {
            StateBackend::Sqlite => StateStoreConfig::Sqlite {
                path: self.state.path.clone(),
            },
            StateBackend::InMemory => StateStoreConfig::InMemory,
        }
    }

    pub fn status_reconciler(&self) -> StatusReconcilerConfig {
        let r = &self.reconcilers;
        StatusReconcilerConfig::default()
            .with_interval(Duration::from_secs(r.status_interval_secs))
            .with_manifest_restore_wait(Duration::from_secs(r.manifest_restore_wait_secs))
            .with_node_status_retries(
                r.node_status_retries,
                Duration::from_secs(r.node_status_backoff_secs),
            )
    }

    pub fn certs_interval(&self) -> Duration {
        Duration::from_secs(self.reconcilers.certs_interval_secs)
    }
}
