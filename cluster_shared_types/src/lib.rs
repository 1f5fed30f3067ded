//! Data model shared by every crate of the cluster agent.
//!
//! The agent manages exactly one local cluster, so the persisted model is a
//! single [`ClusterSpec`], a single [`ClusterStatus`] and an append-only list
//! of [`AuditRecord`]s.

pub mod constants;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ===== Errors =====

/// Pipeline group a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskGroup {
    Pre,
    Main,
    Post,
}

impl TaskGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskGroup::Pre => "pre-task",
            TaskGroup::Main => "task",
            TaskGroup::Post => "post-task",
        }
    }
}

impl fmt::Display for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("cluster already initialized")]
    AlreadyInitialized,
    #[error("cluster is not initialized: {0}")]
    NotInitialized(String),
    #[error("currently {0} is running, retry once it reaches a terminal state")]
    OperationInProgress(ClusterPhase),
    #[error("{group} {task}: {message}")]
    Task {
        group: TaskGroup,
        task: String,
        message: String,
    },
    #[error("System error: {0}")]
    SystemError(String),
    #[error("State persistence error: {0}")]
    StateError(String),
    #[error("Cluster client error: {0}")]
    ClusterError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl OrchestrationError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }
}

// Generic result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

// ===== Distribution =====

/// Kubernetes distribution the agent drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    #[default]
    Kubeadm,
    K3s,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Kubeadm => "kubeadm",
            ClusterType::K3s => "k3s",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterType {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubeadm" => Ok(ClusterType::Kubeadm),
            "k3s" => Ok(ClusterType::K3s),
            other => Err(OrchestrationError::validation(format!(
                "unsupported cluster type: {:?}",
                other
            ))),
        }
    }
}

// ===== Cluster spec =====

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterNetworking {
    pub pod_subnet: String,
    pub svc_subnet: String,
    pub cni_name: String,
    pub cni_version: String,
    pub cni_manifest_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStorage {
    pub csi_name: String,
    pub csi_version: String,
    pub csi_manifest_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerSpec {
    pub cert_sans: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryAuth {
    pub is_auth_required: bool,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterCri {
    pub private_registry_fqdn: String,
    pub registry_auth: RegistryAuth,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterRuntime {
    pub customise_cluster_runtime: bool,
    pub cluster_cri: ClusterCri,
}

/// Desired configuration of the managed cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    /// Distribution name ("kubeadm" or "k3s"); empty means the default.
    pub cluster_type: String,
    pub cluster_name: String,
    pub version: String,
    pub networking: Option<ClusterNetworking>,
    pub storage: Option<ClusterStorage>,
    pub api_server: Option<ApiServerSpec>,
    pub cluster_runtime: Option<ClusterRuntime>,
    pub disable_workloads: Option<bool>,
    pub extra_args: HashMap<String, String>,
}

impl ClusterSpec {
    /// Parsed distribution, falling back to the default for an empty type.
    pub fn distribution(&self) -> Result<ClusterType> {
        if self.cluster_type.trim().is_empty() {
            return Ok(ClusterType::default());
        }
        self.cluster_type.parse()
    }

    pub fn cni_manifest_url(&self) -> Option<&str> {
        self.networking
            .as_ref()
            .map(|n| n.cni_manifest_url.as_str())
            .filter(|url| !url.is_empty())
    }
}

// ===== Cluster status =====

/// Coarse lifecycle state of the managed cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterPhase {
    #[default]
    NotInitialised,
    Provisioning,
    Provisioned,
    Upgrading,
    Deleting,
    Deleted,
    KubeConfigResetting,
    Failed,
}

impl ClusterPhase {
    /// Phases that mean a lifecycle operation is running.
    pub const IN_PROGRESS: [ClusterPhase; 4] = [
        ClusterPhase::Provisioning,
        ClusterPhase::Upgrading,
        ClusterPhase::Deleting,
        ClusterPhase::KubeConfigResetting,
    ];

    pub fn is_in_progress(&self) -> bool {
        Self::IN_PROGRESS.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterPhase::NotInitialised => "NotInitialised",
            ClusterPhase::Provisioning => "Provisioning",
            ClusterPhase::Provisioned => "Provisioned",
            ClusterPhase::Upgrading => "Upgrading",
            ClusterPhase::Deleting => "Deleting",
            ClusterPhase::Deleted => "Deleted",
            ClusterPhase::KubeConfigResetting => "KubeConfigResetting",
            ClusterPhase::Failed => "Failed",
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    ClusterReady,
    NodeReady,
    ControlPlaneReady,
    InstallSuccess,
    UpgradeSuccess,
    DeleteSuccess,
    PackageReady,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::ClusterReady => "ClusterReady",
            ConditionType::NodeReady => "NodeReady",
            ConditionType::ControlPlaneReady => "ControlPlaneReady",
            ConditionType::InstallSuccess => "InstallSuccess",
            ConditionType::UpgradeSuccess => "UpgradeSuccess",
            ConditionType::DeleteSuccess => "DeleteSuccess",
            ConditionType::PackageReady => "PackageReady",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
    /// Only meaningful for conditions with status True.
    #[default]
    #[serde(rename = "")]
    None,
}

/// A typed health signal finer-grained than the phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Observed state of the managed cluster. Exactly one per agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub phase: ClusterPhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub kubernetes_version: String,
    #[serde(default)]
    pub unschedulable: bool,
}

impl Default for ClusterStatus {
    /// Status handed out before anything has been persisted.
    fn default() -> Self {
        let now = Utc::now();
        let not_ready = |condition_type| Condition {
            condition_type,
            status: ConditionStatus::False,
            reason: String::new(),
            severity: Severity::None,
            message: String::new(),
            last_transition_time: now,
        };
        Self {
            phase: ClusterPhase::NotInitialised,
            conditions: vec![
                not_ready(ConditionType::ClusterReady),
                not_ready(ConditionType::NodeReady),
                not_ready(ConditionType::ControlPlaneReady),
            ],
            kubernetes_version: String::new(),
            unschedulable: false,
        }
    }
}

impl ClusterStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

/// Spec and status together, as returned by GetCluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub api_version: String,
    pub kind: String,
    pub spec: ClusterSpec,
    pub status: ClusterStatus,
}

impl Cluster {
    pub fn new(spec: ClusterSpec, status: ClusterStatus) -> Self {
        Self {
            api_version: constants::API_VERSION.to_string(),
            kind: "Cluster".to_string(),
            spec,
            status,
        }
    }
}

// ===== Audit =====

/// Outcome of one completed lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub operation: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_executed: DateTime<Utc>,
    #[serde(default)]
    pub cluster_type: String,
    #[serde(default)]
    pub current_version: String,
}

// ===== Certificates =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub name: String,
    pub remaining_days: i64,
    pub expiry_date: String,
    pub rotation_date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_phases() {
        assert!(ClusterPhase::Provisioning.is_in_progress());
        assert!(ClusterPhase::Upgrading.is_in_progress());
        assert!(ClusterPhase::Deleting.is_in_progress());
        assert!(ClusterPhase::KubeConfigResetting.is_in_progress());
        assert!(!ClusterPhase::Provisioned.is_in_progress());
        assert!(!ClusterPhase::Failed.is_in_progress());
        assert!(!ClusterPhase::NotInitialised.is_in_progress());
        assert!(!ClusterPhase::Deleted.is_in_progress());
    }

    #[test]
    fn test_default_status_is_not_ready() {
        let status = ClusterStatus::default();
        assert_eq!(status.phase, ClusterPhase::NotInitialised);
        assert_eq!(status.conditions.len(), 3);
        assert!(!status.is_condition_true(ConditionType::ClusterReady));
        assert!(!status.is_condition_true(ConditionType::NodeReady));
        assert!(!status.is_condition_true(ConditionType::ControlPlaneReady));
    }

    #[test]
    fn test_cluster_type_parsing() {
        assert_eq!("kubeadm".parse::<ClusterType>().unwrap(), ClusterType::Kubeadm);
        assert_eq!("K3S".parse::<ClusterType>().unwrap(), ClusterType::K3s);
        assert!("minikube".parse::<ClusterType>().is_err());

        let spec = ClusterSpec::default();
        assert_eq!(spec.distribution().unwrap(), ClusterType::Kubeadm);
    }

    #[test]
    fn test_severity_none_serializes_empty() {
        let json = serde_json::to_string(&Severity::None).unwrap();
        assert_eq!(json, "\"\"");
        let parsed: Severity = serde_json::from_str("\"Warning\"").unwrap();
        assert_eq!(parsed, Severity::Warning);
    }

    #[test]
    fn test_task_error_message_carries_group_and_name() {
        let err = OrchestrationError::Task {
            group: TaskGroup::Pre,
            task: "install-containerd".to_string(),
            message: "exit code 1".to_string(),
        };
        assert_eq!(err.to_string(), "pre-task install-containerd: exit code 1");
    }
}
