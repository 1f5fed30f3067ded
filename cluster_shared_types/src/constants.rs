//! Well-known paths, messages and thresholds.

use std::time::Duration;

pub const API_VERSION: &str = "v1alpha1";

// ===== Paths =====

pub const KUBEADM_KUBECONFIG_PATH: &str = "/etc/kubernetes/admin.conf";
pub const K3S_KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
pub const STATIC_POD_MANIFESTS: &str = "/etc/kubernetes/manifests";
pub const STATIC_POD_MANIFESTS_BACKUP: &str = "/etc/kubernetes/manifests-bkp";
pub const KUBEADM_CA_KEY_PATH: &str = "/etc/kubernetes/pki/ca.key";
pub const KUBEADM_CONFIG_FILE: &str = "/tmp/kubeadm-config.yaml";
pub const CNI_CONFIG_DIR: &str = "/etc/cni/net.d";
pub const CONTAINERD_CONFIG_PATH: &str = "/etc/containerd/config.toml";

// ===== Networking defaults =====

pub const DEFAULT_POD_NETWORK: &str = "100.100.0.0/16";
pub const DEFAULT_SERVICE_NETWORK: &str = "100.101.0.0/16";
pub const K3S_DEFAULT_POD_NETWORK: &str = "10.42.0.0/16";
pub const K3S_DEFAULT_SERVICE_NETWORK: &str = "10.43.0.0/16";
pub const K3S_DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_CLUSTER_NAME: &str = "kubernetes";

// ===== Timing =====

pub const CLUSTER_CERTS_ROTATION_DAYS: i64 = 60;
pub const NODE_READINESS_MAX_RETRY_COUNT: u32 = 30;
pub const NODE_READINESS_RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const CONTROL_PLANE_RESTART_WAIT: Duration = Duration::from_secs(30);
pub const CONTROL_PLANE_STARTUP_WAIT: Duration = Duration::from_secs(20);

// ===== Control plane =====

pub const CONTROL_PLANE_PODS: [&str; 4] = ["kube-apiserver", "kube-proxy", "kube-scheduler", "etcd"];
pub const KUBEADM_INIT_SUCCESS_MESSAGE: &str =
    "Your Kubernetes control-plane has initialized successfully!";
pub const COREDNS_CONFIG_NAME: &str = "coredns";

// ===== Condition reasons =====

pub const CONTROL_PLANE_READY_FAILED: &str = "Control plane is not ready";
pub const CLUSTER_READY_FAILED: &str = "Cluster is not in ready state";
pub const INSTALL_READY_FAILED: &str = "Install has not succeeded";
pub const CLUSTER_DELETE_FAILED: &str = "Delete has failed";
pub const UPGRADE_FAILED: &str = "Upgrade has failed";
pub const NODE_READY_FAILED: &str = "Node is not in ready state";
pub const PACKAGE_READY_FAILED: &str = "Package installation failed";
