//! Live Linux implementation of the OS utility surface.

mod exec;
mod filesystem;
mod kube_tools;
mod services;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cluster_shared_types::Result;
use os_utility_interface::{
    Exec, Filesystem, Host, Kubeadm, Kubectl, OsUtil, OsUtilError, PackageManager, Sysctl, Systemd,
};

pub use exec::LiveExec;
pub use filesystem::LiveFilesystem;
pub use kube_tools::{parse_certs_expiry, LiveKubeadm, LiveKubectl};
pub use services::{LivePackageManager, LiveSysctl, LiveSystemd};

/// Configuration for [`LinuxOsUtil`].
#[derive(Debug, Clone)]
pub struct LinuxOsUtilConfig {
    /// Upper bound for any single command (default: 15m, `kubeadm init` is slow)
    pub command_timeout: Duration,
    /// File holding the host name
    pub hostname_file: PathBuf,
}

impl Default for LinuxOsUtilConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(15 * 60),
            hostname_file: PathBuf::from("/proc/sys/kernel/hostname"),
        }
    }
}

impl LinuxOsUtilConfig {
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_hostname_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hostname_file = path.into();
        self
    }
}

// ===== Host =====

pub struct LiveHost {
    hostname_file: PathBuf,
}

#[async_trait]
impl Host for LiveHost {
    async fn hostname(&self) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.hostname_file)
            .await
            .map_err(|e| OsUtilError::io(&self.hostname_file, e))?;
        Ok(raw.trim().to_lowercase())
    }
}

/// All live capabilities sharing one [`LiveExec`].
pub struct LinuxOsUtil {
    exec: Arc<LiveExec>,
    filesystem: LiveFilesystem,
    package_manager: LivePackageManager,
    sysctl: LiveSysctl,
    systemd: LiveSystemd,
    kubectl: LiveKubectl,
    kubeadm: LiveKubeadm,
    host: LiveHost,
}

impl LinuxOsUtil {
    pub fn new() -> Self {
        Self::with_config(LinuxOsUtilConfig::default())
    }

    pub fn with_config(config: LinuxOsUtilConfig) -> Self {
        let exec = Arc::new(LiveExec::new(config.command_timeout));
        Self {
            filesystem: LiveFilesystem::new(),
            package_manager: LivePackageManager::new(exec.clone()),
            sysctl: LiveSysctl::new(exec.clone()),
            systemd: LiveSystemd::new(exec.clone()),
            kubectl: LiveKubectl::new(exec.clone()),
            kubeadm: LiveKubeadm::new(exec.clone()),
            host: LiveHost {
                hostname_file: config.hostname_file,
            },
            exec,
        }
    }
}

impl Default for LinuxOsUtil {
    fn default() -> Self {
        Self::new()
    }
}

impl OsUtil for LinuxOsUtil {
    fn exec(&self) -> &dyn Exec {
        self.exec.as_ref()
    }

    fn filesystem(&self) -> &dyn Filesystem {
        &self.filesystem
    }

    fn package_manager(&self) -> &dyn PackageManager {
        &self.package_manager
    }

    fn sysctl(&self) -> &dyn Sysctl {
        &self.sysctl
    }

    fn systemd(&self) -> &dyn Systemd {
        &self.systemd
    }

    fn kubectl(&self) -> &dyn Kubectl {
        &self.kubectl
    }

    fn kubeadm(&self) -> &dyn Kubeadm {
        &self.kubeadm
    }

    fn host(&self) -> &dyn Host {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hostname_is_lowercased() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hostname");
        std::fs::write(&file, "Edge-Node-01\n").unwrap();

        let os = LinuxOsUtil::with_config(LinuxOsUtilConfig::default().with_hostname_file(&file));
        assert_eq!(os.host().hostname().await.unwrap(), "edge-node-01");
    }
}
