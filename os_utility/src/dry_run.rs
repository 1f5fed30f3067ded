//! Dry-run OS utility for development and testing.
//!
//! Every call is logged and recorded, nothing touches the host. Files live
//! in an in-memory map so tasks that write then read behave consistently.
//! Failures can be injected by command substring.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use cluster_shared_types::constants::{
    KUBEADM_CA_KEY_PATH, KUBEADM_INIT_SUCCESS_MESSAGE, KUBEADM_KUBECONFIG_PATH,
};
use cluster_shared_types::Result;
use os_utility_interface::{
    CertsExpiry, CommandOutput, Exec, Filesystem, Host, Kubeadm, Kubectl, OsUtil, OsUtilError,
    PackageManager, Sysctl, Systemd,
};

/// Validity reported right after a simulated `kubeadm certs renew all`.
pub const RENEWED_CERT_DAYS: i64 = 365;

const DRY_RUN_CERTIFICATES: [&str; 10] = [
    "admin.conf",
    "apiserver",
    "apiserver-etcd-client",
    "apiserver-kubelet-client",
    "controller-manager.conf",
    "etcd-healthcheck-client",
    "etcd-peer",
    "etcd-server",
    "front-proxy-client",
    "scheduler.conf",
];

const DRY_RUN_COREDNS_CONFIGMAP: &str = r#"{
    "apiVersion": "v1",
    "kind": "ConfigMap",
    "metadata": {
        "name": "coredns",
        "namespace": "kube-system",
        "resourceVersion": "231",
        "uid": "5d0c2d1e-4c4e-4a43-9bd8-1f3c5e1d7a10",
        "creationTimestamp": "2024-01-01T00:00:00Z"
    },
    "data": {
        "Corefile": ".:53 {\n    errors\n    health\n    forward . /etc/resolv.conf\n    cache 30\n}\n"
    }
}"#;

const DRY_RUN_KUBECONFIG: &str = "apiVersion: v1
kind: Config
clusters:
- cluster:
    server: https://127.0.0.1:6443
  name: kubernetes
contexts:
- context:
    cluster: kubernetes
    user: kubernetes-admin
  name: kubernetes-admin@kubernetes
current-context: kubernetes-admin@kubernetes
users:
- name: kubernetes-admin
";

/// OS utility that fakes successful results.
#[derive(Debug)]
pub struct DryRunOsUtil {
    calls: Arc<RwLock<Vec<String>>>,
    files: Arc<RwLock<BTreeMap<PathBuf, Vec<u8>>>>,
    failing: Arc<RwLock<Vec<String>>>,
    cert_days: Arc<RwLock<i64>>,
    hostname: String,
}

impl Default for DryRunOsUtil {
    fn default() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            files: Arc::new(RwLock::new(BTreeMap::new())),
            failing: Arc::new(RwLock::new(Vec::new())),
            cert_days: Arc::new(RwLock::new(363)),
            hostname: "localhost".to_string(),
        }
    }
}

impl DryRunOsUtil {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into().to_lowercase();
        self
    }

    /// Start with every certificate expiring in `days`.
    pub fn with_cert_expiry_days(mut self, days: i64) -> Self {
        self.cert_days = Arc::new(RwLock::new(days));
        self
    }

    /// Seed a file into the virtual filesystem.
    pub async fn add_file(&self, path: impl Into<PathBuf>, contents: &[u8]) {
        self.files.write().await.insert(path.into(), contents.to_vec());
    }

    /// Make every call whose recorded form contains `pattern` fail.
    pub async fn fail_on(&self, pattern: impl Into<String>) {
        self.failing.write().await.push(pattern.into());
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    /// Recorded calls, in order (for testing).
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Number of recorded calls containing `pattern` (for testing).
    pub async fn call_count(&self, pattern: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    async fn record(&self, call: String) -> Result<()> {
        info!("DryRunOsUtil: {}", call);
        let fail = self.failing.read().await.iter().any(|p| call.contains(p.as_str()));
        self.calls.write().await.push(call.clone());
        if fail {
            return Err(OsUtilError::CommandFailed {
                command: call,
                message: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn is_file(&self, path: &Path) -> bool {
        let files = self.files.read().await;
        files.keys().any(|p| p == path || p.starts_with(path))
    }
}

// ===== Exec =====

#[async_trait]
impl Exec for DryRunOsUtil {
    async fn command(&self, name: &str, _env: &[(&str, &str)], args: &[&str]) -> Result<CommandOutput> {
        self.record(format!("{} {}", name, args.join(" ")).trim().to_string())
            .await?;
        Ok(CommandOutput {
            exit_code: 0,
            output: String::new(),
        })
    }

    async fn command_with_no_logging(
        &self,
        name: &str,
        env: &[(&str, &str)],
        args: &[&str],
    ) -> Result<CommandOutput> {
        self.command(name, env, args).await
    }
}

// ===== Filesystem =====

#[async_trait]
impl Filesystem for DryRunOsUtil {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.record(format!("fs read {}", path.display())).await?;
        match self.files.read().await.get(path) {
            Some(contents) => Ok(contents.clone()),
            None => Err(OsUtilError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file in dry-run"),
            )
            .into()),
        }
    }

    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        self.record(format!("fs write {} {:o}", path.display(), mode))
            .await?;
        self.files
            .write()
            .await
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.record(format!("fs mkdir {}", path.display())).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.is_file(path).await)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.record(format!("fs remove {}", path.display())).await?;
        self.files.write().await.remove(path);
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> Result<()> {
        self.record(format!("fs remove-all {}", path.display()))
            .await?;
        self.files
            .write()
            .await
            .retain(|p, _| !(p == path || p.starts_with(path)));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.record(format!("fs rename {} {}", from.display(), to.display()))
            .await?;
        let mut files = self.files.write().await;
        let moved: Vec<PathBuf> = files
            .keys()
            .filter(|p| *p == from || p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(contents) = files.remove(&old) {
                let suffix = old.strip_prefix(from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(suffix)
                };
                files.insert(new, contents);
            }
        }
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        self.record(format!("fs copy {} {}", from.display(), to.display()))
            .await?;
        let mut files = self.files.write().await;
        let contents = files.get(from).cloned().unwrap_or_default();
        let len = contents.len() as u64;
        files.insert(to.to_path_buf(), contents);
        Ok(len)
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.record(format!("fs chown {} {}:{}", path.display(), uid, gid))
            .await
    }

    async fn extract_archive(&self, src: &Path, dst: &Path) -> Result<()> {
        self.record(format!("fs extract {} {}", src.display(), dst.display()))
            .await
    }

    async fn download(&self, url: &str, path: &Path, _mode: u32) -> Result<Vec<u8>> {
        self.record(format!("fs download {} {}", url, path.display()))
            .await?;
        self.files.write().await.insert(path.to_path_buf(), Vec::new());
        Ok(Vec::new())
    }
}

// ===== Package manager, sysctl, systemd =====

#[async_trait]
impl PackageManager for DryRunOsUtil {
    async fn check_installed(&self, package: &str) -> Result<bool> {
        self.record(format!("package check {}", package)).await?;
        Ok(false)
    }

    async fn install(&self, packages: &[&str]) -> Result<()> {
        self.record(format!("package install {}", packages.join(" ")))
            .await
    }

    async fn update(&self) -> Result<()> {
        self.record("package update".to_string()).await
    }

    async fn add_repository_key(&self, url: &str, keyring: &Path) -> Result<()> {
        self.record(format!("package key {} {}", url, keyring.display()))
            .await
    }
}

#[async_trait]
impl Sysctl for DryRunOsUtil {
    async fn reload(&self) -> Result<()> {
        self.record("sysctl --system".to_string()).await
    }
}

#[async_trait]
impl Systemd for DryRunOsUtil {
    async fn is_running(&self, unit: &str) -> Result<bool> {
        self.record(format!("systemctl is-active {}", unit)).await?;
        Ok(true)
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.record(format!("systemctl start {}", unit)).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.record(format!("systemctl stop {}", unit)).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.record(format!("systemctl restart {}", unit)).await
    }

    async fn reload(&self, unit: &str) -> Result<()> {
        self.record(format!("systemctl reload {}", unit)).await
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.record("systemctl daemon-reload".to_string()).await
    }
}

// ===== kubectl / kubeadm =====

#[async_trait]
impl Kubectl for DryRunOsUtil {
    async fn run(&self, args: &[&str]) -> Result<()> {
        self.record(format!("kubectl {}", args.join(" "))).await
    }

    async fn run_with_response(&self, args: &[&str]) -> Result<String> {
        self.record(format!("kubectl {}", args.join(" "))).await?;
        if args.contains(&"taint") {
            return Ok("node/untainted".to_string());
        }
        if args.contains(&"get") && args.contains(&"configmap") {
            return Ok(DRY_RUN_COREDNS_CONFIGMAP.to_string());
        }
        if args.contains(&"get") && args.contains(&"nodes") {
            return Ok(format!(
                "NAME   STATUS   ROLES           AGE   VERSION\n{}   Ready    control-plane   1m    v1.26.5\n",
                self.hostname
            ));
        }
        Ok(String::new())
    }
}

#[async_trait]
impl Kubeadm for DryRunOsUtil {
    async fn run(&self, args: &[&str]) -> Result<()> {
        self.record(format!("kubeadm {}", args.join(" "))).await
    }

    async fn run_with_response(&self, args: &[&str]) -> Result<String> {
        self.record(format!("kubeadm {}", args.join(" "))).await?;
        Ok("success".to_string())
    }

    async fn install(&self, config_file: &Path) -> Result<String> {
        self.record(format!("kubeadm init --config {}", config_file.display()))
            .await?;
        // kubeadm init leaves the admin kubeconfig and the CA behind
        let mut files = self.files.write().await;
        files.insert(
            PathBuf::from(KUBEADM_KUBECONFIG_PATH),
            DRY_RUN_KUBECONFIG.as_bytes().to_vec(),
        );
        files.insert(PathBuf::from(KUBEADM_CA_KEY_PATH), b"dry-run".to_vec());
        Ok(KUBEADM_INIT_SUCCESS_MESSAGE.to_string())
    }

    async fn upgrade(&self, version: &str, ignore_preflight: Option<&str>) -> Result<String> {
        self.record(format!(
            "kubeadm upgrade apply {} -y {}",
            version,
            ignore_preflight.unwrap_or_default()
        ))
        .await?;
        Ok(format!(
            "[upgrade/successful] SUCCESS! Your cluster was upgraded to \"{}\". Enjoy!",
            version
        ))
    }

    async fn delete(&self) -> Result<String> {
        self.record("kubeadm reset -f".to_string()).await?;
        self.files
            .write()
            .await
            .retain(|p, _| !p.starts_with("/etc/kubernetes"));
        Ok(String::new())
    }

    async fn version(&self) -> Result<String> {
        self.record("kubeadm version -o short".to_string()).await?;
        Ok("v1.26.5".to_string())
    }

    async fn certs_rotate_all(&self) -> Result<String> {
        self.record("kubeadm certs renew all".to_string()).await?;
        *self.cert_days.write().await = RENEWED_CERT_DAYS;
        Ok("Done renewing certificates. You must restart the kube-apiserver, kube-controller-manager, kube-scheduler and etcd, so that they can use the new certificates.".to_string())
    }

    async fn certs_expiry(&self) -> Result<CertsExpiry> {
        self.record("kubeadm certs check-expiration".to_string())
            .await?;
        let days = *self.cert_days.read().await;
        let certificates: HashMap<String, i64> = DRY_RUN_CERTIFICATES
            .iter()
            .map(|name| (name.to_string(), days))
            .collect();
        Ok(CertsExpiry {
            min_days: days,
            certificates,
        })
    }
}

// ===== Host =====

#[async_trait]
impl Host for DryRunOsUtil {
    async fn hostname(&self) -> Result<String> {
        Ok(self.hostname.clone())
    }
}

impl OsUtil for DryRunOsUtil {
    fn exec(&self) -> &dyn Exec {
        self
    }

    fn filesystem(&self) -> &dyn Filesystem {
        self
    }

    fn package_manager(&self) -> &dyn PackageManager {
        self
    }

    fn sysctl(&self) -> &dyn Sysctl {
        self
    }

    fn systemd(&self) -> &dyn Systemd {
        self
    }

    fn kubectl(&self) -> &dyn Kubectl {
        self
    }

    fn kubeadm(&self) -> &dyn Kubeadm {
        self
    }

    fn host(&self) -> &dyn Host {
        self
    }
}
