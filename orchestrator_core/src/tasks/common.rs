//! Tasks shared by several workflows.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use cluster_shared_types::constants::{
    CNI_CONFIG_DIR, COREDNS_CONFIG_NAME, KUBEADM_KUBECONFIG_PATH, STATIC_POD_MANIFESTS,
    STATIC_POD_MANIFESTS_BACKUP,
};
use cluster_shared_types::{ClusterSpec, ClusterStatus, OrchestrationError, Result};
use os_utility_interface::OsUtil;

use super::{check_exit, node_scheduling};
use crate::task::{Task, TaskContext};

/// Directory holding pre-pulled control-plane image archives.
pub const CONTROL_PLANE_IMAGES_DIR: &str = "/opt/images/cri_images";

const NODE_NOT_READY_MARKERS: [&str; 3] = [
    "NotReady",
    "Unknown",
    "did you specify the right host or port?",
];

// ===== Node readiness and scheduling =====

/// Poll `kubectl get nodes` until the node reports `Ready`.
pub struct NodeReady;

#[async_trait]
impl Task for NodeReady {
    fn name(&self) -> &'static str {
        "node-readiness"
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        info!("Checking node readiness");
        let mut retries = 0;
        loop {
            let nodes = os.kubectl().run_with_response(&["get", "nodes"]).await?;
            if nodes.contains(" Ready") {
                return Ok(());
            }
            // Output we do not recognise is not treated as a failure.
            if !NODE_NOT_READY_MARKERS.iter().any(|m| nodes.contains(m)) {
                return Ok(());
            }

            retries += 1;
            if retries > ctx.timings.node_ready_retries {
                return Err(OrchestrationError::SystemError(format!(
                    "node is not ready after {} retries",
                    ctx.timings.node_ready_retries
                )));
            }
            info!(retry = retries, "Node not ready yet, retrying");
            ctx.sleep(ctx.timings.node_ready_interval).await?;
        }
    }
}

pub struct CordonNode;

#[async_trait]
impl Task for CordonNode {
    fn name(&self) -> &'static str {
        "cordon-node"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        node_scheduling(os, "cordon").await
    }
}

pub struct UncordonNode;

#[async_trait]
impl Task for UncordonNode {
    fn name(&self) -> &'static str {
        "uncordon-node"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        node_scheduling(os, "uncordon").await
    }
}

// ===== Services and files =====

pub struct KubeletReload;

#[async_trait]
impl Task for KubeletReload {
    fn name(&self) -> &'static str {
        "kubelet-reload"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        os.systemd().daemon_reload().await?;
        os.systemd().restart("kubelet").await
    }
}

/// Remove leftover CNI configuration.
pub struct PurgeFiles;

#[async_trait]
impl Task for PurgeFiles {
    fn name(&self) -> &'static str {
        "purge-files"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        info!(path = CNI_CONFIG_DIR, "Removing cluster files");
        os.filesystem().remove_all(Path::new(CNI_CONFIG_DIR)).await
    }
}

/// Bounce the static-pod control plane so it picks up renewed certificates.
///
/// Moving the manifest directory away makes the kubelet stop the pods;
/// moving it back starts them again.
pub struct RestartControlPlane;

#[async_trait]
impl Task for RestartControlPlane {
    fn name(&self) -> &'static str {
        "restart-controlplane"
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let manifests = Path::new(STATIC_POD_MANIFESTS);
        let backup = Path::new(STATIC_POD_MANIFESTS_BACKUP);

        os.filesystem().rename(manifests, backup).await?;
        ctx.sleep(ctx.timings.control_plane_restart_wait).await?;
        os.filesystem().rename(backup, manifests).await?;
        ctx.sleep(ctx.timings.control_plane_startup_wait).await
    }
}

fn current_user_kubeconfig() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
    PathBuf::from(home).join(".kube").join("config")
}

async fn copy_admin_kubeconfig(os: &dyn OsUtil) -> Result<()> {
    let target = current_user_kubeconfig();
    if let Some(dir) = target.parent() {
        os.filesystem().create_dir_all(dir).await?;
    }
    let contents = os
        .filesystem()
        .read_file(Path::new(KUBEADM_KUBECONFIG_PATH))
        .await?;
    os.filesystem().write_file(&target, &contents, 0o600).await
}

/// Give the invoking user a working `~/.kube/config`.
pub struct CurrentUserKubeconfig;

#[async_trait]
impl Task for CurrentUserKubeconfig {
    fn name(&self) -> &'static str {
        "kubeconfig-current-user"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        copy_admin_kubeconfig(os).await
    }
}

/// Refresh the user kubeconfig after kubeadm regenerated admin.conf.
pub struct RotateAdminCerts;

#[async_trait]
impl Task for RotateAdminCerts {
    fn name(&self) -> &'static str {
        "configure-admin-certs"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        info!("Configuring admin kubeconfig certificates");
        copy_admin_kubeconfig(os).await
    }
}

// ===== CoreDNS =====

/// Save the CoreDNS ConfigMap before an upgrade and delete it from the
/// cluster, so kubeadm installs a fresh one.
pub struct CoreDnsBackup;

#[async_trait]
impl Task for CoreDnsBackup {
    fn name(&self) -> &'static str {
        "coredns-backup"
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let fetched = os
            .kubectl()
            .run_with_response(&["get", "configmap", "coredns", "-n", "kube-system", "-o", "json"])
            .await;

        let raw = match fetched {
            Ok(raw) if !raw.trim().is_empty() => raw,
            Ok(_) => return existing_backup(ctx).await,
            Err(e) if is_not_found(&e) => return existing_backup(ctx).await,
            Err(e) => return Err(e),
        };

        let blob = strip_server_fields(&raw)?;
        ctx.state.put_config(COREDNS_CONFIG_NAME, &blob).await?;
        os.kubectl()
            .run(&["delete", "configmap", "coredns", "-n", "kube-system"])
            .await?;
        info!("CoreDNS config map backed up");
        Ok(())
    }
}

async fn existing_backup(ctx: &TaskContext) -> Result<()> {
    info!("CoreDNS config map not found in the cluster, checking for a backup");
    match ctx.state.config(COREDNS_CONFIG_NAME).await? {
        Some(_) => Ok(()),
        None => Err(OrchestrationError::NotFound(
            "coredns config map is neither in the cluster nor backed up".to_string(),
        )),
    }
}

fn is_not_found(err: &OrchestrationError) -> bool {
    let msg = err.to_string();
    msg.contains("NotFound") || msg.contains("not found")
}

/// Drop the fields the API server owns so the map can be re-created.
fn strip_server_fields(raw: &str) -> Result<Vec<u8>> {
    let mut config_map: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| OrchestrationError::SystemError(format!("invalid coredns config map: {}", e)))?;
    if let Some(metadata) = config_map
        .get_mut("metadata")
        .and_then(|m| m.as_object_mut())
    {
        for field in ["resourceVersion", "uid", "creationTimestamp", "managedFields"] {
            metadata.remove(field);
        }
    }
    serde_json::to_vec_pretty(&config_map)
        .map_err(|e| OrchestrationError::InternalError(e.to_string()))
}

pub struct CoreDnsRestore;

#[async_trait]
impl Task for CoreDnsRestore {
    fn name(&self) -> &'static str {
        "coredns-restore"
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let blob = ctx
            .state
            .config(COREDNS_CONFIG_NAME)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound("coredns config map backup".to_string()))?;

        let manifest = std::env::temp_dir().join("coredns-restore.json");
        os.filesystem().write_file(&manifest, &blob, 0o600).await?;
        let manifest_arg = manifest.display().to_string();
        os.kubectl().run(&["apply", "-f", &manifest_arg]).await?;
        info!("CoreDNS config map restored");
        Ok(())
    }
}

// ===== Container images =====

/// Import pre-pulled control-plane images into containerd.
pub struct LoadContainerdImages;

#[async_trait]
impl Task for LoadContainerdImages {
    fn name(&self) -> &'static str {
        "load-containerd-images"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        if !os
            .filesystem()
            .exists(Path::new(CONTROL_PLANE_IMAGES_DIR))
            .await?
        {
            info!(dir = CONTROL_PLANE_IMAGES_DIR, "No image archives to load");
            return Ok(());
        }

        let script = format!(
            "cd {} && rm -f *.tar && for f in *.tar.gz; do [ -e \"$f\" ] && gzip -dk \"$f\"; done; \
             for f in *.tar; do [ -e \"$f\" ] && ctr -n=k8s.io images import \"$f\"; done; true",
            CONTROL_PLANE_IMAGES_DIR
        );
        let output = os.exec().command("sh", &[], &["-c", &script]).await?;
        check_exit(output, "loading containerd images")?;
        Ok(())
    }
}

/// Remove control-plane images no running container uses any more.
pub struct CleanupImages;

#[async_trait]
impl Task for CleanupImages {
    fn name(&self) -> &'static str {
        "cleanup-containerd-images"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        // Leftover images only cost disk space.
        match os.exec().command("crictl", &[], &["rmi", "--prune"]).await {
            Ok(output) if !output.success() => {
                warn!(code = output.exit_code, output = %output.output, "Image clean-up failed");
            }
            Err(e) => warn!(error = %e, "Image clean-up failed"),
            Ok(_) => info!("Unused images removed"),
        }
        Ok(())
    }
}
