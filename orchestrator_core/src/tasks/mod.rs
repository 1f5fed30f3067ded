//! Concrete lifecycle tasks, written against the OS utility surface only.

pub mod common;
pub mod k3s;
pub mod kubeadm;
pub mod patch;

use cluster_shared_types::{OrchestrationError, Result};
use os_utility_interface::{CommandOutput, OsUtil};

pub use common::{
    CleanupImages, CoreDnsBackup, CoreDnsRestore, CordonNode, CurrentUserKubeconfig,
    KubeletReload, LoadContainerdImages, NodeReady, PurgeFiles, RestartControlPlane,
    RotateAdminCerts, UncordonNode,
};
pub use k3s::{InstallK3sCluster, RestartK3s, UninstallK3s};
pub use kubeadm::{
    ClusterPrerequisites, InstallBinaries, InstallCni, InstallContainerd, InstallKubeadmCluster,
    KubeadmReset, PrepareContainerd, RemoveTaint, RotateCerts, UpgradeKubeadmCluster,
};
pub use patch::UpdateWorkloadScheduler;

/// Turn a non-zero exit into an error naming `what` failed.
pub(crate) fn check_exit(output: CommandOutput, what: &str) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    Err(OrchestrationError::SystemError(format!(
        "{} failed with exit code {}: {}",
        what,
        output.exit_code,
        output.output.trim()
    )))
}

/// Run `kubectl <verb> <hostname>` against the local node.
pub(crate) async fn node_scheduling(os: &dyn OsUtil, verb: &str) -> Result<()> {
    let hostname = os.host().hostname().await?;
    os.kubectl().run(&[verb, &hostname]).await
}
