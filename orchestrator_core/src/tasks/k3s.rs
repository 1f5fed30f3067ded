//! k3s install, uninstall and restart tasks.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use cluster_shared_types::constants::{
    K3S_DEFAULT_POD_NETWORK, K3S_DEFAULT_SERVICE_NETWORK, K3S_DEFAULT_VERSION,
};
use cluster_shared_types::{ClusterSpec, ClusterStatus, Result};
use os_utility_interface::OsUtil;

use super::check_exit;
use crate::task::{Task, TaskContext};

const K3S_CONFIG_FILE: &str = "/tmp/k3s-config.yaml";
const K3S_INSTALL_SCRIPT_URL: &str = "https://get.k3s.io";
const K3S_INSTALL_SCRIPT: &str = "/tmp/k3s-install.sh";
const K3S_UNINSTALL_SCRIPT: &str = "/usr/local/bin/k3s-uninstall.sh";

pub(crate) fn render_k3s_config(spec: &ClusterSpec) -> String {
    let networking = spec.networking.clone().unwrap_or_default();
    let cluster_cidr = if networking.pod_subnet.is_empty() {
        K3S_DEFAULT_POD_NETWORK.to_string()
    } else {
        networking.pod_subnet
    };
    let service_cidr = if networking.svc_subnet.is_empty() {
        K3S_DEFAULT_SERVICE_NETWORK.to_string()
    } else {
        networking.svc_subnet
    };

    let mut config = format!(
        "cluster-cidr: \"{}\"\nservice-cidr: \"{}\"\n",
        cluster_cidr, service_cidr
    );
    let sans = spec
        .api_server
        .as_ref()
        .map(|a| a.cert_sans.as_slice())
        .unwrap_or_default();
    if !sans.is_empty() {
        config.push_str("tls-san:\n");
        for san in sans {
            config.push_str(&format!("  - \"{}\"\n", san));
        }
    }
    config
}

/// Install (or upgrade in place) k3s with the upstream install script.
pub struct InstallK3sCluster;

#[async_trait]
impl Task for InstallK3sCluster {
    fn name(&self) -> &'static str {
        "install-k3s-cluster"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        info!(version = %spec.version, "Installing k3s cluster");
        let fs = os.filesystem();
        fs.write_file(
            Path::new(K3S_CONFIG_FILE),
            render_k3s_config(spec).as_bytes(),
            0o600,
        )
        .await?;
        fs.download(K3S_INSTALL_SCRIPT_URL, Path::new(K3S_INSTALL_SCRIPT), 0o755)
            .await?;

        let mut env = vec![("K3S_CONFIG_FILE", K3S_CONFIG_FILE)];
        if !spec.version.is_empty() && spec.version != K3S_DEFAULT_VERSION {
            env.push(("INSTALL_K3S_VERSION", spec.version.as_str()));
        }
        let mut args = vec![K3S_INSTALL_SCRIPT];
        // A custom CNI replaces the bundled flannel.
        if spec.cni_manifest_url().is_some() {
            args.extend(["-s", "-", "--flannel-backend", "none"]);
        }

        let output = check_exit(
            os.exec().command("/bin/sh", &env, &args).await?,
            "k3s installation",
        )?;
        info!(output = %output.output.trim(), "k3s install script finished");
        os.systemd().start("k3s").await
    }
}

pub struct UninstallK3s;

#[async_trait]
impl Task for UninstallK3s {
    fn name(&self) -> &'static str {
        "uninstall-k3s"
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
            .exists(Path::new(K3S_UNINSTALL_SCRIPT))
            .await?
        {
            info!("k3s uninstall script not present, nothing to remove");
            return Ok(());
        }
        check_exit(
            os.exec().command(K3S_UNINSTALL_SCRIPT, &[], &[]).await?,
            "k3s uninstall",
        )?;
        Ok(())
    }
}

/// k3s regenerates expiring certificates when the server restarts.
pub struct RestartK3s;

#[async_trait]
impl Task for RestartK3s {
    fn name(&self) -> &'static str {
        "restart-k3s"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        os.systemd().restart("k3s").await
    }
}
