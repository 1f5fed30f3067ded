//! kubeadm install, upgrade, reset and certificate tasks.

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use cluster_shared_types::constants::{
    CONTAINERD_CONFIG_PATH, DEFAULT_CLUSTER_NAME, DEFAULT_POD_NETWORK, DEFAULT_SERVICE_NETWORK,
    KUBEADM_CA_KEY_PATH, KUBEADM_CONFIG_FILE, KUBEADM_INIT_SUCCESS_MESSAGE,
};
use cluster_shared_types::{ClusterSpec, ClusterStatus, OrchestrationError, Result};
use os_utility_interface::OsUtil;

use super::check_exit;
use crate::task::{Task, TaskContext};

const KUBERNETES_KEYRING: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
const KUBERNETES_SOURCES_LIST: &str = "/etc/apt/sources.list.d/kubernetes.list";
const MODULES_LOAD_CONF: &str = "/etc/modules-load.d/k8s.conf";
const SYSCTL_CONF: &str = "/etc/sysctl.d/k8s.conf";
const UPGRADE_SUCCESS_MESSAGE: &str = "SUCCESS! Your cluster was upgraded to";
const CONTAINERD_RESTART_ATTEMPTS: u32 = 3;

fn system_error(msg: impl Into<String>) -> OrchestrationError {
    OrchestrationError::SystemError(msg.into())
}

/// `v1.26.5` and `1.26.5` both become `1.26.5`.
pub(crate) fn trim_version(version: &str) -> &str {
    version.trim().trim_start_matches('v')
}

/// Major.minor part of a version, used for the package repository.
pub(crate) fn stable_version(version: &str) -> Result<String> {
    let parts: Vec<&str> = trim_version(version).split('.').collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(OrchestrationError::validation(format!(
            "invalid version format: {}",
            version
        )));
    }
    Ok(format!("{}.{}", parts[0], parts[1]))
}

// ===== Host preparation =====

/// Swap off, kernel modules and bridge sysctls.
pub struct ClusterPrerequisites;

#[async_trait]
impl Task for ClusterPrerequisites {
    fn name(&self) -> &'static str {
        "cluster-prerequisites"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        info!("Preparing host for kubernetes");
        let exec = os.exec();
        let fs = os.filesystem();

        check_exit(
            exec.command_with_no_logging("swapoff", &[], &["-a"]).await?,
            "disabling swap",
        )?;
        check_exit(
            exec.command("cp", &[], &["/etc/fstab", "/etc/fstab.bkp"]).await?,
            "backing up fstab",
        )?;
        check_exit(
            exec.command("sed", &[], &["-i", "/\\sswap\\s/ s/^#*/#/", "/etc/fstab"])
                .await?,
            "disabling swap in fstab",
        )?;

        fs.write_file(Path::new(MODULES_LOAD_CONF), b"overlay\nbr_netfilter\n", 0o644)
            .await?;
        for module in ["overlay", "br_netfilter"] {
            check_exit(
                exec.command("modprobe", &[], &[module]).await?,
                &format!("loading kernel module {}", module),
            )?;
        }

        let sysctls = "net.bridge.bridge-nf-call-iptables  = 1\n\
                       net.bridge.bridge-nf-call-ip6tables = 1\n\
                       net.ipv4.ip_forward                 = 1\n";
        fs.write_file(Path::new(SYSCTL_CONF), sysctls.as_bytes(), 0o644)
            .await?;
        os.sysctl().reload().await
    }
}

pub struct InstallContainerd;

#[async_trait]
impl Task for InstallContainerd {
    fn name(&self) -> &'static str {
        "install-containerd"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let packages = os.package_manager();
        if packages.check_installed("containerd").await? {
            info!("containerd already installed");
        } else {
            packages.update().await?;
            packages.install(&["containerd"]).await?;
        }

        if !os.systemd().is_running("containerd").await? {
            os.systemd().start("containerd").await?;
        }
        Ok(())
    }
}

/// Install kubeadm, kubelet and kubectl from the upstream package repository.
pub struct InstallBinaries;

#[async_trait]
impl Task for InstallBinaries {
    fn name(&self) -> &'static str {
        "install-binaries"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        if spec.version.trim().is_empty() {
            return Err(OrchestrationError::validation("no kubernetes version supplied"));
        }
        let version = trim_version(&spec.version).to_string();
        let packages = os.package_manager();

        match packages.check_installed("kubeadm").await {
            Ok(true) => {
                info!(version = %version, "kubeadm already installed, skipping");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not check for kubeadm, installing anyway"),
        }

        let stable = stable_version(&version)?;
        packages.update().await?;
        packages
            .install(&["apt-transport-https", "ca-certificates", "curl", "gpg"])
            .await?;
        packages
            .add_repository_key(
                &format!("https://pkgs.k8s.io/core:/stable:/v{}/deb/Release.key", stable),
                Path::new(KUBERNETES_KEYRING),
            )
            .await?;

        let repo = format!(
            "deb [signed-by={}] https://pkgs.k8s.io/core:/stable:/v{}/deb/ /\n",
            KUBERNETES_KEYRING, stable
        );
        os.filesystem()
            .write_file(Path::new(KUBERNETES_SOURCES_LIST), repo.as_bytes(), 0o644)
            .await?;
        packages.update().await?;

        let pinned: Vec<String> = ["kubeadm", "kubelet", "kubectl"]
            .iter()
            .map(|pkg| format!("{}={}-*", pkg, version))
            .collect();
        let pinned: Vec<&str> = pinned.iter().map(String::as_str).collect();
        info!(packages = ?pinned, "Installing kubernetes packages");
        packages.install(&pinned).await
    }
}

/// Rewrite the containerd config for the systemd cgroup driver and an
/// optional private registry, then restart containerd.
pub struct PrepareContainerd;

impl PrepareContainerd {
    async fn load_config(os: &dyn OsUtil) -> Result<toml::Table> {
        let path = Path::new(CONTAINERD_CONFIG_PATH);
        let raw = match os.filesystem().read_file(path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(error = %e, path = CONTAINERD_CONFIG_PATH, "No containerd config, generating default");
                let output = check_exit(
                    os.exec().command("containerd", &[], &["config", "default"]).await?,
                    "generating containerd config",
                )?;
                output.output
            }
        };
        raw.parse::<toml::Table>()
            .map_err(|e| system_error(format!("invalid containerd config: {}", e)))
    }
}

/// Walk (creating as needed) a chain of nested tables.
fn table_path<'a>(root: &'a mut toml::Table, keys: &[&str]) -> Result<&'a mut toml::Table> {
    let mut current = root;
    for key in keys {
        current = current
            .entry(key.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| system_error(format!("containerd config key {} is not a table", key)))?;
    }
    Ok(current)
}

pub(crate) fn configure_containerd(config: &mut toml::Table, spec: &ClusterSpec) -> Result<()> {
    let cri = ["plugins", "io.containerd.grpc.v1.cri"];
    let runc_options = table_path(
        config,
        &[cri[0], cri[1], "containerd", "runtimes", "runc", "options"],
    )?;
    runc_options.insert("SystemdCgroup".to_string(), toml::Value::Boolean(true));

    let Some(runtime) = spec
        .cluster_runtime
        .as_ref()
        .filter(|r| r.customise_cluster_runtime)
    else {
        return Ok(());
    };
    let registry = &runtime.cluster_cri;
    let registry_table = table_path(config, &[cri[0], cri[1], "registry"])?;
    registry_table.insert(
        "config_path".to_string(),
        toml::Value::String("/etc/containerd/certs.d".to_string()),
    );

    if registry.registry_auth.is_auth_required {
        let auth = table_path(
            config,
            &[
                cri[0],
                cri[1],
                "registry",
                "configs",
                registry.private_registry_fqdn.as_str(),
                "auth",
            ],
        )?;
        auth.insert(
            "username".to_string(),
            toml::Value::String(registry.registry_auth.username.clone()),
        );
        auth.insert(
            "password".to_string(),
            toml::Value::String(registry.registry_auth.password.clone()),
        );
    }
    Ok(())
}

#[async_trait]
impl Task for PrepareContainerd {
    fn name(&self) -> &'static str {
        "prepare-containerd"
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        _status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        info!("Preparing containerd for kubernetes installation");
        let mut config = Self::load_config(os).await?;
        configure_containerd(&mut config, spec)?;
        let rendered = toml::to_string(&config)
            .map_err(|e| system_error(format!("unable to render containerd config: {}", e)))?;

        let path = Path::new(CONTAINERD_CONFIG_PATH);
        let fs = os.filesystem();
        if let Some(dir) = path.parent() {
            fs.create_dir_all(dir).await?;
        }
        if fs.exists(path).await? {
            let backup = format!("{}.original", CONTAINERD_CONFIG_PATH);
            fs.rename(path, Path::new(&backup)).await?;
        }
        fs.write_file(path, rendered.as_bytes(), 0o644).await?;

        for attempt in 0..=CONTAINERD_RESTART_ATTEMPTS {
            os.systemd().restart("containerd").await?;
            ctx.sleep(ctx.timings.containerd_restart_wait).await?;
            if os.systemd().is_running("containerd").await? {
                info!(path = CONTAINERD_CONFIG_PATH, "containerd configuration updated");
                return Ok(());
            }
            warn!(attempt, "containerd did not come back up, restarting again");
        }
        Err(system_error("unable to start containerd"))
    }
}

// ===== Control plane =====

pub(crate) fn render_kubeadm_config(spec: &ClusterSpec) -> String {
    let networking = spec.networking.clone().unwrap_or_default();
    let pod_subnet = if networking.pod_subnet.is_empty() {
        DEFAULT_POD_NETWORK.to_string()
    } else {
        networking.pod_subnet
    };
    let svc_subnet = if networking.svc_subnet.is_empty() {
        DEFAULT_SERVICE_NETWORK.to_string()
    } else {
        networking.svc_subnet
    };
    let cluster_name = if spec.cluster_name.is_empty() {
        DEFAULT_CLUSTER_NAME
    } else {
        spec.cluster_name.as_str()
    };

    let mut cert_sans = String::new();
    for san in spec
        .api_server
        .as_ref()
        .map(|a| a.cert_sans.as_slice())
        .unwrap_or_default()
    {
        cert_sans.push_str(&format!("  - \"{}\"\n", san));
    }
    let cert_sans_block = if cert_sans.is_empty() {
        String::new()
    } else {
        format!("  certSANs:\n{}", cert_sans)
    };

    format!(
        r#"apiVersion: kubeadm.k8s.io/v1beta3
kind: InitConfiguration
nodeRegistration:
  criSocket: unix:///run/containerd/containerd.sock
---
apiVersion: kubeadm.k8s.io/v1beta3
kind: ClusterConfiguration
kubernetesVersion: v{version}
clusterName: {cluster_name}
controllerManager:
  extraArgs:
    leader-elect: "false"
    profiling: "false"
scheduler:
  extraArgs:
    leader-elect: "false"
    profiling: "false"
etcd:
  local:
    dataDir: /var/lib/etcd
networking:
  podSubnet: {pod_subnet}
  serviceSubnet: {svc_subnet}
apiServer:
  extraArgs:
    profiling: "false"
{cert_sans_block}---
apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
cgroupDriver: systemd
imageGCHighThresholdPercent: 100
imageGCLowThresholdPercent: 99
evictionHard:
  imagefs.available: "0%"
"#,
        version = trim_version(&spec.version),
    )
}

/// `kubeadm init` from a rendered config file.
pub struct InstallKubeadmCluster;

#[async_trait]
impl Task for InstallKubeadmCluster {
    fn name(&self) -> &'static str {
        "install-cluster"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        if os.filesystem().exists(Path::new(KUBEADM_CA_KEY_PATH)).await? {
            info!("Cluster already initialised, skipping kubeadm init");
            return Ok(());
        }

        let config = render_kubeadm_config(spec);
        let config_file = Path::new(KUBEADM_CONFIG_FILE);
        os.filesystem()
            .write_file(config_file, config.as_bytes(), 0o600)
            .await?;

        let output = os.kubeadm().install(config_file).await?;
        if !output.contains(KUBEADM_INIT_SUCCESS_MESSAGE) {
            return Err(system_error(format!("kubeadm init did not succeed: {}", output.trim())));
        }
        info!(cluster = %spec.cluster_name, "Control plane initialised");
        Ok(())
    }
}

/// Allow workloads on the single control-plane node.
pub struct RemoveTaint;

#[async_trait]
impl Task for RemoveTaint {
    fn name(&self) -> &'static str {
        "remove-taint"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let output = os
            .kubectl()
            .run_with_response(&[
                "taint",
                "nodes",
                "--all",
                "node-role.kubernetes.io/control-plane-",
            ])
            .await?;
        if !output.contains("untainted") {
            return Err(system_error(format!("unable to remove taint: {}", output.trim())));
        }
        Ok(())
    }
}

pub struct InstallCni;

#[async_trait]
impl Task for InstallCni {
    fn name(&self) -> &'static str {
        "install-cni"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let Some(url) = spec.cni_manifest_url() else {
            info!("No CNI manifest configured");
            return Ok(());
        };
        info!(url, "Applying CNI manifest");
        os.kubectl().run(&["apply", "-f", url]).await
    }
}

pub struct UpgradeKubeadmCluster;

#[async_trait]
impl Task for UpgradeKubeadmCluster {
    fn name(&self) -> &'static str {
        "upgrade-cluster"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let version = trim_version(&spec.version);
        let target = format!("v{}", version);
        info!(version = %target, "Upgrading control plane");
        let output = os.kubeadm().upgrade(&target, Some("all")).await?;
        if !(output.contains(UPGRADE_SUCCESS_MESSAGE) && output.contains(version)) {
            return Err(system_error(format!(
                "kubeadm upgrade to {} did not succeed: {}",
                target,
                output.trim()
            )));
        }
        Ok(())
    }
}

pub struct KubeadmReset;

#[async_trait]
impl Task for KubeadmReset {
    fn name(&self) -> &'static str {
        "kubeadm-reset"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        os.kubeadm().delete().await?;
        Ok(())
    }
}

pub struct RotateCerts;

#[async_trait]
impl Task for RotateCerts {
    fn name(&self) -> &'static str {
        "rotate-certs"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        let output = os.kubeadm().certs_rotate_all().await?;
        info!(output = %output.trim(), "Certificates renewed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClusterState;
    use crate::task::TaskTimings;
    use cluster_shared_types::{
        ApiServerSpec, ClusterCri, ClusterNetworking, ClusterRuntime, RegistryAuth,
    };
    use os_utility::DryRunOsUtil;
    use state_store_interface::in_memory::InMemoryClusterStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context() -> TaskContext {
        let state = ClusterState::new(Arc::new(InMemoryClusterStore::new()));
        TaskContext::new(state, TaskTimings::immediate(), CancellationToken::new())
    }

    fn spec() -> ClusterSpec {
        ClusterSpec {
            cluster_type: "kubeadm".to_string(),
            cluster_name: "edge".to_string(),
            version: "1.26.5".to_string(),
            networking: Some(ClusterNetworking {
                pod_subnet: "10.10.0.0/16".to_string(),
                svc_subnet: "10.11.0.0/16".to_string(),
                cni_manifest_url: "https://example.com/calico.yaml".to_string(),
                ..Default::default()
            }),
            api_server: Some(ApiServerSpec {
                cert_sans: vec!["edge.local".to_string()],
            }),
            ..Default::default()
        }
    }

    async fn run(task: &dyn Task, spec: &mut ClusterSpec, os: &DryRunOsUtil) -> Result<()> {
        let mut status = ClusterStatus::default();
        task.run(&context(), &mut status, spec, os).await
    }

    #[test]
    fn test_stable_version() {
        assert_eq!(stable_version("v1.26.5").unwrap(), "1.26");
        assert_eq!(stable_version("1.27").unwrap(), "1.27");
        assert!(stable_version("1").is_err());
    }

    #[test]
    fn test_kubeadm_config_rendering() {
        let config = render_kubeadm_config(&spec());
        assert!(config.contains("kubernetesVersion: v1.26.5"));
        assert!(config.contains("clusterName: edge"));
        assert!(config.contains("podSubnet: 10.10.0.0/16"));
        assert!(config.contains("serviceSubnet: 10.11.0.0/16"));
        assert!(config.contains("  - \"edge.local\""));
        assert!(config.contains("cgroupDriver: systemd"));
    }

    #[test]
    fn test_kubeadm_config_defaults() {
        let config = render_kubeadm_config(&ClusterSpec {
            version: "v1.27.1".to_string(),
            ..Default::default()
        });
        assert!(config.contains("kubernetesVersion: v1.27.1"));
        assert!(config.contains("clusterName: kubernetes"));
        assert!(config.contains(DEFAULT_POD_NETWORK));
        assert!(!config.contains("certSANs"));
    }

    #[test]
    fn test_containerd_config_with_registry_auth() {
        let mut config: toml::Table = "version = 2\n".parse().unwrap();
        let mut spec = spec();
        spec.cluster_runtime = Some(ClusterRuntime {
            customise_cluster_runtime: true,
            cluster_cri: ClusterCri {
                private_registry_fqdn: "registry.local".to_string(),
                registry_auth: RegistryAuth {
                    is_auth_required: true,
                    username: "bob".to_string(),
                    password: "hunter2".to_string(),
                },
            },
        });

        configure_containerd(&mut config, &spec).unwrap();

        let cri = &config["plugins"]["io.containerd.grpc.v1.cri"];
        assert_eq!(
            cri["containerd"]["runtimes"]["runc"]["options"]["SystemdCgroup"].as_bool(),
            Some(true)
        );
        assert_eq!(
            cri["registry"]["configs"]["registry.local"]["auth"]["username"].as_str(),
            Some("bob")
        );
        assert_eq!(config["version"].as_integer(), Some(2));
    }

    #[tokio::test]
    async fn test_prepare_containerd_backs_up_and_restarts() {
        let os = DryRunOsUtil::new();
        os.add_file(CONTAINERD_CONFIG_PATH, b"version = 2\n").await;

        run(&PrepareContainerd, &mut spec(), &os).await.unwrap();

        let written = os
            .filesystem()
            .read_file(Path::new(CONTAINERD_CONFIG_PATH))
            .await
            .unwrap();
        assert!(String::from_utf8(written).unwrap().contains("SystemdCgroup = true"));
        assert!(os
            .filesystem()
            .exists(Path::new("/etc/containerd/config.toml.original"))
            .await
            .unwrap());
        assert_eq!(os.call_count("systemctl restart containerd").await, 1);
    }

    #[tokio::test]
    async fn test_install_cluster_runs_kubeadm_init() {
        let os = DryRunOsUtil::new();
        run(&InstallKubeadmCluster, &mut spec(), &os).await.unwrap();
        assert_eq!(os.call_count("fs write /tmp/kubeadm-config.yaml 600").await, 1);
        assert_eq!(os.call_count("kubeadm init --config").await, 1);
    }

    #[tokio::test]
    async fn test_install_cluster_skips_when_ca_exists() {
        let os = DryRunOsUtil::new();
        os.add_file(KUBEADM_CA_KEY_PATH, b"key").await;
        run(&InstallKubeadmCluster, &mut spec(), &os).await.unwrap();
        assert_eq!(os.call_count("kubeadm init").await, 0);
    }

    #[tokio::test]
    async fn test_install_binaries_pins_version() {
        let os = DryRunOsUtil::new();
        run(&InstallBinaries, &mut spec(), &os).await.unwrap();
        assert_eq!(
            os.call_count("package key https://pkgs.k8s.io/core:/stable:/v1.26/deb/Release.key")
                .await,
            1
        );
        assert_eq!(
            os.call_count("package install kubeadm=1.26.5-* kubelet=1.26.5-* kubectl=1.26.5-*")
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_install_binaries_requires_version() {
        let os = DryRunOsUtil::new();
        let mut spec = ClusterSpec::default();
        assert!(run(&InstallBinaries, &mut spec, &os).await.is_err());
    }

    #[tokio::test]
    async fn test_upgrade_checks_kubeadm_output() {
        let os = DryRunOsUtil::new();
        let mut spec = spec();
        spec.version = "v1.27.1".to_string();
        run(&UpgradeKubeadmCluster, &mut spec, &os).await.unwrap();
        assert_eq!(os.call_count("kubeadm upgrade apply v1.27.1").await, 1);
    }

    #[tokio::test]
    async fn test_install_cni_skips_without_url() {
        let os = DryRunOsUtil::new();
        let mut spec = ClusterSpec::default();
        run(&InstallCni, &mut spec, &os).await.unwrap();
        assert!(os.calls().await.is_empty());

        run(&InstallCni, &mut self::spec(), &os).await.unwrap();
        assert_eq!(
            os.calls().await,
            vec!["kubectl apply -f https://example.com/calico.yaml"]
        );
    }

    #[tokio::test]
    async fn test_prerequisites_fail_on_modprobe() {
        let os = DryRunOsUtil::new();
        os.fail_on("modprobe br_netfilter").await;
        assert!(run(&ClusterPrerequisites, &mut spec(), &os).await.is_err());
        assert_eq!(os.call_count("sysctl").await, 0);
    }
}
