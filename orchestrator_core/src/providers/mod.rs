//! Distribution providers.
//!
//! The set of distributions is closed, so each workflow is a plain builder
//! function selected by matching on [`ClusterType`].

mod k3s;
mod kubeadm;

use std::path::Path;
use std::sync::Arc;

use cluster_shared_types::constants::{K3S_KUBECONFIG_PATH, KUBEADM_KUBECONFIG_PATH};
use cluster_shared_types::{ClusterSpec, ClusterType, OrchestrationError, Result};
use os_utility_interface::OsUtil;

use crate::operation::TaskDetails;
use crate::task::Task;
use crate::tasks;

/// Lifecycle workflows a provider knows how to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Install,
    Upgrade,
    Reset,
    ResetCerts,
    Patch,
}

impl Workflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Install => "install cluster",
            Workflow::Upgrade => "upgrade cluster",
            Workflow::Reset => "reset cluster",
            Workflow::ResetCerts => "reset certs",
            Workflow::Patch => "patch cluster",
        }
    }
}

/// Assemble the task plan for `workflow` on `cluster_type`.
pub fn build_workflow(
    cluster_type: ClusterType,
    workflow: Workflow,
    os: Arc<dyn OsUtil>,
) -> TaskDetails {
    if workflow == Workflow::Patch {
        return patch_workflow(os);
    }
    match cluster_type {
        ClusterType::Kubeadm => kubeadm::workflow(workflow, os),
        ClusterType::K3s => k3s::workflow(workflow, os),
    }
}

fn patch_workflow(os: Arc<dyn OsUtil>) -> TaskDetails {
    TaskDetails::new(os)
        .with_tasks(vec![Box::new(tasks::InstallCni) as Box<dyn Task>])
        .with_post_tasks(vec![Box::new(tasks::UpdateWorkloadScheduler)])
}

/// Check `spec` for `cluster_type` and fill in defaults.
///
/// Every problem found is reported in one error, joined with `"; "`.
pub fn validate_spec(cluster_type: ClusterType, spec: &mut ClusterSpec) -> Result<()> {
    let problems = match cluster_type {
        ClusterType::Kubeadm => kubeadm::validate(spec),
        ClusterType::K3s => k3s::validate(spec),
    };
    if problems.is_empty() {
        return Ok(());
    }
    Err(OrchestrationError::validation(problems.join("; ")))
}

/// Admin kubeconfig written by the distribution.
pub fn kubeconfig_path(cluster_type: ClusterType) -> &'static Path {
    match cluster_type {
        ClusterType::Kubeadm => Path::new(KUBEADM_KUBECONFIG_PATH),
        ClusterType::K3s => Path::new(K3S_KUBECONFIG_PATH),
    }
}

/// Whether the distribution runs its control plane as static pods that the
/// status reconciler can probe individually.
pub fn has_static_control_plane(cluster_type: ClusterType) -> bool {
    matches!(cluster_type, ClusterType::Kubeadm)
}

/// Whether certificates are managed through `kubeadm certs`.
pub fn manages_certificates(cluster_type: ClusterType) -> bool {
    matches!(cluster_type, ClusterType::Kubeadm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_shared_types::{ClusterNetworking, TaskGroup};
    use os_utility::DryRunOsUtil;

    fn os() -> Arc<dyn OsUtil> {
        Arc::new(DryRunOsUtil::new())
    }

    #[test]
    fn test_kubeadm_install_workflow() {
        let details = build_workflow(ClusterType::Kubeadm, Workflow::Install, os());
        assert_eq!(
            details.task_names(TaskGroup::Pre),
            vec![
                "cluster-prerequisites",
                "install-containerd",
                "install-binaries",
                "prepare-containerd"
            ]
        );
        assert_eq!(details.task_names(TaskGroup::Main), vec!["install-cluster"]);
        assert_eq!(
            details.task_names(TaskGroup::Post),
            vec![
                "remove-taint",
                "update-workload-scheduler",
                "install-cni",
                "node-readiness",
                "kubeconfig-current-user"
            ]
        );
    }

    #[test]
    fn test_kubeadm_upgrade_workflow() {
        let details = build_workflow(ClusterType::Kubeadm, Workflow::Upgrade, os());
        assert_eq!(
            details.task_names(TaskGroup::Pre),
            vec!["cordon-node", "load-containerd-images", "coredns-backup"]
        );
        assert_eq!(
            details.task_names(TaskGroup::Main),
            vec!["node-readiness", "upgrade-cluster"]
        );
        assert_eq!(
            details.task_names(TaskGroup::Post),
            vec![
                "kubelet-reload",
                "node-readiness",
                "coredns-restore",
                "uncordon-node",
                "cleanup-containerd-images",
                "configure-admin-certs"
            ]
        );
    }

    #[test]
    fn test_reset_and_cert_workflows() {
        let reset = build_workflow(ClusterType::Kubeadm, Workflow::Reset, os());
        assert_eq!(
            reset.task_names(TaskGroup::Main),
            vec!["kubeadm-reset", "purge-files"]
        );
        let certs = build_workflow(ClusterType::Kubeadm, Workflow::ResetCerts, os());
        assert_eq!(
            certs.task_names(TaskGroup::Main),
            vec!["rotate-certs", "restart-controlplane"]
        );
        let k3s_reset = build_workflow(ClusterType::K3s, Workflow::Reset, os());
        assert_eq!(
            k3s_reset.task_names(TaskGroup::Main),
            vec!["uninstall-k3s", "purge-files"]
        );
    }

    #[test]
    fn test_k3s_install_and_patch_workflows() {
        let install = build_workflow(ClusterType::K3s, Workflow::Install, os());
        assert!(install.task_names(TaskGroup::Pre).is_empty());
        assert_eq!(install.task_names(TaskGroup::Main), vec!["install-k3s-cluster"]);
        assert_eq!(install.task_names(TaskGroup::Post), vec!["install-cni"]);

        for cluster_type in [ClusterType::Kubeadm, ClusterType::K3s] {
            let patch = build_workflow(cluster_type, Workflow::Patch, os());
            assert_eq!(patch.task_names(TaskGroup::Main), vec!["install-cni"]);
            assert_eq!(
                patch.task_names(TaskGroup::Post),
                vec!["update-workload-scheduler"]
            );
        }
    }

    #[test]
    fn test_kubeadm_validation_collects_every_problem() {
        let mut spec = ClusterSpec::default();
        let err = validate_spec(ClusterType::Kubeadm, &mut spec).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("networking is required"));
        assert!(msg.contains("; "));
        assert!(msg.contains("kubernetes version is required"));
    }

    #[test]
    fn test_kubeadm_validation_fills_defaults() {
        let mut spec = ClusterSpec {
            version: "1.26.5".to_string(),
            networking: Some(ClusterNetworking {
                cni_manifest_url: "https://example.com/calico.yaml".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        validate_spec(ClusterType::Kubeadm, &mut spec).unwrap();
        let networking = spec.networking.unwrap();
        assert_eq!(networking.pod_subnet, "100.100.0.0/16");
        assert_eq!(networking.svc_subnet, "100.101.0.0/16");
        assert_eq!(spec.disable_workloads, Some(false));
    }

    #[test]
    fn test_k3s_validation_defaults_everything() {
        let mut spec = ClusterSpec::default();
        validate_spec(ClusterType::K3s, &mut spec).unwrap();
        assert_eq!(spec.version, "latest");
        let networking = spec.networking.unwrap();
        assert_eq!(networking.pod_subnet, "10.42.0.0/16");
        assert_eq!(networking.svc_subnet, "10.43.0.0/16");
        assert_eq!(spec.disable_workloads, Some(false));
    }

    #[test]
    fn test_kubeconfig_paths() {
        assert_eq!(
            kubeconfig_path(ClusterType::Kubeadm),
            Path::new("/etc/kubernetes/admin.conf")
        );
        assert_eq!(
            kubeconfig_path(ClusterType::K3s),
            Path::new("/etc/rancher/k3s/k3s.yaml")
        );
    }
}
