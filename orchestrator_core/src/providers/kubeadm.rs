use std::sync::Arc;

use cluster_shared_types::constants::{DEFAULT_POD_NETWORK, DEFAULT_SERVICE_NETWORK};
use cluster_shared_types::ClusterSpec;
use os_utility_interface::OsUtil;

use super::Workflow;
use crate::operation::TaskDetails;
use crate::task::Task;
use crate::tasks::*;

pub(super) fn workflow(workflow: Workflow, os: Arc<dyn OsUtil>) -> TaskDetails {
    let details = TaskDetails::new(os);
    match workflow {
        Workflow::Install => details
            .with_pre_tasks(vec![
                Box::new(ClusterPrerequisites) as Box<dyn Task>,
                Box::new(InstallContainerd),
                Box::new(InstallBinaries),
                Box::new(PrepareContainerd),
            ])
            .with_tasks(vec![Box::new(InstallKubeadmCluster)])
            .with_post_tasks(vec![
                Box::new(RemoveTaint) as Box<dyn Task>,
                Box::new(UpdateWorkloadScheduler),
                Box::new(InstallCni),
                Box::new(NodeReady),
                Box::new(CurrentUserKubeconfig),
            ]),
        Workflow::Upgrade => details
            .with_pre_tasks(vec![
                Box::new(CordonNode) as Box<dyn Task>,
                Box::new(LoadContainerdImages),
                Box::new(CoreDnsBackup),
            ])
            .with_tasks(vec![
                Box::new(NodeReady) as Box<dyn Task>,
                Box::new(UpgradeKubeadmCluster),
            ])
            .with_post_tasks(vec![
                Box::new(KubeletReload) as Box<dyn Task>,
                Box::new(NodeReady),
                Box::new(CoreDnsRestore),
                Box::new(UncordonNode),
                Box::new(CleanupImages),
                Box::new(RotateAdminCerts),
            ]),
        Workflow::Reset => details.with_tasks(vec![
            Box::new(KubeadmReset) as Box<dyn Task>,
            Box::new(PurgeFiles),
        ]),
        Workflow::ResetCerts => details.with_tasks(vec![
            Box::new(RotateCerts) as Box<dyn Task>,
            Box::new(RestartControlPlane),
        ]),
        Workflow::Patch => super::patch_workflow(details.os),
    }
}

pub(super) fn validate(spec: &mut ClusterSpec) -> Vec<String> {
    let mut problems = Vec::new();

    match spec.networking.as_mut() {
        None => problems.push("networking is required".to_string()),
        Some(networking) => {
            if networking.pod_subnet.is_empty() {
                networking.pod_subnet = DEFAULT_POD_NETWORK.to_string();
            }
            if networking.svc_subnet.is_empty() {
                networking.svc_subnet = DEFAULT_SERVICE_NETWORK.to_string();
            }
            if networking.cni_manifest_url.is_empty() {
                problems.push("cni manifest url is required".to_string());
            }
            if spec.disable_workloads.is_none() {
                spec.disable_workloads = Some(false);
            }
        }
    }

    if spec.version.trim().is_empty() {
        problems.push("kubernetes version is required".to_string());
    }

    if let Some(runtime) = spec
        .cluster_runtime
        .as_ref()
        .filter(|r| r.customise_cluster_runtime)
    {
        let cri = &runtime.cluster_cri;
        if cri.private_registry_fqdn.is_empty() {
            problems.push(
                "private registry fqdn is required when the cluster runtime is customised"
                    .to_string(),
            );
        }
        if cri.registry_auth.is_auth_required
            && (cri.registry_auth.username.is_empty() || cri.registry_auth.password.is_empty())
        {
            problems.push(
                "registry username and password are required when registry auth is enabled"
                    .to_string(),
            );
        }
    }

    problems
}
