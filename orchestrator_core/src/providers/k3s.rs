use std::sync::Arc;

use cluster_shared_types::constants::{
    K3S_DEFAULT_POD_NETWORK, K3S_DEFAULT_SERVICE_NETWORK, K3S_DEFAULT_VERSION,
};
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
            .with_tasks(vec![Box::new(InstallK3sCluster) as Box<dyn Task>])
            .with_post_tasks(vec![Box::new(InstallCni) as Box<dyn Task>]),
        // Re-running the install script with a new version upgrades in place.
        Workflow::Upgrade => details.with_tasks(vec![Box::new(InstallK3sCluster) as Box<dyn Task>]),
        Workflow::Reset => details.with_tasks(vec![
            Box::new(UninstallK3s) as Box<dyn Task>,
            Box::new(PurgeFiles),
        ]),
        Workflow::ResetCerts => details.with_tasks(vec![Box::new(RestartK3s) as Box<dyn Task>]),
        Workflow::Patch => super::patch_workflow(details.os),
    }
}

pub(super) fn validate(spec: &mut ClusterSpec) -> Vec<String> {
    if spec.version.trim().is_empty() {
        spec.version = K3S_DEFAULT_VERSION.to_string();
    }
    let networking = spec.networking.get_or_insert_with(Default::default);
    if networking.pod_subnet.is_empty() {
        networking.pod_subnet = K3S_DEFAULT_POD_NETWORK.to_string();
    }
    if networking.svc_subnet.is_empty() {
        networking.svc_subnet = K3S_DEFAULT_SERVICE_NETWORK.to_string();
    }
    if spec.disable_workloads.is_none() {
        spec.disable_workloads = Some(false);
    }
    Vec::new()
}
