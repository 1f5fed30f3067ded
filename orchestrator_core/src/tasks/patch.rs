use async_trait::async_trait;
use tracing::info;

use cluster_shared_types::{ClusterSpec, ClusterStatus, Result};
use os_utility_interface::OsUtil;

use super::node_scheduling;
use crate::task::{Task, TaskContext};

/// Cordon or uncordon the node according to `disable_workloads`.
///
/// An unset flag leaves scheduling alone.
pub struct UpdateWorkloadScheduler;

#[async_trait]
impl Task for UpdateWorkloadScheduler {
    fn name(&self) -> &'static str {
        "update-workload-scheduler"
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()> {
        match spec.disable_workloads {
            Some(true) => {
                info!("Disabling workloads on the node");
                node_scheduling(os, "cordon").await?;
                status.unschedulable = true;
            }
            Some(false) => {
                info!("Enabling workloads on the node");
                node_scheduling(os, "uncordon").await?;
                status.unschedulable = false;
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClusterState;
    use crate::task::TaskTimings;
    use os_utility::DryRunOsUtil;
    use state_store_interface::in_memory::InMemoryClusterStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn apply(flag: Option<bool>, os: &DryRunOsUtil) -> ClusterStatus {
        let ctx = TaskContext::new(
            ClusterState::new(Arc::new(InMemoryClusterStore::new())),
            TaskTimings::immediate(),
            CancellationToken::new(),
        );
        let mut status = ClusterStatus::default();
        let mut spec = ClusterSpec {
            disable_workloads: flag,
            ..Default::default()
        };
        UpdateWorkloadScheduler
            .run(&ctx, &mut status, &mut spec, os)
            .await
            .unwrap();
        status
    }

    #[tokio::test]
    async fn test_disable_workloads_cordons() {
        let os = DryRunOsUtil::new().with_hostname("edge");
        let status = apply(Some(true), &os).await;
        assert!(status.unschedulable);
        assert_eq!(os.calls().await, vec!["kubectl cordon edge"]);
    }

    #[tokio::test]
    async fn test_enable_workloads_uncordons() {
        let os = DryRunOsUtil::new().with_hostname("edge");
        let status = apply(Some(false), &os).await;
        assert!(!status.unschedulable);
        assert_eq!(os.calls().await, vec!["kubectl uncordon edge"]);
    }

    #[tokio::test]
    async fn test_unset_flag_does_nothing() {
        let os = DryRunOsUtil::new();
        apply(None, &os).await;
        assert!(os.calls().await.is_empty());
    }
}
