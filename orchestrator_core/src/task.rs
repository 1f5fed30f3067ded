//! The unit of work executed by an [`Operation`](crate::operation::Operation).

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cluster_shared_types::constants::{
    CONTROL_PLANE_RESTART_WAIT, CONTROL_PLANE_STARTUP_WAIT, NODE_READINESS_MAX_RETRY_COUNT,
    NODE_READINESS_RETRY_INTERVAL,
};
use cluster_shared_types::{ClusterSpec, ClusterStatus, OrchestrationError, Result};
use os_utility_interface::OsUtil;

use crate::state::ClusterState;

/// Waits and retry budgets used by tasks.
#[derive(Debug, Clone)]
pub struct TaskTimings {
    pub node_ready_retries: u32,
    pub node_ready_interval: Duration,
    pub control_plane_restart_wait: Duration,
    pub control_plane_startup_wait: Duration,
    pub containerd_restart_wait: Duration,
}

impl Default for TaskTimings {
    fn default() -> Self {
        Self {
            node_ready_retries: NODE_READINESS_MAX_RETRY_COUNT,
            node_ready_interval: NODE_READINESS_RETRY_INTERVAL,
            control_plane_restart_wait: CONTROL_PLANE_RESTART_WAIT,
            control_plane_startup_wait: CONTROL_PLANE_STARTUP_WAIT,
            containerd_restart_wait: Duration::from_secs(10),
        }
    }
}

impl TaskTimings {
    /// No waiting at all, for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            node_ready_retries: 2,
            node_ready_interval: Duration::ZERO,
            control_plane_restart_wait: Duration::ZERO,
            control_plane_startup_wait: Duration::ZERO,
            containerd_restart_wait: Duration::ZERO,
        }
    }

    pub fn with_node_ready(mut self, retries: u32, interval: Duration) -> Self {
        self.node_ready_retries = retries;
        self.node_ready_interval = interval;
        self
    }
}

/// What a task sees besides the spec, status and OS utility.
#[derive(Clone)]
pub struct TaskContext {
    pub state: ClusterState,
    pub timings: TaskTimings,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(state: ClusterState, timings: TaskTimings, cancel: CancellationToken) -> Self {
        Self {
            state,
            timings,
            cancel,
        }
    }

    /// Sleep unless the operation gets cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return self.ensure_active();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(cancelled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        Ok(())
    }
}

fn cancelled() -> OrchestrationError {
    OrchestrationError::InternalError("operation cancelled".to_string())
}

/// One named, side-effecting step of a lifecycle operation.
///
/// Tasks are expected to be idempotent. `rollback` is part of the contract
/// but the executor never calls it.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        ctx: &TaskContext,
        status: &mut ClusterStatus,
        spec: &mut ClusterSpec,
        os: &dyn OsUtil,
    ) -> Result<()>;

    async fn rollback(
        &self,
        _ctx: &TaskContext,
        _status: &mut ClusterStatus,
        _spec: &mut ClusterSpec,
        _os: &dyn OsUtil,
    ) -> Result<()> {
        Ok(())
    }
}
