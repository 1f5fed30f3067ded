//! Background reconcilers.
//!
//! A reconciler is an interval-driven loop that re-derives phase and
//! condition truth from the live system. Loops are owned by the
//! [`ReconcilerRegistry`], which starts them on registration and stops them
//! on unregistration.
//!
//! ```text
//!                 ┌──────────────────────┐
//!  register ────▶ │  ReconcilerRegistry  │ ── child token ──┐
//!                 └──────────────────────┘                  ▼
//!                                              ┌────────────────────────┐
//!                                              │ heartbeat (interval)   │
//!                                              │  └─ reconcile(ctx)     │
//!                                              └────────────────────────┘
//! ```
//!
//! Every loop has exactly one [`CancellationToken`]. Unregistering cancels it
//! and waits for the loop to exit; a reconciler stopping itself cancels it
//! without waiting; process shutdown cancels the registry root, which
//! cancels every child.

pub mod certs;
pub mod heartbeat;
pub mod registry;
pub mod status;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cluster_shared_types::Result;

pub use certs::{ClusterCertsReconciler, CERTS_RECONCILER_NAME};
pub use heartbeat::{heartbeat, heartbeat_with_context};
pub use registry::{ReconcilerRegistry, ReconcilerState, ReconcilerStatus};
pub use status::{ClusterStatusReconciler, StatusReconcilerConfig, STATUS_RECONCILER_NAME};

/// Handed to every reconcile pass.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    cancel: CancellationToken,
}

impl ReconcileContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Ask the owning loop to exit after this pass. Does not wait.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `duration`; returns false if the loop was stopped meanwhile.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// One pass. An error is logged by the loop; the next tick still runs.
    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<()>;
}
