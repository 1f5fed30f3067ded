//! Name-keyed table of running reconciler loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use observability::{reconciler_span, OperationMetrics};

use super::{heartbeat_with_context, ReconcileContext, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcilerState {
    #[serde(rename = "OK")]
    Ok,
    Stopped,
}

/// Externally visible view of one registered reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerStatus {
    pub name: String,
    pub status: ReconcilerState,
    /// Interval between passes, e.g. `10s`.
    pub interval: String,
}

struct ReconcilerHandle {
    interval: Duration,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.join.is_finished()
    }

    fn status(&self, name: &str) -> ReconcilerStatus {
        ReconcilerStatus {
            name: name.to_string(),
            status: if self.is_running() {
                ReconcilerState::Ok
            } else {
                ReconcilerState::Stopped
            },
            interval: format!("{:?}", self.interval),
        }
    }
}

#[derive(Clone)]
pub struct ReconcilerRegistry {
    reconcilers: Arc<Mutex<HashMap<String, ReconcilerHandle>>>,
    root: CancellationToken,
    metrics: OperationMetrics,
}

impl ReconcilerRegistry {
    /// Every loop started by this registry stops when `root` is cancelled.
    pub fn new(root: CancellationToken, metrics: OperationMetrics) -> Self {
        Self {
            reconcilers: Arc::new(Mutex::new(HashMap::new())),
            root,
            metrics,
        }
    }

    /// Store `reconciler` under its name and start its loop.
    ///
    /// Returns false, leaving things untouched, when a reconciler with the
    /// same name is still running. A stopped one is replaced.
    pub async fn register(&self, reconciler: Arc<dyn Reconciler>) -> bool {
        let name = reconciler.name();
        let mut reconcilers = self.reconcilers.lock().await;
        if reconcilers.get(name).is_some_and(|h| h.is_running()) {
            warn!(reconciler = name, "Reconciler already registered");
            return false;
        }

        let interval = reconciler.interval();
        let cancel = self.root.child_token();
        let span = reconciler_span!(name);
        let token = cancel.clone();
        let join = tokio::spawn(
            async move {
                info!(interval = ?interval, "Starting reconciler");
                heartbeat_with_context(name, interval, token, move |token| {
                    let reconciler = reconciler.clone();
                    async move { reconciler.reconcile(&ReconcileContext::new(token)).await }
                })
                .await;
                info!("Reconciler stopped");
            }
            .instrument(span),
        );

        reconcilers.insert(
            name.to_string(),
            ReconcilerHandle {
                interval,
                cancel,
                join,
            },
        );
        self.publish_count(&reconcilers);
        true
    }

    pub async fn get(&self, name: &str) -> Option<ReconcilerStatus> {
        self.reconcilers
            .lock()
            .await
            .get(name)
            .map(|h| h.status(name))
    }

    /// Registered and not stopped.
    pub async fn is_running(&self, name: &str) -> bool {
        self.reconcilers
            .lock()
            .await
            .get(name)
            .is_some_and(|h| h.is_running())
    }

    /// Stop `name` and wait until its loop has exited.
    ///
    /// Returns false if nothing was registered under that name.
    pub async fn unregister(&self, name: &str) -> bool {
        // Wait outside the lock so a stopping loop never contends with it.
        let handle = {
            let mut reconcilers = self.reconcilers.lock().await;
            let handle = reconcilers.remove(name);
            self.publish_count(&reconcilers);
            handle
        };
        let Some(handle) = handle else {
            return false;
        };

        info!(reconciler = name, "Unregistering reconciler");
        handle.cancel.cancel();
        if let Err(e) = handle.join.await {
            warn!(reconciler = name, error = %e, "Reconciler task ended abnormally");
        }
        true
    }

    /// Every registered reconciler, sorted by name.
    pub async fn statuses(&self) -> Vec<ReconcilerStatus> {
        let reconcilers = self.reconcilers.lock().await;
        let mut statuses: Vec<ReconcilerStatus> = reconcilers
            .iter()
            .map(|(name, handle)| handle.status(name))
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Cancel every loop and wait for all of them.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<(String, ReconcilerHandle)> =
            self.reconcilers.lock().await.drain().collect();
        for (name, handle) in handles {
            if let Err(e) = handle.join.await {
                warn!(reconciler = %name, error = %e, "Reconciler task ended abnormally");
            }
        }
        self.metrics.set_reconcilers_registered(0);
    }

    fn publish_count(&self, reconcilers: &HashMap<String, ReconcilerHandle>) {
        let running = reconcilers.values().filter(|h| h.is_running()).count();
        self.metrics.set_reconcilers_registered(running);
    }
}
