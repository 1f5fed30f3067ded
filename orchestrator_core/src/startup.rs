//! Checks run once when the agent starts, before any request is served.

use tracing::{info, warn};

use cluster_shared_types::{ClusterPhase, Result};

use crate::state::ClusterState;

/// An operation cannot survive a restart: rewrite an in-progress phase to
/// `Failed`.
///
/// Returns the phase that was interrupted, if any.
pub async fn recover_interrupted_operation(state: &ClusterState) -> Result<Option<ClusterPhase>> {
    let mut interrupted = None;
    state
        .update(|status| {
            if status.phase.is_in_progress() {
                interrupted = Some(status.phase);
                status.phase = ClusterPhase::Failed;
            }
        })
        .await?;

    match interrupted {
        Some(phase) => warn!(phase = %phase, "Operation interrupted by restart; cluster marked failed"),
        None => info!("No interrupted operation found"),
    }
    Ok(interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_store_interface::in_memory::InMemoryClusterStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_in_progress_phases_become_failed() {
        for phase in ClusterPhase::IN_PROGRESS {
            let state = ClusterState::new(Arc::new(InMemoryClusterStore::new()));
            state.set_phase(phase).await.unwrap();

            assert_eq!(recover_interrupted_operation(&state).await.unwrap(), Some(phase));
            assert_eq!(state.phase().await.unwrap(), ClusterPhase::Failed);
        }
    }

    #[tokio::test]
    async fn test_settled_phases_are_kept() {
        for phase in [
            ClusterPhase::NotInitialised,
            ClusterPhase::Provisioned,
            ClusterPhase::Deleted,
            ClusterPhase::Failed,
        ] {
            let state = ClusterState::new(Arc::new(InMemoryClusterStore::new()));
            state.set_phase(phase).await.unwrap();

            assert_eq!(recover_interrupted_operation(&state).await.unwrap(), None);
            assert_eq!(state.phase().await.unwrap(), phase);
        }
    }
}
