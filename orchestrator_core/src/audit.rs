//! Audit trail of completed lifecycle operations.

use chrono::Utc;
use tracing::{info, warn};

use cluster_shared_types::{AuditRecord, Result};
use state_store_interface::sort_audit_history_by_timestamp;

use crate::state::ClusterState;

/// Operation names as they appear in the audit history.
pub mod operations {
    pub const INSTALL: &str = "Install";
    pub const UPGRADE: &str = "Upgrade";
    pub const RESET: &str = "Reset";
    pub const RESET_CERTS: &str = "Reset Certs";
    pub const PATCH: &str = "Patch";
}

/// Append one record to the persisted history.
///
/// The whole list is read, extended, sorted and rewritten.
pub async fn set_audit_log(
    state: &ClusterState,
    operation: &str,
    cluster_type: &str,
    version: &str,
    status: &str,
    message: &str,
    reason: &str,
) -> Result<()> {
    let record = AuditRecord {
        operation: operation.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_executed: Utc::now(),
        cluster_type: cluster_type.to_string(),
        current_version: version.to_string(),
    };

    info!(
        operation = %record.operation,
        status = %record.status,
        message = %record.message,
        "Recording audit entry"
    );

    state
        .modify_audit_history(|history| {
            history.push(record);
            sort_audit_history_by_timestamp(history);
        })
        .await
}

/// Like [`set_audit_log`] but only logs a failure to persist.
pub(crate) async fn record(
    state: &ClusterState,
    operation: &str,
    cluster_type: &str,
    version: &str,
    status: &str,
    message: &str,
    reason: &str,
) {
    if let Err(e) =
        set_audit_log(state, operation, cluster_type, version, status, message, reason).await
    {
        warn!(operation, error = %e, "Failed to persist audit entry");
    }
}
