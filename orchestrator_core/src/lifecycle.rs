//! Lifecycle orchestrator: the façade behind every cluster operation.
//!
//! Each mutating entry point validates and flips the phase synchronously
//! through [`ClusterState::try_begin`], then runs the task pipeline on a
//! background task. The caller gets an [`OperationHandle`] it may await or
//! drop; progress is otherwise observed by polling the status.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use cluster_shared_types::constants::{
    CLUSTER_CERTS_ROTATION_DAYS, CLUSTER_DELETE_FAILED, DEFAULT_CLUSTER_NAME,
    INSTALL_READY_FAILED, PACKAGE_READY_FAILED, UPGRADE_FAILED,
};
use cluster_shared_types::{
    AuditRecord, CertificateInfo, Cluster, ClusterPhase, ClusterSpec, ClusterStatus, ClusterType,
    ConditionType, OrchestrationError, Result, Severity,
};
use observability::{lifecycle_span, MetricTimer, OperationMetrics, ResponseCode};
use os_utility_interface::OsUtil;

use crate::audit::{self, operations};
use crate::conditions::Conditions;
use crate::operation::Operation;
use crate::providers::{self, Workflow};
use crate::state::ClusterState;
use crate::task::{TaskContext, TaskTimings};

/// Resource paths used as the metric `path` label.
pub mod paths {
    pub const CLUSTER: &str = "/api/v1alpha1/cluster";
    pub const KUBECONFIG: &str = "/api/v1alpha1/kubeconfig";
    pub const CERTS: &str = "/api/v1alpha1/certs";
    pub const AUDIT: &str = "/api/v1alpha1/audit";
}

const CERT_DATE_FORMAT: &str = "%b %d, %Y %H:%M UTC";

// ===== Operation handle =====

/// Handle on an accepted lifecycle operation running in the background.
#[derive(Debug)]
pub struct OperationHandle {
    id: Uuid,
    operation: &'static str,
    join: JoinHandle<ClusterPhase>,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the operation and return the phase it left behind.
    pub async fn wait(self) -> Result<ClusterPhase> {
        self.join
            .await
            .map_err(|e| OrchestrationError::InternalError(format!("{} task failed: {}", self.operation, e)))
    }

    /// Run `f` with the terminal phase once the operation is done.
    ///
    /// The returned handle completes after `f`, so waiting on it also
    /// observes whatever `f` did.
    pub(crate) fn and_then<F, Fut>(self, f: F) -> OperationHandle
    where
        F: FnOnce(ClusterPhase) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let OperationHandle { id, operation, join } = self;
        let span = lifecycle_span!(operation, id);
        let join = tokio::spawn(
            async move {
                let phase = match join.await {
                    Ok(phase) => phase,
                    Err(e) => {
                        error!(error = %e, "Operation task failed");
                        ClusterPhase::Failed
                    }
                };
                f(phase).await;
                phase
            }
            .instrument(span),
        );
        OperationHandle { id, operation, join }
    }
}

// ===== Orchestrator =====

#[derive(Clone)]
pub struct Orchestrator {
    state: ClusterState,
    os: Arc<dyn OsUtil>,
    metrics: OperationMetrics,
    timings: TaskTimings,
    rotation_threshold_days: i64,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(state: ClusterState, os: Arc<dyn OsUtil>, metrics: OperationMetrics) -> Self {
        Self {
            state,
            os,
            metrics,
            timings: TaskTimings::default(),
            rotation_threshold_days: CLUSTER_CERTS_ROTATION_DAYS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timings(mut self, timings: TaskTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_rotation_threshold_days(mut self, days: i64) -> Self {
        self.rotation_threshold_days = days;
        self
    }

    /// Background operations stop at their next task once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn os(&self) -> &Arc<dyn OsUtil> {
        &self.os
    }

    pub fn metrics(&self) -> &OperationMetrics {
        &self.metrics
    }

    pub fn rotation_threshold_days(&self) -> i64 {
        self.rotation_threshold_days
    }

    // ===== Install =====

    /// Validate `spec`, move to `Provisioning` and install in the background.
    pub async fn install(&self, mut spec: ClusterSpec) -> Result<OperationHandle> {
        let timer = self.metrics.start_timer("POST", paths::CLUSTER);
        let labels = (spec.cluster_type.clone(), spec.version.clone());

        let cluster_type = match spec.distribution() {
            Ok(cluster_type) => cluster_type,
            Err(e) => {
                timer.finish(&labels.0, &labels.1, ResponseCode::ClusterAlreadyInitialized);
                return Err(e);
            }
        };
        spec.cluster_type = cluster_type.as_str().to_string();
        if spec.cluster_name.trim().is_empty() {
            spec.cluster_name = self.default_cluster_name().await;
        }
        let validation = providers::validate_spec(cluster_type, &mut spec);

        let begun = self
            .state
            .try_begin(
                |status| {
                    if status.phase == ClusterPhase::Provisioned {
                        return Err(OrchestrationError::AlreadyInitialized);
                    }
                    if status.phase.is_in_progress() {
                        return Err(OrchestrationError::OperationInProgress(status.phase));
                    }
                    validation
                },
                ClusterPhase::Provisioning,
                Some(&spec),
            )
            .await;
        let status = match begun {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Install rejected");
                timer.finish(&spec.cluster_type, &spec.version, ResponseCode::ClusterAlreadyInitialized);
                return Err(e);
            }
        };

        info!(cluster_type = %cluster_type, version = %spec.version, "Cluster installation accepted");
        let this = self.clone();
        Ok(self.spawn(operations::INSTALL, async move {
            this.finish_install(cluster_type, status, spec, timer).await
        }))
    }

    async fn finish_install(
        &self,
        cluster_type: ClusterType,
        status: ClusterStatus,
        spec: ClusterSpec,
        timer: MetricTimer,
    ) -> ClusterPhase {
        let (outcome, op_status, spec) = self
            .run_workflow(cluster_type, Workflow::Install, status, spec)
            .await;

        let (message, reason, code) = match &outcome {
            Ok(()) => (
                "Cluster has been successfully installed",
                String::new(),
                ResponseCode::ClusterCreated,
            ),
            Err(e) => (
                "Cluster installation failed",
                e.to_string(),
                ResponseCode::ClusterFailed,
            ),
        };

        let version = spec.version.clone();
        let phase = self
            .commit(|s| {
                s.unschedulable = op_status.unschedulable;
                if outcome.is_ok() {
                    s.phase = ClusterPhase::Provisioned;
                    s.kubernetes_version = version.clone();
                    s.mark_true(ConditionType::InstallSuccess);
                } else {
                    s.phase = ClusterPhase::Failed;
                    s.mark_false(
                        ConditionType::InstallSuccess,
                        INSTALL_READY_FAILED,
                        Severity::Error,
                        message,
                    );
                }
            })
            .await;
        if let Err(e) = self.state.write_spec(&spec).await {
            error!(error = %e, "Failed to persist cluster spec");
        }

        self.conclude(
            operations::INSTALL,
            cluster_type.as_str(),
            &spec.version,
            phase,
            message,
            &reason,
            code,
            timer,
        )
        .await;
        phase
    }

    // ===== Upgrade =====

    /// Upgrade a provisioned (or failed) cluster to `version`.
    pub async fn upgrade(&self, version: &str) -> Result<OperationHandle> {
        let timer = self.metrics.start_timer("PUT", paths::CLUSTER);
        let mut spec = match self.state.spec().await {
            Ok(spec) => spec,
            Err(e) => {
                timer.finish("", version, ResponseCode::UpgradeFailed);
                return Err(e);
            }
        };
        let cluster_type = spec.distribution().unwrap_or_default();
        let previous_spec_version = spec.version.clone();
        spec.version = version.trim().to_string();

        let begun = self
            .state
            .try_begin(
                |status| {
                    if spec.version.is_empty() {
                        return Err(OrchestrationError::validation("no version supplied for upgrade"));
                    }
                    if status.phase.is_in_progress() {
                        return Err(OrchestrationError::OperationInProgress(status.phase));
                    }
                    if !matches!(status.phase, ClusterPhase::Provisioned | ClusterPhase::Failed) {
                        return Err(OrchestrationError::not_initialized(
                            "cluster must be installed properly for upgrade",
                        ));
                    }
                    Ok(())
                },
                ClusterPhase::Upgrading,
                Some(&spec),
            )
            .await;
        let status = match begun {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Upgrade rejected");
                timer.finish(cluster_type.as_str(), version, ResponseCode::UpgradeFailed);
                return Err(e);
            }
        };

        let prior_version = if status.kubernetes_version.is_empty() {
            previous_spec_version.clone()
        } else {
            status.kubernetes_version.clone()
        };
        info!(from = %prior_version, to = %spec.version, "Cluster upgrade accepted");

        let this = self.clone();
        Ok(self.spawn(operations::UPGRADE, async move {
            this.finish_upgrade(cluster_type, status, spec, prior_version, previous_spec_version, timer)
                .await
        }))
    }

    async fn finish_upgrade(
        &self,
        cluster_type: ClusterType,
        status: ClusterStatus,
        spec: ClusterSpec,
        prior_version: String,
        previous_spec_version: String,
        timer: MetricTimer,
    ) -> ClusterPhase {
        let target = spec.version.clone();
        let (outcome, _, mut spec) = self
            .run_workflow(cluster_type, Workflow::Upgrade, status, spec)
            .await;

        let failure_message = format!("failed to upgrade cluster to {}", target);
        let (message, reason, code) = match &outcome {
            Ok(()) => (
                format!("Cluster has been successfully upgraded to {}", target),
                String::new(),
                ResponseCode::UpgradeDone,
            ),
            Err(e) => (failure_message.clone(), e.to_string(), ResponseCode::UpgradeFailed),
        };

        let mut recorded_version = target.clone();
        let committed = self
            .state
            .update(|s| {
                if outcome.is_ok() {
                    s.phase = ClusterPhase::Provisioned;
                    s.kubernetes_version = target.clone();
                    s.mark_true(ConditionType::UpgradeSuccess);
                } else {
                    s.phase = ClusterPhase::Failed;
                    s.kubernetes_version = prior_version.clone();
                    s.mark_false(
                        ConditionType::UpgradeSuccess,
                        UPGRADE_FAILED,
                        Severity::Warning,
                        &failure_message,
                    );
                }
            })
            .await;
        let phase = match committed {
            Ok(s) => {
                recorded_version = s.kubernetes_version;
                s.phase
            }
            Err(e) => {
                error!(error = %e, "Failed to persist upgrade outcome");
                ClusterPhase::Failed
            }
        };

        if outcome.is_err() {
            spec.version = previous_spec_version;
            if let Err(e) = self.state.write_spec(&spec).await {
                error!(error = %e, "Failed to restore cluster spec version");
            }
        }

        self.conclude(
            operations::UPGRADE,
            cluster_type.as_str(),
            &recorded_version,
            phase,
            &message,
            &reason,
            code,
            timer,
        )
        .await;
        phase
    }

    // ===== Reset =====

    /// Tear the cluster down; on success every persisted record is purged.
    pub async fn reset(&self) -> Result<OperationHandle> {
        let timer = self.metrics.start_timer("DELETE", paths::CLUSTER);
        let spec = match self.state.spec().await {
            Ok(spec) => spec,
            Err(e) => {
                timer.finish("", "", ResponseCode::DeleteFailed);
                return Err(e);
            }
        };
        let cluster_type = spec.distribution().unwrap_or_default();

        let begun = self
            .state
            .try_begin(
                |status| {
                    // Any initialised phase may be torn down, including a stuck operation.
                    if status.phase == ClusterPhase::NotInitialised {
                        return Err(OrchestrationError::not_initialized("nothing to reset"));
                    }
                    Ok(())
                },
                ClusterPhase::Deleting,
                None,
            )
            .await;
        let status = match begun {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Reset rejected");
                timer.finish(cluster_type.as_str(), &spec.version, ResponseCode::DeleteFailed);
                return Err(e);
            }
        };

        info!(cluster_type = %cluster_type, "Cluster reset accepted");
        let this = self.clone();
        Ok(self.spawn(operations::RESET, async move {
            this.finish_reset(cluster_type, status, spec, timer).await
        }))
    }

    async fn finish_reset(
        &self,
        cluster_type: ClusterType,
        status: ClusterStatus,
        spec: ClusterSpec,
        timer: MetricTimer,
    ) -> ClusterPhase {
        let version = if status.kubernetes_version.is_empty() {
            spec.version.clone()
        } else {
            status.kubernetes_version.clone()
        };
        let (outcome, _, _) = self
            .run_workflow(cluster_type, Workflow::Reset, status, spec)
            .await;

        let (phase, message, reason, code) = match outcome {
            Ok(()) => match self.purge_after_reset().await {
                Ok(()) => (
                    ClusterPhase::Deleted,
                    "Cluster has been successfully sundown",
                    String::new(),
                    ResponseCode::DeleteDone,
                ),
                Err(e) => {
                    error!(error = %e, "Failed to purge cluster data");
                    (
                        ClusterPhase::Failed,
                        "Cluster reset failed",
                        e.to_string(),
                        ResponseCode::DeleteFailed,
                    )
                }
            },
            Err(e) => {
                let phase = self
                    .commit(|s| {
                        s.phase = ClusterPhase::Failed;
                        s.mark_false(
                            ConditionType::DeleteSuccess,
                            CLUSTER_DELETE_FAILED,
                            Severity::Warning,
                            "Cluster reset failed",
                        );
                    })
                    .await;
                (phase, "Cluster reset failed", e.to_string(), ResponseCode::DeleteFailed)
            }
        };

        self.conclude(
            operations::RESET,
            cluster_type.as_str(),
            &version,
            phase,
            message,
            &reason,
            code,
            timer,
        )
        .await;
        phase
    }

    /// Drop everything, then leave a fresh `Deleted` status behind.
    async fn purge_after_reset(&self) -> Result<()> {
        self.state.set_phase(ClusterPhase::Deleted).await?;
        self.state.purge().await?;
        self.state
            .update(|s| {
                *s = ClusterStatus {
                    phase: ClusterPhase::Deleted,
                    ..ClusterStatus::default()
                }
            })
            .await?;
        Ok(())
    }

    // ===== Reset config =====

    /// Rotate the control-plane certificates and kubeconfig.
    pub async fn reset_config(&self) -> Result<OperationHandle> {
        let timer = self.metrics.start_timer("DELETE", paths::CERTS);
        let spec = match self.state.spec().await {
            Ok(spec) => spec,
            Err(e) => {
                timer.finish("", "", ResponseCode::ResetFailed);
                return Err(e);
            }
        };
        let cluster_type = spec.distribution().unwrap_or_default();

        let begun = self
            .state
            .try_begin(
                |status| {
                    if status.phase.is_in_progress() {
                        return Err(OrchestrationError::OperationInProgress(status.phase));
                    }
                    if status.phase != ClusterPhase::Provisioned {
                        return Err(OrchestrationError::not_initialized(
                            "cluster must be provisioned to reset certificates",
                        ));
                    }
                    Ok(())
                },
                ClusterPhase::KubeConfigResetting,
                None,
            )
            .await;
        let status = match begun {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Certificate reset rejected");
                timer.finish(cluster_type.as_str(), &spec.version, ResponseCode::ResetFailed);
                return Err(e);
            }
        };

        info!(cluster_type = %cluster_type, "Certificate reset accepted");
        let this = self.clone();
        Ok(self.spawn(operations::RESET_CERTS, async move {
            this.finish_reset_config(cluster_type, status, spec, timer)
                .await
        }))
    }

    async fn finish_reset_config(
        &self,
        cluster_type: ClusterType,
        status: ClusterStatus,
        spec: ClusterSpec,
        timer: MetricTimer,
    ) -> ClusterPhase {
        let version = status.kubernetes_version.clone();
        let (outcome, _, spec) = self
            .run_workflow(cluster_type, Workflow::ResetCerts, status, spec)
            .await;

        let (message, reason, code) = match &outcome {
            Ok(()) => ("certs successfully reset", String::new(), ResponseCode::ResetDone),
            Err(e) => ("Error resetting certs", e.to_string(), ResponseCode::ResetFailed),
        };
        let phase = self
            .commit(|s| {
                s.phase = if outcome.is_ok() {
                    ClusterPhase::Provisioned
                } else {
                    ClusterPhase::Failed
                };
            })
            .await;

        let version = if version.is_empty() { spec.version } else { version };
        self.conclude(
            operations::RESET_CERTS,
            cluster_type.as_str(),
            &version,
            phase,
            message,
            &reason,
            code,
            timer,
        )
        .await;
        phase
    }

    // ===== Patch =====

    /// Apply `delta` to the persisted spec and run the patch workflow.
    ///
    /// The phase stays `Provisioned`; the outcome lands in `PackageReady`.
    pub async fn patch(&self, delta: ClusterSpec) -> Result<OperationHandle> {
        let timer = self.metrics.start_timer("PATCH", paths::CLUSTER);
        let current = match self.state.spec().await {
            Ok(spec) => spec,
            Err(e) => {
                timer.finish("", "", ResponseCode::PatchFailed);
                return Err(e);
            }
        };
        let cluster_type = current.distribution().unwrap_or_default();
        let spec = merge_patch(current, delta);

        let begun = self
            .state
            .try_begin(
                |status| {
                    if status.phase.is_in_progress() {
                        return Err(OrchestrationError::OperationInProgress(status.phase));
                    }
                    if status.phase != ClusterPhase::Provisioned {
                        return Err(OrchestrationError::not_initialized(
                            "cluster must be installed properly for patch",
                        ));
                    }
                    Ok(())
                },
                ClusterPhase::Provisioned,
                Some(&spec),
            )
            .await;
        let status = match begun {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Patch rejected");
                timer.finish(cluster_type.as_str(), &spec.version, ResponseCode::PatchFailed);
                return Err(e);
            }
        };

        info!(cluster_type = %cluster_type, "Cluster patch accepted");
        let this = self.clone();
        Ok(self.spawn(operations::PATCH, async move {
            this.finish_patch(cluster_type, status, spec, timer).await
        }))
    }

    async fn finish_patch(
        &self,
        cluster_type: ClusterType,
        status: ClusterStatus,
        spec: ClusterSpec,
        timer: MetricTimer,
    ) -> ClusterPhase {
        let (outcome, op_status, spec) = self
            .run_workflow(cluster_type, Workflow::Patch, status, spec)
            .await;

        let (message, reason, code) = match &outcome {
            Ok(()) => ("Cluster is successfully patched", String::new(), ResponseCode::PatchDone),
            Err(e) => ("failed to patch cluster", e.to_string(), ResponseCode::PatchFailed),
        };
        let phase = self
            .commit(|s| {
                s.unschedulable = op_status.unschedulable;
                match &outcome {
                    Ok(()) => s.mark_true(ConditionType::PackageReady),
                    Err(e) => s.mark_false(
                        ConditionType::PackageReady,
                        PACKAGE_READY_FAILED,
                        Severity::Warning,
                        &e.to_string(),
                    ),
                }
            })
            .await;

        self.conclude(
            operations::PATCH,
            cluster_type.as_str(),
            &spec.version,
            phase,
            message,
            &reason,
            code,
            timer,
        )
        .await;
        phase
    }

    // ===== Queries =====

    pub async fn get_cluster(&self) -> Result<Cluster> {
        let status = self.state.status().await?;
        let spec = self.state.spec().await?;
        Ok(Cluster::new(spec, status))
    }

    /// Contents of the distribution's admin kubeconfig.
    pub async fn get_kubeconfig(&self) -> Result<String> {
        self.require_provisioned("kubeconfig").await?;
        let cluster_type = self.state.spec().await?.distribution()?;
        let contents = self
            .os
            .filesystem()
            .read_file(providers::kubeconfig_path(cluster_type))
            .await?;
        String::from_utf8(contents)
            .map_err(|e| OrchestrationError::InternalError(format!("kubeconfig is not utf-8: {}", e)))
    }

    /// Expiry of every control-plane certificate, sorted by name.
    pub async fn get_certs(&self) -> Result<Vec<CertificateInfo>> {
        self.require_provisioned("certificates").await?;
        let cluster_type = self.state.spec().await?.distribution()?;
        if !providers::manages_certificates(cluster_type) {
            return Ok(Vec::new());
        }

        let expiry = self.os.kubeadm().certs_expiry().await?;
        let now = Utc::now();
        let mut certs: Vec<CertificateInfo> = expiry
            .certificates
            .into_iter()
            .map(|(name, remaining_days)| {
                let rotation_in = (remaining_days - self.rotation_threshold_days).max(0);
                CertificateInfo {
                    name,
                    remaining_days,
                    expiry_date: (now + ChronoDuration::days(remaining_days))
                        .format(CERT_DATE_FORMAT)
                        .to_string(),
                    rotation_date: (now + ChronoDuration::days(rotation_in))
                        .format(CERT_DATE_FORMAT)
                        .to_string(),
                }
            })
            .collect();
        certs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(certs)
    }

    pub async fn audit_history(&self) -> Result<Vec<AuditRecord>> {
        self.state
            .audit_history()
            .await?
            .ok_or_else(|| OrchestrationError::NotFound("no audit history recorded".to_string()))
    }

    async fn require_provisioned(&self, what: &str) -> Result<()> {
        let phase = self.state.phase().await?;
        if phase != ClusterPhase::Provisioned {
            return Err(OrchestrationError::not_initialized(format!(
                "{} are only available for a provisioned cluster, phase is {}",
                what, phase
            )));
        }
        Ok(())
    }

    // ===== Plumbing =====

    async fn default_cluster_name(&self) -> String {
        match self.os.host().hostname().await {
            Ok(name) if !name.trim().is_empty() => name.trim().to_lowercase(),
            Ok(_) => DEFAULT_CLUSTER_NAME.to_string(),
            Err(e) => {
                warn!(error = %e, "Could not read hostname, using default cluster name");
                DEFAULT_CLUSTER_NAME.to_string()
            }
        }
    }

    fn spawn<F>(&self, operation: &'static str, fut: F) -> OperationHandle
    where
        F: Future<Output = ClusterPhase> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let span = lifecycle_span!(operation, id);
        let join = tokio::spawn(fut.instrument(span));
        OperationHandle {
            id,
            operation,
            join,
        }
    }

    async fn run_workflow(
        &self,
        cluster_type: ClusterType,
        workflow: Workflow,
        status: ClusterStatus,
        spec: ClusterSpec,
    ) -> (Result<()>, ClusterStatus, ClusterSpec) {
        let details = providers::build_workflow(cluster_type, workflow, self.os.clone());
        let ctx = TaskContext::new(
            self.state.clone(),
            self.timings.clone(),
            self.cancel.child_token(),
        );
        let mut op = Operation::new(workflow.as_str(), status, spec, details);
        let outcome = op.run(&ctx).await;
        if let Err(e) = &outcome {
            error!(operation = workflow.as_str(), error = %e, "Operation failed");
        }
        let (status, spec) = op.into_parts();
        (outcome, status, spec)
    }

    /// Write the terminal status and return the resulting phase.
    async fn commit<F>(&self, f: F) -> ClusterPhase
    where
        F: FnOnce(&mut ClusterStatus),
    {
        match self.state.update(f).await {
            Ok(status) => status.phase,
            Err(e) => {
                error!(error = %e, "Failed to persist terminal status");
                ClusterPhase::Failed
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn conclude(
        &self,
        operation: &str,
        cluster_type: &str,
        version: &str,
        phase: ClusterPhase,
        message: &str,
        reason: &str,
        code: ResponseCode,
        timer: MetricTimer,
    ) {
        audit::record(
            &self.state,
            operation,
            cluster_type,
            version,
            phase.as_str(),
            message,
            reason,
        )
        .await;
        self.metrics.inc_operation(operation, code);
        timer.finish(cluster_type, version, code);
        info!(operation, phase = %phase, code = %code, "Operation finished");
    }
}

/// Overlay the fields set in `delta` on `current`.
///
/// Distribution, name and version are not patchable.
pub fn merge_patch(mut current: ClusterSpec, delta: ClusterSpec) -> ClusterSpec {
    if let Some(networking) = delta.networking {
        current.networking = Some(networking);
    }
    if let Some(storage) = delta.storage {
        current.storage = Some(storage);
    }
    if let Some(api_server) = delta.api_server {
        current.api_server = Some(api_server);
    }
    if let Some(runtime) = delta.cluster_runtime {
        current.cluster_runtime = Some(runtime);
    }
    if delta.disable_workloads.is_some() {
        current.disable_workloads = delta.disable_workloads;
    }
    current.extra_args.extend(delta.extra_args);
    current
}
