//! API request handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cluster_shared_types::{ClusterPhase, ClusterSpec, Result};
use observability::{MetricTimer, ResponseCode};

use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::lifecycle::{paths, OperationHandle};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to upgrade the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub version: String,
}

/// Returned when a lifecycle operation has been accepted.
///
/// The operation runs in the background; poll `GET /cluster` for its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub operation_id: Uuid,
    pub operation: String,
    /// Phase right after the operation was accepted.
    pub phase: ClusterPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeconfigResponse {
    pub kubeconfig: String,
}

/// Response for list operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        let count = items.len();
        Self { items, count }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub phase: ClusterPhase,
}

// ============================================================================
// Helpers
// ============================================================================

async fn accepted(state: &ApiState, handle: OperationHandle) -> ApiResult<impl IntoResponse> {
    let phase = state.service.orchestrator().state().phase().await?;
    let response = OperationResponse {
        operation_id: handle.id(),
        operation: handle.operation().to_string(),
        phase,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Finish the request metric of a read-only endpoint.
async fn observe_query<T>(state: &ApiState, timer: MetricTimer, result: &Result<T>) {
    let spec = state
        .service
        .orchestrator()
        .state()
        .spec()
        .await
        .unwrap_or_default();
    let code = if result.is_ok() {
        ResponseCode::Success
    } else {
        ResponseCode::Failed
    };
    timer.finish(&spec.cluster_type, &spec.version, code);
}

// ============================================================================
// Cluster
// ============================================================================

/// GET /cluster
pub async fn get_cluster(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let timer = state.service.orchestrator().metrics().start_timer("GET", paths::CLUSTER);
    let result = state.service.get_cluster().await;
    observe_query(&state, timer, &result).await;
    Ok(Json(result?))
}

/// POST /cluster
pub async fn create_cluster(
    State(state): State<ApiState>,
    Json(spec): Json<ClusterSpec>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.service.create_cluster(spec).await?;
    accepted(&state, handle).await
}

/// PUT /cluster
pub async fn upgrade_cluster(
    State(state): State<ApiState>,
    Json(request): Json<UpgradeRequest>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.service.upgrade_cluster(&request.version).await?;
    accepted(&state, handle).await
}

/// PATCH /cluster
pub async fn patch_cluster(
    State(state): State<ApiState>,
    Json(delta): Json<ClusterSpec>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.service.patch_cluster(delta).await?;
    accepted(&state, handle).await
}

/// DELETE /cluster
pub async fn delete_cluster(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let handle = state.service.delete_cluster().await?;
    accepted(&state, handle).await
}

// ============================================================================
// Kubeconfig, certificates, audit
// ============================================================================

/// GET /kubeconfig
pub async fn get_kubeconfig(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let timer = state
        .service
        .orchestrator()
        .metrics()
        .start_timer("GET", paths::KUBECONFIG);
    let result = state.service.get_kubeconfig().await;
    observe_query(&state, timer, &result).await;
    Ok(Json(KubeconfigResponse { kubeconfig: result? }))
}

/// GET /certs
pub async fn get_certs(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let timer = state.service.orchestrator().metrics().start_timer("GET", paths::CERTS);
    let result = state.service.get_certs().await;
    observe_query(&state, timer, &result).await;
    Ok(Json(ListResponse::from(result?)))
}

/// DELETE /certs
pub async fn reset_certs(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let handle = state.service.reset_certs().await?;
    accepted(&state, handle).await
}

/// GET /audit
pub async fn get_audit_history(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let timer = state.service.orchestrator().metrics().start_timer("GET", paths::AUDIT);
    let result = state.service.audit_history().await;
    observe_query(&state, timer, &result).await;
    Ok(Json(ListResponse::from(result?)))
}

/// GET /reconcilers
pub async fn get_reconcilers(State(state): State<ApiState>) -> impl IntoResponse {
    Json(ListResponse::from(state.service.reconciler_statuses().await))
}

// ============================================================================
// Health and metrics
// ============================================================================

/// GET /health
pub async fn health(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let phase = state.service.orchestrator().state().phase().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        phase,
    }))
}

/// GET /metrics
pub async fn metrics(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let registry = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::not_found("metrics recorder is not installed"))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        registry.render(),
    ))
}
