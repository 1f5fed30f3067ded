//! REST API for the cluster agent.
//!
//! # Endpoints
//!
//! ## Cluster (`/api/v1alpha1`)
//! - `GET /cluster` - Spec and status of the managed cluster
//! - `POST /cluster` - Install a cluster from a spec
//! - `PUT /cluster` - Upgrade to `{"version": "..."}`
//! - `PATCH /cluster` - Apply a partial spec
//! - `DELETE /cluster` - Tear the cluster down
//! - `GET /kubeconfig` - Admin kubeconfig
//! - `GET /certs` - Control plane certificate expiry
//! - `DELETE /certs` - Rotate certificates
//! - `GET /audit` - Completed lifecycle operations
//! - `GET /reconcilers` - Registered background reconcilers
//!
//! ## Process
//! - `GET /health`
//! - `GET /metrics` - Prometheus text format
//!
//! Mutating endpoints answer `202 Accepted` once the operation has been
//! validated and its in-progress phase written. The outcome shows up later
//! in the cluster status, its conditions and the audit trail.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "rest-api")]
//! # async fn example(service: orchestrator_core::service::AgentService) -> Result<(), Box<dyn std::error::Error>> {
//! use orchestrator_core::api::{ApiServer, ApiServerConfig, ApiState};
//!
//! let server = ApiServer::new(ApiServerConfig::with_port(8080), ApiState::new(service));
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::{build_router, ApiServer, ApiServerConfig};
pub use state::ApiState;
