//! Single-node Kubernetes cluster lifecycle engine.
//!
//! Installs, upgrades, patches and tears down a kubeadm or k3s cluster on
//! the local host, and keeps its recorded status honest with background
//! reconcilers.
//!
//! - [`lifecycle::Orchestrator`] validates requests, flips the cluster phase
//!   and runs the matching task pipeline in the background.
//! - [`operation::Operation`] executes pre-tasks, tasks and post-tasks in
//!   order, failing fast.
//! - [`providers`] assembles the pipeline for each distribution.
//! - [`reconciler`] hosts the registry and the status and certificate
//!   reconcilers.
//! - [`service::AgentService`] is what the REST layer calls.

#[cfg(feature = "rest-api")]
pub mod api;

pub mod audit;
pub mod conditions;
pub mod config;
pub mod lifecycle;
pub mod operation;
pub mod providers;
pub mod reconciler;
pub mod service;
pub mod startup;
pub mod state;
pub mod task;
pub mod tasks;

pub use conditions::Conditions;
pub use config::{AgentConfig, ConfigPaths};
pub use lifecycle::{OperationHandle, Orchestrator};
pub use service::AgentService;
pub use state::ClusterState;
