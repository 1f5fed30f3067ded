//! `cluster-agent`: manages a single-node kubeadm or k3s cluster on this host.
//!
//! Configuration is read from `/etc/cluster-agent/config.toml` (or the file
//! named by `$CLUSTER_AGENT_CONFIG`); command line flags override it.
//!
//! ```text
//! cluster-agent --listen 0.0.0.0:8080 --log-level debug
//! cluster-agent --dry-run --json-logs
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cluster_client::KubeClientFactory;
use observability::{init_tracing, MetricsRegistry, OperationMetrics, TracingConfig};
use orchestrator_core::api::{ApiServer, ApiServerConfig, ApiState};
use orchestrator_core::config::{AgentConfig, ConfigPaths};
use orchestrator_core::reconciler::ReconcilerRegistry;
use orchestrator_core::{AgentService, ClusterState, Orchestrator};
use os_utility::{DryRunOsUtil, LinuxOsUtil};
use os_utility_interface::OsUtil;
use state_store_interface::create_state_store_async;

#[derive(Debug, Parser)]
#[command(name = "cluster-agent", version, about = "Single-node Kubernetes cluster lifecycle agent")]
struct Cli {
    /// Config file to read instead of the default location.
    #[arg(long, env = "CLUSTER_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Address the REST API listens on.
    #[arg(long)]
    listen: Option<String>,

    /// Fake every host command instead of running it.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Layer the flags that were given on top of `config`.
    fn apply(&self, mut config: AgentConfig) -> AgentConfig {
        if let Some(listen) = &self.listen {
            config = config.with_listen_addr(listen.clone());
        }
        if let Some(level) = &self.log_level {
            config = config.with_log_level(level.clone());
        }
        if self.dry_run {
            config = config.with_dry_run(true);
        }
        if self.json_logs {
            config = config.with_json_logs(true);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = cli
        .config
        .clone()
        .map(ConfigPaths::with_file)
        .unwrap_or_default();
    let config = cli.apply(
        AgentConfig::load_or_default(&paths)
            .await
            .with_context(|| format!("Failed to load {}", paths.config_file().display()))?,
    );

    init_tracing(
        TracingConfig::new("cluster-agent")
            .with_level_name(&config.log.level)
            .with_json(config.log.json),
    );
    info!(
        config = %paths.config_file().display(),
        dry_run = config.dry_run,
        "Starting cluster agent"
    );

    let metrics_registry = match MetricsRegistry::install() {
        Ok(registry) => Some(Arc::new(registry)),
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };
    let metrics = OperationMetrics::new();

    let store = create_state_store_async(config.state_store())
        .await
        .context("Failed to open state store")?;
    let os: Arc<dyn OsUtil> = if config.dry_run {
        Arc::new(DryRunOsUtil::new())
    } else {
        Arc::new(LinuxOsUtil::new())
    };

    let root = CancellationToken::new();
    let orchestrator = Orchestrator::new(ClusterState::new(store), os, metrics.clone())
        .with_rotation_threshold_days(config.certs.rotation_threshold_days)
        .with_cancellation(root.child_token());
    let registry = ReconcilerRegistry::new(root.child_token(), metrics);
    let service = AgentService::new(orchestrator, registry, Arc::new(KubeClientFactory::new()))
        .with_status_config(config.status_reconciler())
        .with_certs_interval(config.certs_interval());

    if let Some(phase) = service.start().await.context("Startup recovery failed")? {
        warn!(phase = %phase, "Recovered from interrupted operation");
    }
    let reconcilers = service.reconciler_statuses().await;
    info!(count = reconcilers.len(), "Reconcilers running");

    let mut state = ApiState::new(service.clone());
    if let Some(registry) = metrics_registry {
        state = state.with_metrics(registry);
    }
    let addr = config.listen_addr()?;
    let shutdown = root.clone();
    let server = ApiServer::new(ApiServerConfig::with_addr(addr), state)
        .serve_with_shutdown(async move { shutdown.cancelled().await });

    let signal_root = root.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down...");
                signal_root.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for ctrl+c"),
        }
    });

    server.await.context("API server failed")?;
    service.shutdown().await;
    info!("Cluster agent stopped");
    Ok(())
}
