//! API route definitions.

use std::future::Future;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::ApiState;

/// Build the API router with all routes.
pub fn build_router(state: ApiState) -> Router {
    let api_v1alpha1 = Router::new()
        .route(
            "/cluster",
            get(handlers::get_cluster)
                .post(handlers::create_cluster)
                .put(handlers::upgrade_cluster)
                .patch(handlers::patch_cluster)
                .delete(handlers::delete_cluster),
        )
        .route("/kubeconfig", get(handlers::get_kubeconfig))
        .route("/certs", get(handlers::get_certs).delete(handlers::reset_certs))
        .route("/audit", get(handlers::get_audit_history))
        .route("/reconcilers", get(handlers::get_reconcilers));

    let mut router = Router::new()
        .nest("/api/v1alpha1", api_v1alpha1)
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state);

    // Add CORS support
    router = router.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // Add request tracing
    router = router.layer(TraceLayer::new_for_http());

    router
}

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind the server to.
    pub bind_addr: std::net::SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::net::SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ApiServerConfig {
    /// Create config with specific port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: std::net::SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }

    pub fn with_addr(bind_addr: std::net::SocketAddr) -> Self {
        Self { bind_addr }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: ApiState,
}

impl ApiServer {
    /// Create a new API server.
    pub fn new(config: ApiServerConfig, state: ApiState) -> Self {
        Self { config, state }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!(
            addr = %self.config.bind_addr,
            "Starting API server"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }

    /// Start the server (blocking).
    pub async fn serve(self) -> Result<(), std::io::Error> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<(), std::io::Error>> {
        tokio::spawn(async move { self.serve().await })
    }
}
