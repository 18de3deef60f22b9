//! Axum-based HTTP server for the gateway.

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use codemode_core::config::ServerConfig;
use codemode_core::{Error, Result};
use codemode_remote::RemoteDispatcher;
use codemode_sandbox::SandboxPool;

use crate::handlers;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Enable CORS.
    pub enable_cors: bool,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            ..Default::default()
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub pool: Arc<SandboxPool>,
    /// Present only when remote hosts are configured.
    pub remote: Option<Arc<RemoteDispatcher>>,
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    pool: Arc<SandboxPool>,
    remote: Option<Arc<RemoteDispatcher>>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig, pool: Arc<SandboxPool>) -> Self {
        Self {
            config,
            pool,
            remote: None,
            metrics_handle: None,
        }
    }

    /// Enable `/v1/run`.
    pub fn with_remote(mut self, remote: Arc<RemoteDispatcher>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            pool: self.pool.clone(),
            remote: self.remote.clone(),
        });

        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .route("/v1/pool", get(handlers::pool_stats))
            .route("/v1/execute", post(handlers::execute))
            .route("/v1/files/read", post(handlers::read_file))
            .route("/v1/files/write", post(handlers::write_file))
            .route("/v1/files/list", post(handlers::list_files))
            .route("/v1/run", post(handlers::run_remote))
            .route_layer(middleware::from_fn(track_metrics))
            .with_state(state);

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

/// Record count and latency of every routed request.
async fn track_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;
    codemode_governance::track_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

