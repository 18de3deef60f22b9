#![deny(unused)]
//! Codemode - sandboxed code execution service
//!
//! Keeps a pool of isolated Docker containers warm and serves code execution,
//! workspace file access and remote command dispatch over HTTP.

use std::sync::Arc;

use codemode_core::config::AppConfig;
use codemode_gateway::{GatewayConfig, GatewayServer};
use codemode_remote::RemoteDispatcher;
use codemode_sandbox::{output_budget, DockerSandbox, PoolConfig, SandboxEngine, SandboxPool};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration is validated before anything else starts
    let config = AppConfig::load()?;

    // Initialize tracing
    codemode_governance::configure_tracing(&config.telemetry)?;

    tracing::info!("Starting Codemode v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Initialize Observability
    // =========================================================================
    let metrics_handle = codemode_governance::setup_metrics_recorder()?;

    // =========================================================================
    // Initialize Sandbox Pool
    // =========================================================================
    let engine = Arc::new(
        DockerSandbox::new()?.with_output_limit(output_budget(config.pool.max_output_chars)),
    );
    if !engine.is_available().await {
        anyhow::bail!("Docker daemon not reachable");
    }
    engine
        .ensure_image(&config.sandbox.image, config.sandbox.pull_image)
        .await?;

    let pool_config = PoolConfig::from_app(&config)?;
    tracing::info!(
        size = pool_config.size,
        image = %pool_config.environment.image,
        instance = engine.instance(),
        "🐳 Starting sandbox pool"
    );
    let pool = Arc::new(SandboxPool::new(engine, pool_config));
    pool.start().await?;

    // =========================================================================
    // Initialize Remote Dispatch
    // =========================================================================
    let remote = RemoteDispatcher::from_settings(&config.remote).map(Arc::new);
    match &remote {
        Some(d) => tracing::info!(hosts = d.host_count(), "Remote dispatch enabled"),
        None => tracing::info!("No remote hosts configured - /v1/run disabled"),
    }

    // =========================================================================
    // Start Gateway
    // =========================================================================
    let mut server = GatewayServer::new(GatewayConfig::from(&config.server), pool.clone())
        .with_metrics(metrics_handle);
    if let Some(remote) = remote {
        server = server.with_remote(remote);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let served = server
        .run(shutdown.clone().cancelled_owned())
        .await;

    // Tear down even when serving failed
    pool.shutdown().await;
    codemode_governance::shutdown_tracing();
    served?;

    tracing::info!("Codemode stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn wait_for_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
    token.cancel();
}
