//! `executor`: runs untrusted JavaScript in sandboxed node processes

use std::sync::Arc;

use agentvisor::config::ExecutorConfig;
use agentvisor::sandbox::server::create_router;
use agentvisor::sandbox::Sandbox;
use agentvisor::security::running_as_root;
use agentvisor::tracing::{init_tracing, shutdown_tracing};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration
    let config = ExecutorConfig::from_env(|key| std::env::var(key).ok())?;

    // 2. Logging / tracing
    if let Err(e) = init_tracing("executor", config.otlp_endpoint.as_deref(), config.json_logs) {
        eprintln!("[WARN] Tracing setup failed: {}", e);
    }

    // 3. Sandbox (compiles the seccomp filter, prepares cgroups)
    let sandbox = Arc::new(Sandbox::new(config.sandbox.clone())?);
    if !running_as_root() {
        warn!("Not running as root; capability dropping is skipped");
    }

    // 4. Serve
    let app = create_router(sandbox, config.max_concurrent)
        .layer(config.allowed_origins.cors_layer());
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        port = config.port,
        timeout_ms = config.sandbox.limits.timeout.as_millis() as u64,
        memory_mb = config.sandbox.limits.memory_mb,
        max_concurrent = config.max_concurrent,
        cgroups = config.sandbox.use_cgroups,
        "Executor listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Executor stopped");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
