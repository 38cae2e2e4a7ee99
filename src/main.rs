//! `agentvisor` gateway: runs agent turns over HTTP

use std::sync::Arc;

use agentvisor::agent::AgentController;
use agentvisor::config::{GatewayConfig, LlmProvider};
use agentvisor::gateway::{create_router, Gateway};
use agentvisor::llm::{AnthropicConfig, AnthropicModel, ChatModel, OllamaConfig, OllamaModel};
use agentvisor::memory::MemoryStore;
use agentvisor::security::RateLimiter;
use agentvisor::tools::code::CodeExecutionTool;
use agentvisor::tools::weather::WeatherTool;
use agentvisor::tools::ToolCatalog;
use agentvisor::tracing::{init_tracing, shutdown_tracing};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration
    let config = GatewayConfig::from_env(|key| std::env::var(key).ok())?;

    // 2. Logging / tracing
    if let Err(e) = init_tracing("agentvisor", config.otlp_endpoint.as_deref(), config.json_logs) {
        eprintln!("[WARN] Tracing setup failed: {}", e);
    }

    // 3. Model
    let model: Arc<dyn ChatModel> = match &config.provider {
        LlmProvider::Anthropic { api_key, base_url } => {
            let mut anthropic = AnthropicConfig::new(api_key.clone());
            anthropic.base_url = base_url.clone();
            anthropic.model = config.model.clone();
            Arc::new(AnthropicModel::new(anthropic)?)
        }
        LlmProvider::Ollama { base_url } => Arc::new(OllamaModel::new(OllamaConfig {
            base_url: base_url.clone(),
            model: config.model.clone(),
            ..OllamaConfig::default()
        })?),
    };

    // 4. Tools
    if config.weather_api_key.is_none() {
        warn!("WEATHER_API_KEY is not set; the weather tool will report failures");
    }
    if config.executor_url.is_none() {
        warn!("EXECUTOR_URL is not set; the code tool will report failures");
    }
    let tools = ToolCatalog::new()
        .register(WeatherTool::new(
            config.weather_api_key.clone(),
            config.weather_api_url.clone(),
        ))
        .register(CodeExecutionTool::new(config.executor_url.clone()));

    // 5. Agent + gateway
    let memory = Arc::new(MemoryStore::new(config.memory.clone()));
    let agent = Arc::new(AgentController::new(model, tools, memory, config.agent.clone()));
    let limiter = RateLimiter::new(config.rate_limit_burst, config.rate_limit_per_sec);
    let gateway = Arc::new(Gateway::new(agent, limiter, config.development));
    let app = create_router(gateway, config.allowed_origins.cors_layer());

    // 6. Serve
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        port = config.port,
        model = %config.model,
        development = config.development,
        "Gateway listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
