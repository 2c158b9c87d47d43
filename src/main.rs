use std::sync::Arc;

use clap::Parser;

use antwort::backend::{Capabilities, OpenAiCompatibleAdapter};
use antwort::routers::{build_router, AppState};
use antwort::{Config, Engine, InFlightRegistry, InMemoryResponseStore};
use antwort_tools::{McpExecutor, ToolExecutorRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    antwort::observability::init_tracing();

    let config = Config::parse();
    antwort::observability::init_metrics(config.metrics_port)?;

    let capabilities = Capabilities {
        streaming: true,
        tool_calling: true,
        vision: false,
        audio: false,
        reasoning: true,
        max_context_window: 128_000,
    };
    let backend = Arc::new(OpenAiCompatibleAdapter::new(
        config.backend_url.clone(),
        config.backend_api_key.clone(),
        capabilities,
    ));

    let mut tools = ToolExecutorRegistry::new();
    if let Some(mcp_url) = &config.mcp_url {
        tools.register(Arc::new(McpExecutor::new(
            "default",
            mcp_url.clone(),
            config.mcp_tools.iter().cloned(),
        )));
    }

    let store = InMemoryResponseStore::new();
    let in_flight = InFlightRegistry::new();

    let engine = Arc::new(Engine::new(
        backend,
        Arc::new(tools),
        store,
        in_flight,
        config.model_remap(),
        config.max_rounds,
    ));

    let app = build_router(AppState { engine });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "antwort listening");
    axum::serve(listener, app).await?;

    Ok(())
}
