use std::collections::HashMap;
use std::sync::Arc;

use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{session::local::LocalSessionManager, StreamableHttpService};
use rmcp::ServiceExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod error;
mod llm_client;
mod mcp;
mod routes;
mod state;
mod tool_handlers;

use config::ServerConfig;
use llm_client::ReqwestLlmClient;
use mcp::McpServer;
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(vault_base_dir = %config.vault_base_dir.display(), "starting vault-server");

    std::fs::create_dir_all(&config.vault_base_dir)?;
    if let Some(parent) = config.index_db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = Arc::new(vault_store::VaultStore::new(config.vault_base_dir.clone()));
    let index = Arc::new(vault_index::IndexDb::open(&config.index_db_path)?);
    let auth = Arc::new(auth::AuthService::new(auth::Config::from_env()));
    let llm: Arc<dyn oracle::LlmClient> = Arc::new(ReqwestLlmClient::new(
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
        config.llm_default_model.clone(),
    ));

    let (tools, librarian) = tool_handlers::build_registries(store.clone(), index.clone(), llm.clone());
    let oracle = Arc::new(oracle::Oracle::new(llm, tools.clone()));

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        index,
        auth,
        tools,
        oracle,
        librarian,
        in_flight: Arc::new(AsyncMutex::new(HashMap::new())),
    };

    if std::env::var("MCP_STDIO").as_deref() == Ok("1") {
        return run_stdio(state).await;
    }

    let http_router = routes::router(state.clone());

    let mcp_service = StreamableHttpService::new(
        {
            let state = state.clone();
            move || Ok(McpServer::new(state.clone()))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let router = http_router.nest_service("/mcp", mcp_service);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "vault-server listening (HTTP + MCP at /mcp)");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// stdio MCP transport for local clients (Claude Desktop, etc.) that spawn
/// the server as a subprocess rather than connecting over HTTP. One process,
/// one tenant-agnostic server — tenant identity still travels per tool call.
async fn run_stdio(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let server = McpServer::new(state);
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("mcp stdio serve error: {e}");
    })?;
    service.waiting().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
