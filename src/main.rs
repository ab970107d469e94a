#![deny(unused)]
//! open-codemode: lets LLM-written TypeScript call tool server tools and
//! client-registered tools from inside a locked-down Deno sandbox.

use std::sync::Arc;

use codemode_core::config::AppConfig;
use codemode_gateway::{CodeModeHost, GatewayConfig, GatewayServer};
use codemode_sandbox::{DenoSandbox, SandboxConfig, SandboxEngine};
use codemode_skills::{DefaultMcpConnector, McpRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    codemode_gateway::configure_tracing()?;

    tracing::info!("Starting open-codemode v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;

    // =========================================================================
    // Observability
    // =========================================================================
    let metrics_handle = codemode_gateway::setup_metrics_recorder()?;

    // =========================================================================
    // Tool servers
    // =========================================================================
    let servers = config.all_mcp_servers()?;
    let connector = DefaultMcpConnector::default();
    let mcp = Arc::new(McpRegistry::create(&servers, &connector).await);
    tracing::info!(
        configured = servers.len(),
        connected = mcp.server_count(),
        tools = mcp.tool_count(),
        "Tool server registry initialized"
    );

    // =========================================================================
    // Sandbox
    // =========================================================================
    let sandbox = Arc::new(DenoSandbox::new(SandboxConfig::from(&config.sandbox)));
    if !sandbox.is_available().await {
        tracing::warn!(
            deno_path = %config.sandbox.deno_path,
            "Deno not found; executions will fail until it is installed"
        );
    }

    // =========================================================================
    // Bridge + gateway
    // =========================================================================
    let host = CodeModeHost::start(mcp, sandbox, &config.rpc, &config.bridge).await?;

    let gateway_config = GatewayConfig::from(&config.server);
    tracing::info!(
        host = %gateway_config.host,
        port = gateway_config.port,
        rpc = %host.rpc_addr(),
        "Gateway initialized"
    );

    GatewayServer::new(gateway_config, &host)
        .with_metrics(metrics_handle)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    host.shutdown().await;
    Ok(())
}
