//! Wiring of registries, bridge, RPC server and executor.

use std::sync::Arc;
use std::time::Duration;

use codemode_core::{
    config::{BridgeConfig, RpcConfig},
    Result,
};
use codemode_sandbox::SandboxEngine;
use codemode_skills::{ExternalToolRegistry, McpRegistry};

use crate::bridge::ToolBridge;
use crate::connection::{ConnectionManager, ConnectionTable};
use crate::execution::CodeExecutor;
use crate::rpc::RpcServer;

/// Everything a running bridge owns.
pub struct CodeModeHost {
    pub mcp: Arc<McpRegistry>,
    pub external: Arc<ExternalToolRegistry>,
    pub connections: Arc<ConnectionTable>,
    pub bridge: Arc<ToolBridge>,
    pub executor: Arc<CodeExecutor>,
    pub manager: Arc<ConnectionManager>,
    rpc: RpcServer,
}

impl CodeModeHost {
    /// Bind the RPC server and assemble the components around it.
    pub async fn start(
        mcp: Arc<McpRegistry>,
        sandbox: Arc<dyn SandboxEngine>,
        rpc: &RpcConfig,
        bridge: &BridgeConfig,
    ) -> Result<Self> {
        let external = Arc::new(ExternalToolRegistry::new());
        let connections = Arc::new(ConnectionTable::new());
        let tool_bridge = Arc::new(ToolBridge::new(
            mcp.clone(),
            external.clone(),
            connections.clone(),
            Duration::from_millis(bridge.call_timeout_ms),
        ));

        let rpc = RpcServer::bind(rpc, tool_bridge.clone()).await?;
        let executor = Arc::new(CodeExecutor::new(
            sandbox,
            mcp.clone(),
            external.clone(),
            rpc.addr(),
        ));
        let manager = Arc::new(ConnectionManager::new(
            connections.clone(),
            external.clone(),
            mcp.clone(),
            tool_bridge.clone(),
            executor.clone(),
        ));

        Ok(Self {
            mcp,
            external,
            connections,
            bridge: tool_bridge,
            executor,
            manager,
            rpc,
        })
    }

    pub fn rpc_addr(&self) -> std::net::SocketAddr {
        self.rpc.addr()
    }

    /// Stop the RPC server and close every tool server session.
    pub async fn shutdown(&self) {
        self.rpc.shutdown();
        self.mcp.shutdown().await;
    }
}
