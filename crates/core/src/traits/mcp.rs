//! Tool server client traits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::McpServerConfig;
use crate::error::Result;
use crate::types::{McpCallResult, McpToolInfo};

/// A live session with one tool server.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// List the tools the server exposes.
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>>;

    /// Invoke a tool by its raw (server-local) name.
    async fn call_tool(&self, name: &str, args: Value) -> Result<McpCallResult>;

    /// Tear down the session. Further calls fail.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions for configured servers.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, server: &McpServerConfig) -> Result<Arc<dyn McpClient>>;
}
