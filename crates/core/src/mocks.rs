//! Mock implementations of core traits for testing.
//!
//! Shared by unit and integration tests across the workspace so tool server
//! behaviour can be scripted without spawning real servers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    config::McpServerConfig,
    traits::{McpClient, McpConnector},
    types::{McpCallResult, McpToolInfo},
    Error, Result,
};

// =============================================================================
// Mock Tool Server Client
// =============================================================================

/// Scripted tool server session.
#[derive(Default)]
pub struct MockMcpClient {
    tools: Vec<McpToolInfo>,
    responses: Mutex<HashMap<String, std::result::Result<McpCallResult, String>>>,
    calls: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
}

impl MockMcpClient {
    /// Create a client advertising the given tools.
    pub fn new(tools: Vec<McpToolInfo>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }

    /// Script the response for a tool.
    pub fn with_response(self, tool: &str, response: McpCallResult) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(tool.to_string(), Ok(response));
        self
    }

    /// Script a transport failure for a tool.
    pub fn with_failure(self, tool: &str, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(tool.to_string(), Err(message.to_string()));
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpClient for MockMcpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<McpCallResult> {
        if self.is_closed() {
            return Err(Error::transport("client closed"));
        }
        self.calls.lock().unwrap().push((name.to_string(), args));

        let responses = self.responses.lock().unwrap();
        match responses.get(name) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(Error::transport(message.clone())),
            None => Ok(McpCallResult::default()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Mock Connector
// =============================================================================

/// Connector handing out pre-built mock clients by server name.
#[derive(Default)]
pub struct MockMcpConnector {
    clients: HashMap<String, Arc<MockMcpClient>>,
    failing: HashSet<String>,
}

impl MockMcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `client` for the server called `name`.
    pub fn with_server(mut self, name: &str, client: Arc<MockMcpClient>) -> Self {
        self.clients.insert(name.to_string(), client);
        self
    }

    /// Make connecting to `name` fail.
    pub fn with_failing_server(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

#[async_trait]
impl McpConnector for MockMcpConnector {
    async fn connect(&self, server: &McpServerConfig) -> Result<Arc<dyn McpClient>> {
        if self.failing.contains(&server.name) {
            return Err(Error::transport(format!(
                "connection refused for '{}'",
                server.name
            )));
        }
        self.clients
            .get(&server.name)
            .cloned()
            .map(|client| client as Arc<dyn McpClient>)
            .ok_or_else(|| Error::transport(format!("no mock for server '{}'", server.name)))
    }
}
