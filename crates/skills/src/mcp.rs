//! Tool server client backed by `rmcp`.
//!
//! Opens one `rmcp` client session per configured server (child process,
//! streamable HTTP or SSE) and adapts it to [`McpClient`]. Everything above
//! this module only sees the trait.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{
    ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
};
use rmcp::{RoleClient, ServiceExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

use codemode_core::config::{McpServerConfig, McpTransportConfig};
use codemode_core::{Error, McpCallResult, McpClient, McpConnector, McpToolInfo, Result};

type ClientService = RunningService<RoleClient, ()>;

// =============================================================================
// Connector
// =============================================================================

/// Connector for real tool servers.
pub struct DefaultMcpConnector {
    request_timeout: Duration,
}

impl DefaultMcpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    async fn handshake<F, E>(&self, server: &str, init: F) -> Result<ClientService>
    where
        F: Future<Output = std::result::Result<ClientService, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.request_timeout, init).await {
            Ok(Ok(service)) => Ok(service),
            Ok(Err(e)) => Err(Error::transport(format!(
                "{}: initialize failed: {}",
                server, e
            ))),
            Err(_) => Err(Error::transport(format!(
                "{}: initialize timed out after {}ms",
                server,
                self.request_timeout.as_millis()
            ))),
        }
    }
}

impl Default for DefaultMcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl McpConnector for DefaultMcpConnector {
    async fn connect(&self, server: &McpServerConfig) -> Result<Arc<dyn McpClient>> {
        tracing::info!(
            server = %server.name,
            transport = server.transport.kind(),
            "Connecting to tool server"
        );

        let service = match &server.transport {
            McpTransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let command = Command::new(command).configure(|cmd| {
                    cmd.args(args).envs(env);
                    if let Some(dir) = cwd {
                        cmd.current_dir(dir);
                    }
                });
                let transport = TokioChildProcess::new(command).map_err(|e| {
                    Error::transport(format!("{}: failed to spawn server: {}", server.name, e))
                })?;
                self.handshake(&server.name, ().serve(transport)).await?
            }
            McpTransportConfig::Http { url, headers } => {
                let transport = StreamableHttpClientTransport::with_client(
                    http_client(headers)?,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                );
                self.handshake(&server.name, ().serve(transport)).await?
            }
            McpTransportConfig::Sse { url, headers } => {
                let config = SseClientConfig {
                    sse_endpoint: url.as_str().into(),
                    ..Default::default()
                };
                let transport = SseClientTransport::start_with_client(http_client(headers)?, config)
                    .await
                    .map_err(|e| {
                        Error::transport(format!("{}: event stream failed: {}", server.name, e))
                    })?;
                self.handshake(&server.name, ().serve(transport)).await?
            }
        };

        tracing::debug!(server = %server.name, "Tool server initialized");

        Ok(Arc::new(RmcpClient::new(
            &server.name,
            service,
            self.request_timeout,
        )))
    }
}

/// Build a header map from configured string pairs.
pub(crate) fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("invalid value for header '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn http_client(headers: &HashMap<String, String>) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .default_headers(header_map(headers)?)
        .build()
        .map_err(|e| Error::transport(format!("failed to build HTTP client: {}", e)))
}

// =============================================================================
// Client
// =============================================================================

/// [`McpClient`] over a running `rmcp` client session.
pub struct RmcpClient {
    server: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<ClientService>>,
    request_timeout: Duration,
}

impl RmcpClient {
    pub fn new(server: &str, service: ClientService, request_timeout: Duration) -> Self {
        Self {
            server: server.to_string(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            request_timeout,
        }
    }

    async fn bounded<T, E, F>(&self, what: &str, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::transport(format!("{}: {}", self.server, e))),
            Err(_) => Err(Error::transport(format!(
                "{}: {} timed out after {}ms",
                self.server,
                what,
                self.request_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl McpClient for RmcpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let tools = self
            .bounded("tools/list", self.peer.list_all_tools())
            .await?;
        tools.into_iter().map(tool_info).collect()
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<McpCallResult> {
        let params: CallToolRequestParam =
            serde_json::from_value(json!({ "name": name, "arguments": args }))?;
        let result = self.bounded("tools/call", self.peer.call_tool(params)).await?;
        call_result(result)
    }

    async fn close(&self) -> Result<()> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .map(|reason| {
                tracing::debug!(server = %self.server, reason = ?reason, "Tool server session closed");
            })
            .map_err(|e| Error::transport(format!("{}: close failed: {}", self.server, e)))
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Re-read an `rmcp` model value as the bridge's wire type. Both follow the
/// protocol's JSON shape; explicit nulls are dropped so defaults apply.
fn reshape<T, U>(value: &T) -> Result<U>
where
    T: serde::Serialize,
    U: serde::de::DeserializeOwned,
{
    let mut raw = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut raw {
        map.retain(|_, v| !v.is_null());
    }
    Ok(serde_json::from_value(raw)?)
}

fn tool_info(tool: Tool) -> Result<McpToolInfo> {
    reshape(&tool)
}

fn call_result(result: CallToolResult) -> Result<McpCallResult> {
    reshape(&result)
}
