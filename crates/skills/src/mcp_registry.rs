//! Process-wide registry of tool server tools.
//!
//! Built once at startup by introspecting every configured server. A server
//! that cannot be reached or listed is logged and skipped so one bad entry
//! never keeps the bridge from starting.

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use codemode_core::{
    config::McpServerConfig, sanitize_identifier, Error, McpClient, McpConnector,
    McpToolDefinition, OutputSchema, Result, ToolDefinition, ToolGroup, ToolMeta,
    CONNECTION_NAMESPACE_PREFIX, EXTERNAL_LOCAL_NAME,
};

/// A connected server and the tools it advertised.
struct ServerEntry {
    client: Arc<dyn McpClient>,
    tools: Vec<McpToolDefinition>,
}

/// Registry of tool server tools, keyed by `<server>.<tool>`.
pub struct McpRegistry {
    servers: DashMap<String, ServerEntry>,
    tools: DashMap<String, McpToolDefinition>,
}

impl McpRegistry {
    /// A registry with no servers.
    pub fn empty() -> Self {
        Self {
            servers: DashMap::new(),
            tools: DashMap::new(),
        }
    }

    /// Connect to and introspect every configured server.
    pub async fn create(configs: &[McpServerConfig], connector: &dyn McpConnector) -> Self {
        let registry = Self::empty();

        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for config in configs {
            if let Err(e) = check_server_name(&config.name, &mut seen) {
                tracing::warn!(server = %config.name, error = %e, "Skipping tool server");
                continue;
            }
            accepted.push(config);
        }

        let introspected = join_all(
            accepted
                .iter()
                .map(|config| introspect(config, connector)),
        )
        .await;

        for (config, outcome) in accepted.into_iter().zip(introspected) {
            match outcome {
                Ok(entry) => {
                    tracing::info!(
                        server = %config.name,
                        transport = config.transport.kind(),
                        tools = entry.tools.len(),
                        "Registered tool server"
                    );
                    for tool in &entry.tools {
                        registry
                            .tools
                            .insert(tool.meta.reference_name.clone(), tool.clone());
                    }
                    registry.servers.insert(config.name.clone(), entry);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %config.name,
                        error = %e,
                        "Tool server unavailable, continuing without it"
                    );
                }
            }
        }

        registry
    }

    /// Look up a tool by reference name.
    pub fn get(&self, reference_name: &str) -> Option<McpToolDefinition> {
        self.tools
            .get(reference_name)
            .map(|entry| entry.value().clone())
    }

    /// Look up a tool, tagged for dispatch.
    pub fn lookup(&self, reference_name: &str) -> Option<ToolDefinition> {
        self.get(reference_name).map(ToolDefinition::Mcp)
    }

    /// Registered server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Tools grouped by server, sorted by server name.
    ///
    /// `servers` keeps only the named servers. `tools` keeps only tools whose
    /// raw or reference name is listed; groups left empty by it are dropped.
    pub fn groups(&self, servers: Option<&[String]>, tools: Option<&[String]>) -> Vec<ToolGroup> {
        self.server_names()
            .into_iter()
            .filter(|name| servers.map_or(true, |wanted| wanted.contains(name)))
            .filter_map(|name| {
                let entry = self.servers.get(&name)?;
                let metas: Vec<ToolMeta> = entry
                    .tools
                    .iter()
                    .filter(|tool| {
                        tools.map_or(true, |wanted| {
                            wanted.contains(&tool.meta.name)
                                || wanted.contains(&tool.meta.reference_name)
                        })
                    })
                    .map(|tool| tool.meta.clone())
                    .collect();
                if tools.is_some() && metas.is_empty() {
                    return None;
                }
                Some(ToolGroup::new(&name, &name, metas))
            })
            .collect()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Close every client and forget all servers.
    pub async fn shutdown(&self) {
        let names = self.server_names();
        for name in names {
            let Some((_, entry)) = self.servers.remove(&name) else {
                continue;
            };
            if let Err(e) = entry.client.close().await {
                tracing::warn!(server = %name, error = %e, "Error closing tool server");
            }
        }
        self.tools.clear();
        tracing::info!("Tool server registry shut down");
    }
}

impl Default for McpRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

/// Reject names that would collide in the sandbox's proxy namespace.
fn check_server_name(name: &str, seen: &mut HashSet<String>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::config("server name is empty"));
    }
    let local = sanitize_identifier(name);
    if local == EXTERNAL_LOCAL_NAME {
        return Err(Error::config(format!(
            "server name '{}' is reserved for connection tools",
            name
        )));
    }
    if name.starts_with(CONNECTION_NAMESPACE_PREFIX) {
        return Err(Error::config(format!(
            "server name '{}' uses the connection namespace prefix",
            name
        )));
    }
    if !seen.insert(local) {
        return Err(Error::config(format!(
            "server name '{}' duplicates an earlier server",
            name
        )));
    }
    Ok(())
}

async fn introspect(config: &McpServerConfig, connector: &dyn McpConnector) -> Result<ServerEntry> {
    let client = connector.connect(config).await?;

    let listed = match client.list_tools().await {
        Ok(listed) => listed,
        Err(e) => {
            let _ = client.close().await;
            return Err(e);
        }
    };

    let mut tools = Vec::with_capacity(listed.len());
    for info in listed {
        let meta = match ToolMeta::build(
            &config.name,
            &info.name,
            info.description,
            Some(info.input_schema),
            OutputSchema::from(info.output_schema),
        ) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(
                    server = %config.name,
                    tool = %info.name,
                    error = %e,
                    "Skipping tool with unusable schema"
                );
                continue;
            }
        };
        tools.push(McpToolDefinition {
            meta,
            server: config.name.clone(),
            transport: config.transport.clone(),
            client: client.clone(),
        });
    }

    Ok(ServerEntry { client, tools })
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_core::config::McpTransportConfig;
    use codemode_core::mocks::{MockMcpClient, MockMcpConnector};
    use codemode_core::McpToolInfo;
    use serde_json::json;

    fn server(name: &str) -> McpServerConfig {
        McpServerConfig {
            name: name.to_string(),
            transport: McpTransportConfig::Http {
                url: format!("http://localhost/{}", name),
                headers: Default::default(),
            },
        }
    }

    fn tool(name: &str) -> McpToolInfo {
        serde_json::from_value(json!({
            "name": name,
            "description": format!("{} tool", name),
            "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_registers_reference_names() {
        let client = Arc::new(MockMcpClient::new(vec![tool("run"), tool("stop")]));
        let connector = MockMcpConnector::new().with_server("search", client);

        let registry = McpRegistry::create(&[server("search")], &connector).await;

        assert_eq!(registry.tool_count(), 2);
        let def = registry.get("search.run").unwrap();
        assert_eq!(def.server, "search");
        assert_eq!(def.meta.name, "run");
        assert!(registry.lookup("search.missing").is_none());
    }

    #[tokio::test]
    async fn test_failing_server_is_skipped() {
        let good = Arc::new(MockMcpClient::new(vec![tool("run")]));
        let connector = MockMcpConnector::new()
            .with_server("good", good)
            .with_failing_server("bad");

        let registry = McpRegistry::create(&[server("bad"), server("good")], &connector).await;

        assert_eq!(registry.server_names(), vec!["good".to_string()]);
        assert_eq!(registry.tool_count(), 1);
    }

    #[tokio::test]
    async fn test_reserved_and_duplicate_names_rejected() {
        let client = Arc::new(MockMcpClient::new(vec![tool("run")]));
        let connector = MockMcpConnector::new()
            .with_server("main", client.clone())
            .with_server("web", client);

        let registry = McpRegistry::create(
            &[server("main"), server("web"), server("web"), server("client_1")],
            &connector,
        )
        .await;

        assert_eq!(registry.server_names(), vec!["web".to_string()]);
    }

    #[tokio::test]
    async fn test_groups_filtering() {
        let a = Arc::new(MockMcpClient::new(vec![tool("run"), tool("stop")]));
        let b = Arc::new(MockMcpClient::new(vec![tool("fetch")]));
        let connector = MockMcpConnector::new()
            .with_server("search", a)
            .with_server("web", b);
        let registry = McpRegistry::create(&[server("web"), server("search")], &connector).await;

        let all = registry.groups(None, None);
        let names: Vec<_> = all.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["search", "web"]);

        let only_web = registry.groups(Some(&["web".to_string()]), None);
        assert_eq!(only_web.len(), 1);
        assert_eq!(only_web[0].tools[0].reference_name, "web.fetch");

        let only_run = registry.groups(None, Some(&["run".to_string()]));
        assert_eq!(only_run.len(), 1);
        assert_eq!(only_run[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let client = Arc::new(MockMcpClient::new(vec![tool("run")]));
        let connector = MockMcpConnector::new().with_server("search", client.clone());
        let registry = McpRegistry::create(&[server("search")], &connector).await;

        registry.shutdown().await;

        assert!(client.is_closed());
        assert!(registry.is_empty());
        assert_eq!(registry.tool_count(), 0);
    }
}
