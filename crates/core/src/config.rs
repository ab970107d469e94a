//! Layered application configuration.
//!
//! Sources, lowest to highest priority: built-in defaults, `config/default`,
//! `config/{CODEMODE_ENV}`, `config/local`, then `CODEMODE__SECTION__KEY`
//! environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rpc: RpcConfig,
    pub sandbox: SandboxSettings,
    pub bridge: BridgeConfig,
    /// Tool servers introspected once at bootstrap.
    pub mcp_servers: Vec<McpServerConfig>,
    /// Optional JSON file holding additional tool server entries.
    pub mcp_config_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub enable_tracing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9733,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

/// Loopback JSON-RPC endpoint reached from inside the sandbox.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RpcConfig {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxSettings {
    pub deno_path: String,
    pub timeout_ms: u64,
    /// Environment variables copied from the host into the subprocess.
    pub pass_env: Vec<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            deno_path: "deno".into(),
            timeout_ms: 30_000,
            pass_env: vec!["PATH".into(), "HOME".into(), "DENO_DIR".into()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    /// Per-call timeout for callback round trips.
    pub call_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
        }
    }
}

/// A configured tool server.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransportConfig,
}

/// How to reach a tool server.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransportConfig {
    /// Spawn a subprocess and speak newline-delimited JSON-RPC on stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    /// Streamable HTTP: one POST per request.
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Legacy SSE: an event stream plus a POST endpoint announced over it.
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl McpTransportConfig {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Sse { .. } => "sse",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum McpServerFile {
    List(Vec<McpServerConfig>),
    Wrapped { servers: Vec<McpServerConfig> },
}

impl AppConfig {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("CODEMODE_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map CODEMODE__SERVER__PORT=9733 to server.port
            .add_source(Environment::with_prefix("CODEMODE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// All tool servers: inline entries followed by those in `mcp_config_path`.
    pub fn all_mcp_servers(&self) -> Result<Vec<McpServerConfig>> {
        let mut servers = self.mcp_servers.clone();
        if let Some(path) = &self.mcp_config_path {
            servers.extend(load_mcp_servers(Path::new(path))?);
        }
        Ok(servers)
    }
}

/// Read tool server entries from a JSON file, either a bare list or
/// `{"servers": [...]}`.
pub fn load_mcp_servers(path: &Path) -> Result<Vec<McpServerConfig>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
    parse_mcp_servers(&raw)
}

pub fn parse_mcp_servers(raw: &str) -> Result<Vec<McpServerConfig>> {
    let parsed: McpServerFile = serde_json::from_str(raw)
        .map_err(|e| Error::config(format!("Invalid tool server config: {}", e)))?;
    Ok(match parsed {
        McpServerFile::List(servers) => servers,
        McpServerFile::Wrapped { servers } => servers,
    })
}
