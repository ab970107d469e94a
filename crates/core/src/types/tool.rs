use jsonschema::JSONSchema;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::McpTransportConfig;
use crate::error::{Error, Result};
use crate::traits::McpClient;

// =============================================================================
// Identifiers
// =============================================================================

/// Prefix of every connection namespace; tool servers may not use it.
pub const CONNECTION_NAMESPACE_PREFIX: &str = "client_";

/// Opaque identifier of a duplex connection.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Namespace under which this connection's tools are addressed.
    pub fn namespace(&self) -> String {
        let compact: String = self.0.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        format!("{}{}", CONNECTION_NAMESPACE_PREFIX, compact)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Build the globally unique `namespace.toolName` reference.
pub fn reference_name(namespace: &str, tool_name: &str) -> String {
    format!("{}.{}", namespace, tool_name)
}

/// Turn an arbitrary tool or server name into a valid TypeScript identifier.
pub fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

// =============================================================================
// Schemas
// =============================================================================

/// Schema used when a descriptor omits `inputSchema`.
pub fn permissive_object_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": true
    })
}

/// Declared output of a tool.
///
/// Absent and explicit `null` mean different things in signatures, so the
/// field keeps all three states.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OutputSchema {
    /// The descriptor had no `outputSchema` key.
    #[default]
    Unspecified,
    /// `outputSchema: null`.
    Null,
    /// A JSON Schema.
    Schema(Value),
}

impl OutputSchema {
    pub fn is_unspecified(&self) -> bool {
        matches!(self, Self::Unspecified)
    }
}

impl From<Option<Value>> for OutputSchema {
    fn from(value: Option<Value>) -> Self {
        match value {
            None => Self::Unspecified,
            Some(Value::Null) => Self::Null,
            Some(schema) => Self::Schema(schema),
        }
    }
}

impl Serialize for OutputSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Schema(schema) => schema.serialize(serializer),
            Self::Unspecified | Self::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for OutputSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Only reached when the key is present; absence goes through `default`.
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Null => Self::Null,
            schema => Self::Schema(schema),
        })
    }
}

/// Compiled validator over a tool's input schema.
#[derive(Clone)]
pub struct SchemaGuard {
    compiled: Arc<JSONSchema>,
}

impl SchemaGuard {
    /// Compile a schema; a malformed schema is a `Schema` error.
    pub fn compile(schema: &Value) -> Result<Self> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| Error::schema(format!("Invalid input schema: {}", e)))?;
        Ok(Self {
            compiled: Arc::new(compiled),
        })
    }

    /// Check arguments against the schema.
    pub fn check(&self, args: &Value) -> Result<()> {
        if let Err(errors) = self.compiled.validate(args) {
            let details: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            return Err(Error::validation(details.join("; ")));
        }
        Ok(())
    }

    pub fn accepts(&self, args: &Value) -> bool {
        self.compiled.is_valid(args)
    }
}

impl std::fmt::Debug for SchemaGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaGuard").finish_non_exhaustive()
    }
}

// =============================================================================
// Tool Types
// =============================================================================

/// A tool as advertised by a remote client in `register_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "OutputSchema::is_unspecified")]
    pub output_schema: OutputSchema,
}

/// Fields shared by every tool regardless of origin.
#[derive(Debug, Clone)]
pub struct ToolMeta {
    /// Globally unique `namespace.toolName`.
    pub reference_name: String,
    /// Name the owner knows the tool by.
    pub name: String,
    /// `name` as a valid TypeScript identifier.
    pub identifier: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: OutputSchema,
    pub guard: SchemaGuard,
}

impl ToolMeta {
    /// Build metadata under `namespace`, compiling the input guard.
    pub fn build(
        namespace: &str,
        name: &str,
        description: Option<String>,
        input_schema: Option<Value>,
        output_schema: OutputSchema,
    ) -> Result<Self> {
        let input_schema = match input_schema {
            Some(Value::Null) | None => permissive_object_schema(),
            Some(schema) => schema,
        };
        let guard = SchemaGuard::compile(&input_schema)?;
        Ok(Self {
            reference_name: reference_name(namespace, name),
            name: name.to_string(),
            identifier: sanitize_identifier(name),
            description: description.unwrap_or_default(),
            input_schema,
            output_schema,
            guard,
        })
    }
}

/// Tool served by a configured tool server.
#[derive(Clone)]
pub struct McpToolDefinition {
    pub meta: ToolMeta,
    pub server: String,
    pub transport: McpTransportConfig,
    pub client: Arc<dyn McpClient>,
}

impl std::fmt::Debug for McpToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolDefinition")
            .field("meta", &self.meta)
            .field("server", &self.server)
            .field("transport", &self.transport.kind())
            .finish()
    }
}

/// Tool registered by a duplex connection and executed on its side.
#[derive(Debug, Clone)]
pub struct ExternalToolDefinition {
    pub meta: ToolMeta,
    pub connection_id: ConnectionId,
    pub namespace: String,
}

/// Where a call to a tool is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOrigin {
    Mcp,
    External,
}

impl ToolOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::External => "external",
        }
    }
}

/// Tool definition, tagged by origin.
#[derive(Debug, Clone)]
pub enum ToolDefinition {
    Mcp(McpToolDefinition),
    External(ExternalToolDefinition),
}

impl ToolDefinition {
    pub fn meta(&self) -> &ToolMeta {
        match self {
            Self::Mcp(def) => &def.meta,
            Self::External(def) => &def.meta,
        }
    }

    pub fn reference_name(&self) -> &str {
        &self.meta().reference_name
    }

    pub fn origin(&self) -> ToolOrigin {
        match self {
            Self::Mcp(_) => ToolOrigin::Mcp,
            Self::External(_) => ToolOrigin::External,
        }
    }
}

/// Local name under which a connection sees its own registered tools.
pub const EXTERNAL_LOCAL_NAME: &str = "main";

/// Tools sharing one proxy object inside the sandbox.
#[derive(Debug, Clone)]
pub struct ToolGroup {
    /// Server name, or `main` for a connection's own tools.
    pub name: String,
    /// `name` as a valid TypeScript identifier.
    pub local_name: String,
    /// Prefix of every reference name in the group.
    pub namespace: String,
    pub tools: Vec<ToolMeta>,
}

impl ToolGroup {
    pub fn new(name: &str, namespace: &str, tools: Vec<ToolMeta>) -> Self {
        Self {
            name: name.to_string(),
            local_name: sanitize_identifier(name),
            namespace: namespace.to_string(),
            tools,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// =============================================================================
// Call Results
// =============================================================================

/// Uniform result of `callTool`, as seen from inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<Value>> for CallToolResult {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}
