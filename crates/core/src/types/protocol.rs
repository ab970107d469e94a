use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool::ToolDescriptor;
use crate::error::{Error, Result};

// =============================================================================
// Duplex Protocol Messages
// =============================================================================

/// Message received from a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Advertise tools the client executes locally.
    RegisterTools { tools: Vec<ToolDescriptor> },

    /// Ask for TypeScript declarations of callable tools.
    #[serde(rename_all = "camelCase")]
    GetSignatures {
        #[serde(default)]
        server_names: Option<Vec<String>>,
        #[serde(default)]
        tool_names: Option<Vec<String>>,
    },

    /// Run a snippet in the sandbox.
    #[serde(rename_all = "camelCase")]
    ExecuteCode {
        execution_id: String,
        code: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Answer to a previously sent `tool_call`.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        call_id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

const INBOUND_TYPES: &[&str] = &["register_tools", "get_signatures", "execute_code", "tool_result"];

impl InboundMessage {
    /// Parse a text frame, distinguishing malformed JSON, unknown types and
    /// bad payloads.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("Invalid JSON: {}", e)))?;

        let msg_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("Message is missing a 'type' field"))?;

        if !INBOUND_TYPES.contains(&msg_type) {
            return Err(Error::protocol(format!("Unknown message type: {}", msg_type)));
        }

        let msg_type = msg_type.to_string();
        serde_json::from_value(value)
            .map_err(|e| Error::protocol(format!("Invalid '{}' message: {}", msg_type, e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterTools { .. } => "register_tools",
            Self::GetSignatures { .. } => "get_signatures",
            Self::ExecuteCode { .. } => "execute_code",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// Message sent to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    Signatures { content: String },

    /// Callback request: execute `tool_name` locally and answer with `tool_result`.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        call_id: String,
        tool_name: String,
        args: Value,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionResult {
        execution_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Error { message: String },
}

impl OutboundMessage {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
