//! Loopback JSON-RPC 2.0 endpoint used by sandboxed programs.
//!
//! One method, `callTool`, taking `[toolRef, args]` or `{toolRef, args}`.
//! Tool failures are ordinary results; JSON-RPC errors are reserved for
//! malformed requests.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use codemode_core::{config::RpcConfig, Error, Result};

use crate::bridge::ToolBridge;

pub const CALL_TOOL_METHOD: &str = "callTool";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Router serving `POST /rpc`.
pub fn rpc_router(bridge: Arc<ToolBridge>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .with_state(bridge)
}

/// The RPC server running in the background.
pub struct RpcServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind and start serving. Port `0` picks an ephemeral port; the bound
    /// address is what sandboxes are allowed to reach.
    pub async fn bind(config: &RpcConfig, bridge: Arc<ToolBridge>) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| Error::config(format!("Failed to bind RPC server: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::internal(format!("RPC listener has no address: {}", e)))?;

        let router = rpc_router(bridge);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "RPC server stopped");
            }
        });

        tracing::info!(addr = %addr, "RPC server listening");
        Ok(Self { addr, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn rpc_handler(State(bridge): State<Arc<ToolBridge>>, body: Bytes) -> Response {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return reply(RpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            ))
        }
    };

    let id = request.get("id").cloned();
    let response = dispatch(&bridge, &request, id.clone().unwrap_or(Value::Null)).await;

    // Notifications get no body.
    if id.is_none() && response.error.is_none() {
        return StatusCode::NO_CONTENT.into_response();
    }
    reply(response)
}

async fn dispatch(bridge: &ToolBridge, request: &Value, id: Value) -> RpcResponse {
    let Some(object) = request.as_object() else {
        return RpcResponse::error(id, INVALID_REQUEST, "Request must be an object");
    };
    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return RpcResponse::error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"");
    }
    let Some(method) = object.get("method").and_then(Value::as_str) else {
        return RpcResponse::error(id, INVALID_REQUEST, "method must be a string");
    };
    if method != CALL_TOOL_METHOD {
        return RpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        );
    }

    let (tool_ref, args) = match call_params(object.get("params")) {
        Ok(params) => params,
        Err(message) => return RpcResponse::error(id, INVALID_PARAMS, message),
    };

    let result = bridge.call_tool(&tool_ref, args).await;
    match serde_json::to_value(result) {
        Ok(result) => RpcResponse::result(id, result),
        Err(e) => RpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
    }
}

/// `[toolRef, args?]` or `{toolRef, args?}`; missing args become `{}`.
fn call_params(params: Option<&Value>) -> std::result::Result<(String, Value), String> {
    let (tool_ref, args) = match params {
        Some(Value::Array(items)) => (items.first(), items.get(1)),
        Some(Value::Object(map)) => (map.get("toolRef"), map.get("args")),
        _ => return Err("params must be [toolRef, args] or {toolRef, args}".to_string()),
    };
    let tool_ref = tool_ref
        .and_then(Value::as_str)
        .ok_or_else(|| "toolRef must be a string".to_string())?;
    let args = match args {
        None | Some(Value::Null) => json!({}),
        Some(args) => args.clone(),
    };
    Ok((tool_ref.to_string(), args))
}

fn reply(response: RpcResponse) -> Response {
    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_params_forms() {
        let (tool, args) = call_params(Some(&json!(["search.run", {"q": "x"}]))).unwrap();
        assert_eq!(tool, "search.run");
        assert_eq!(args, json!({"q": "x"}));

        let (tool, args) = call_params(Some(&json!({"toolRef": "main.add"}))).unwrap();
        assert_eq!(tool, "main.add");
        assert_eq!(args, json!({}));

        assert!(call_params(Some(&json!([42]))).is_err());
        assert!(call_params(Some(&json!("search.run"))).is_err());
        assert!(call_params(None).is_err());
    }
}
