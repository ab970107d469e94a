//! Tool bridge: the single `callTool` entry point reachable from the sandbox.
//!
//! Calls are routed on the definition's origin tag. Tool server calls go
//! straight to the bound client; connection tools make a round trip across
//! the owning connection and park a [`PendingCall`] until exactly one of a
//! matching `tool_result`, the per-call timeout, or the connection closing
//! settles it.

use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

use codemode_core::{
    CallToolResult, ConnectionId, Error, ExternalToolDefinition, McpCallResult,
    McpToolDefinition, OutboundMessage, Result, ToolDefinition,
};
use codemode_skills::{ExternalToolRegistry, McpRegistry};

use crate::connection::ConnectionTable;
use crate::metrics;

/// A callback round trip waiting for its settlement.
struct PendingCall {
    connection_id: ConnectionId,
    tool_name: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// Drops a call's pending entry when its waiter goes away, settled or not.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingCall>,
    call_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(self.call_id).is_some() {
            tracing::debug!(call_id = %self.call_id, "Abandoned pending tool call");
        }
    }
}

pub struct ToolBridge {
    mcp: Arc<McpRegistry>,
    external: Arc<ExternalToolRegistry>,
    connections: Arc<ConnectionTable>,
    /// Pending round trips keyed by call id. Removing an entry is the only
    /// way to settle it.
    pending: DashMap<String, PendingCall>,
    call_timeout: Duration,
}

impl ToolBridge {
    pub fn new(
        mcp: Arc<McpRegistry>,
        external: Arc<ExternalToolRegistry>,
        connections: Arc<ConnectionTable>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            mcp,
            external,
            connections,
            pending: DashMap::new(),
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Resolve a reference name against both registries.
    pub fn lookup(&self, reference_name: &str) -> Option<ToolDefinition> {
        self.mcp
            .lookup(reference_name)
            .or_else(|| self.external.lookup(reference_name))
    }

    /// Invoke a tool by reference name. Never fails: every error becomes a
    /// `{success: false, error}` result.
    pub async fn call_tool(&self, reference_name: &str, args: Value) -> CallToolResult {
        let started = Instant::now();

        let (origin, outcome) = match self.lookup(reference_name) {
            Some(definition) => {
                let origin = definition.origin().as_str();
                (origin, self.dispatch(definition, args).await)
            }
            None => ("unknown", Err(Error::tool_not_found(reference_name))),
        };

        match &outcome {
            Ok(_) => tracing::debug!(
                tool = %reference_name,
                origin,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tool call succeeded"
            ),
            Err(e) => tracing::info!(
                tool = %reference_name,
                origin,
                error = %e,
                "Tool call failed"
            ),
        }
        metrics::track_tool_call(origin, outcome.is_ok());

        CallToolResult::from(outcome)
    }

    async fn dispatch(&self, definition: ToolDefinition, args: Value) -> Result<Value> {
        definition.meta().guard.check(&args)?;
        match definition {
            ToolDefinition::Mcp(def) => self.call_mcp(&def, args).await,
            ToolDefinition::External(def) => self.call_external(&def, args).await,
        }
    }

    async fn call_mcp(&self, def: &McpToolDefinition, args: Value) -> Result<Value> {
        let result = def.client.call_tool(&def.meta.name, args).await?;
        normalize_mcp_result(result)
    }

    async fn call_external(&self, def: &ExternalToolDefinition, args: Value) -> Result<Value> {
        let call_id = Uuid::new_v4().to_string();
        let tool_name = def.meta.name.clone();
        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(
            call_id.clone(),
            PendingCall {
                connection_id: def.connection_id.clone(),
                tool_name: tool_name.clone(),
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            call_id: &call_id,
        };

        // Checked after the entry exists: `close` drops the connection before
        // sweeping, so a call either sees it gone here or gets swept.
        if !self.connections.is_open(&def.connection_id) {
            self.pending.remove(&call_id);
            return Err(Error::connection_unavailable(def.connection_id.to_string()));
        }

        let request = OutboundMessage::ToolCall {
            call_id: call_id.clone(),
            tool_name: tool_name.clone(),
            args,
        };
        if let Err(e) = self.connections.send(&def.connection_id, request) {
            self.pending.remove(&call_id);
            return Err(e);
        }
        tracing::debug!(
            call_id = %call_id,
            connection_id = %def.connection_id,
            tool = %tool_name,
            "Sent tool call to connection"
        );

        match tokio::time::timeout(self.call_timeout, &mut rx).await {
            Ok(settled) => settled.unwrap_or_else(|_| Err(Error::internal("pending call dropped"))),
            Err(_) => {
                let message = format!(
                    "Tool call '{}' timed out after {}ms",
                    tool_name,
                    self.call_timeout.as_millis()
                );
                if self.settle(&call_id, Err(Error::timeout(message))) {
                    tracing::warn!(call_id = %call_id, tool = %tool_name, "Tool call timed out");
                }
                // Whichever settlement removed the entry first has already sent.
                rx.await
                    .unwrap_or_else(|_| Err(Error::internal("pending call dropped")))
            }
        }
    }

    /// Settle a pending call. Returns false if it was already settled.
    fn settle(&self, call_id: &str, outcome: Result<Value>) -> bool {
        match self.pending.remove(call_id) {
            Some((_, call)) => {
                let _ = call.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Deliver a `tool_result` from `connection_id`.
    ///
    /// Results for unknown or already settled calls, and results sent by a
    /// connection that does not own the call, are ignored.
    pub fn deliver_result(
        &self,
        connection_id: &ConnectionId,
        call_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let Some((_, call)) = self
            .pending
            .remove_if(call_id, |_, call| call.connection_id == *connection_id)
        else {
            tracing::debug!(
                call_id = %call_id,
                connection_id = %connection_id,
                "Ignoring result for unknown or settled call"
            );
            return false;
        };

        let outcome = match error {
            Some(message) => Err(Error::tool_failed(message)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = call.tx.send(outcome);
        true
    }

    /// Reject every call waiting on a connection. Returns how many were
    /// rejected.
    pub fn connection_closed(&self, connection_id: &ConnectionId) -> usize {
        let call_ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.connection_id == *connection_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut rejected = 0;
        for call_id in call_ids {
            if let Some((_, call)) = self.pending.remove(&call_id) {
                let _ = call.tx.send(Err(Error::connection_closed(format!(
                    "Connection closed while waiting for tool '{}'",
                    call.tool_name
                ))));
                rejected += 1;
            }
        }
        if rejected > 0 {
            tracing::info!(
                connection_id = %connection_id,
                rejected,
                "Rejected pending calls of closed connection"
            );
        }
        rejected
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_for(&self, connection_id: &ConnectionId) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.connection_id == *connection_id)
            .count()
    }
}

/// Turn a tool server result into the value handed back to the snippet.
///
/// Structured content wins; otherwise the first text block, parsed as JSON
/// when it is JSON; otherwise an empty object.
pub fn normalize_mcp_result(result: McpCallResult) -> Result<Value> {
    if result.is_error {
        let message = result
            .first_text()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or("Tool reported an error");
        return Err(Error::tool_failed(message));
    }
    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }
    match result.first_text() {
        Some(text) => Ok(serde_json::from_str(text)
            .unwrap_or_else(|_| Value::String(text.trim().to_string()))),
        None => Ok(json!({})),
    }
}
